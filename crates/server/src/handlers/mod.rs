//! HTTP request handlers.

pub mod admin;
pub mod agents;
pub mod health;
pub mod status;

pub use admin::*;
pub use agents::*;
pub use health::*;
pub use status::*;

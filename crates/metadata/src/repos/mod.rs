//! Repository traits for entity operations.

pub mod authorities;
pub mod chains;
pub mod locations;
pub mod responders;
pub mod results;

pub use authorities::AuthorityRepo;
pub use chains::ChainRepo;
pub use locations::LocationRepo;
pub use responders::ResponderRepo;
pub use results::ResultRepo;

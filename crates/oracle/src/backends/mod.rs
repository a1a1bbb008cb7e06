//! Oracle backends.

pub mod censys;

//! Database initialization for the shared answer corpus

pub mod init;

pub use init::*;

//! Chunkdrop application wiring: configuration and the in-process
//! transport used by the command-line front end.

pub mod config;
pub mod local;

pub use config::AppConfig;
pub use local::LocalTransport;

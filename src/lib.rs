pub mod application;
pub mod cache;
pub mod cli;
pub mod config;
pub mod domain;
pub mod io;
pub mod lock;
pub mod logging;
pub mod storage;

pub use application::{EngineConfig, LedgerEngine, LedgerError};
pub use domain::*;
pub use storage::SqliteStore;

// Application layer: the ledger engine and its error taxonomy.
// Backends are injected, so the same engine runs on SQLite + in-process
// locks in the CLI and on Redis-backed cache/locks across nodes.

pub mod engine;
pub mod error;

pub use engine::*;
pub use error::*;

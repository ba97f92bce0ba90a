//! ETL Service - Loads statistical indicator extracts into the metric fact model
//!
//! Responsibilities:
//! - Read delimited source files in chunks, in any declared encoding
//! - Parse rows with fixed, custom and complex attribute strategies
//! - Resolve countries, cities, attribute vocabulary, series and periods
//! - Assemble typed facts and load them with duplicate suppression
//! - Report country coverage (check mode)
//!
//! Re-running a load over already ingested data is always a no-op.

pub mod assembler;
pub mod cache;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod loader;
pub mod locks;
pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod reader;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod stats;
pub mod storage;

pub use config::Settings;
pub use descriptor::SourceDescriptor;
pub use error::{Error, Result, StorageError};
pub use orchestrator::{Orchestrator, RunMode, RunOutcome, RunState};
pub use storage::memory::MemoryStorage;
pub use storage::postgres::PgStorage;
pub use storage::Storage;

//! # a3s-recon
//!
//! Batch catalog reconciliation against external transactional directories.
//!
//! ## Overview
//!
//! `a3s-recon` takes rows of untrusted tabular input (a card key and an item
//! key per row), validates each key against a whitelist, looks the pair up in
//! an external directory, and deletes the matching catalog entry. Every row
//! gets exactly one outcome; one bad row never aborts the batch, and every
//! directory resource acquired during a run is released exactly once.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_recon::{ConnectionParams, EngineOptions, InputRow, ReconciliationEngine};
//! use a3s_recon::directory::memory::MemoryDirectory;
//!
//! # async fn example() -> a3s_recon::Result<()> {
//! let directory = MemoryDirectory::new().with_entry("C1", "I1", "S1");
//! let rows = vec![
//!     InputRow::new(1, Some("C1"), Some("I1")),
//!     InputRow::new(2, Some("C2;DROP"), Some("I2")),
//! ];
//!
//! let engine = ReconciliationEngine::new(EngineOptions::default());
//! let report = engine
//!     .run(&rows, &directory, &ConnectionParams::default(), |pct| {
//!         println!("{}%", pct);
//!     })
//!     .await?;
//!
//! assert_eq!(report.processed_count, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **KeySanitizer** — whitelist validation plus query-literal escaping
//! - **CredentialVault** — scoped protection of stored passwords
//! - **DirectoryClient / DirectorySession** — traits every directory adapter implements
//! - **ReconciliationEngine** — the sequential row loop and resource teardown
//! - **JobReport** — ordered per-row outcomes

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod logger;
pub mod report;
pub mod sanitize;
pub mod types;
pub mod vault;

// Re-export core types
pub use config::{Settings, SettingsFile, StoredConnection};
pub use directory::{
    CatalogKey, DirectoryClient, DirectoryFault, DirectorySession, LookupQuery, RecordSet,
    ResourceHandle, ResourceKind,
};
pub use engine::{EngineOptions, ReconciliationEngine};
pub use error::{ReconError, Result};
pub use logger::{LogLine, MemoryLogger, RunLogger, TracingLogger};
pub use report::{JobReport, OutcomeCounts, RowOutcome, RowRecord};
pub use sanitize::{escape_literal, Charset, KeySanitizer, SanitizedKey, SanitizerPolicy};
pub use types::{rows_from_table, ConnectionParams, DbServerType, InputRow};
pub use vault::{AesGcmVault, CredentialVault, ProtectionScope, Secret};

// Re-export the in-memory adapter for convenience
pub use directory::memory::{MemoryDirectory, QueryFault};

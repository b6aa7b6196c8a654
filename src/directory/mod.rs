//! Directory client traits — the engine's view of the external system
//!
//! Every external directory (a DI-style COM API, a REST service layer, an
//! in-memory double) implements `DirectoryClient` to open sessions and
//! `DirectorySession` for the calls a run makes. The engine never touches
//! adapter-specific types.

use crate::error::Result;
use crate::types::ConnectionParams;
use async_trait::async_trait;
use std::collections::HashMap;

pub mod memory;

/// Factory for directory sessions
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Open a session, failing with `ReconError::Connection` on rejection
    async fn open(&self, params: &ConnectionParams) -> Result<Box<dyn DirectorySession>>;

    /// Adapter name (e.g., "memory")
    fn name(&self) -> &str;
}

/// An open connection to the directory
///
/// Handles returned by `open_cursor` and `open_catalog` belong to the
/// caller, who must hand each one back through `release` exactly once.
#[async_trait]
pub trait DirectorySession: Send {
    /// Acquire a query cursor
    async fn open_cursor(&mut self) -> Result<ResourceHandle>;

    /// Acquire a catalog handle, reused for every lookup of a run
    async fn open_catalog(&mut self) -> Result<ResourceHandle>;

    /// Run a lookup query on a cursor
    async fn query(&mut self, cursor: &ResourceHandle, sql: &str) -> Result<RecordSet>;

    /// Position the catalog handle on the entry with this full key
    ///
    /// Returns `false` when the entry cannot be retrieved.
    async fn find_catalog_entry(
        &mut self,
        catalog: &ResourceHandle,
        key: &CatalogKey,
    ) -> Result<bool>;

    /// Delete the entry the catalog handle is positioned on
    ///
    /// Returns the directory's result code: 0 for success, non-zero on
    /// failure with detail available from `last_error`.
    async fn delete(&mut self, catalog: &ResourceHandle) -> Result<i32>;

    /// Code and message of the most recent failing call
    fn last_error(&self) -> DirectoryFault;

    /// Release a handle acquired from this session
    async fn release(&mut self, handle: ResourceHandle) -> Result<()>;

    /// Close the session; closing an already-closed session is a no-op
    async fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// Kind of directory-side resource a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    QueryCursor,
    Catalog,
}

/// Opaque handle to a directory-side resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    id: u64,
    kind: ResourceKind,
}

impl ResourceHandle {
    pub fn new(id: u64, kind: ResourceKind) -> Self {
        Self { id, kind }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

/// Last-error pair reported by the directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryFault {
    pub code: i32,
    pub message: String,
}

impl DirectoryFault {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Full key of a catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogKey {
    pub item_key: String,
    pub card_key: String,
    pub substitute: String,
}

/// Rows returned by a lookup query, with named-field access
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    rows: Vec<HashMap<String, String>>,
}

impl RecordSet {
    pub fn new(rows: Vec<HashMap<String, String>>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Named field of the first row
    pub fn field(&self, name: &str) -> Option<&str> {
        self.rows
            .first()
            .and_then(|row| row.get(name))
            .map(String::as_str)
    }

    pub fn rows(&self) -> &[HashMap<String, String>] {
        &self.rows
    }
}

/// Shape of the lookup query joining both keys to a substitute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupQuery {
    pub table: String,
    pub substitute_field: String,
    pub card_field: String,
    pub item_field: String,
}

impl Default for LookupQuery {
    fn default() -> Self {
        Self {
            table: "OSCN".to_string(),
            substitute_field: "Substitute".to_string(),
            card_field: "CardCode".to_string(),
            item_field: "ItemCode".to_string(),
        }
    }
}

impl LookupQuery {
    /// Render the query for two already-escaped literals
    pub fn render(&self, card_literal: &str, item_literal: &str) -> String {
        format!(
            "SELECT \"{}\" FROM \"{}\" WHERE \"{}\" = '{}' AND \"{}\" = '{}'",
            self.substitute_field,
            self.table,
            self.card_field,
            card_literal,
            self.item_field,
            item_literal
        )
    }
}

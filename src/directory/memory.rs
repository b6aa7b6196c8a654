//! In-memory directory for testing, benchmarks, and dry runs
//!
//! Holds catalog entries in a `Vec` and interprets the lookup query's
//! `"Field" = 'literal'` predicates. Counters record every open, close,
//! acquire, and release so tests can check the resource contract, and
//! faults can be injected per query ordinal.

use super::{
    CatalogKey, DirectoryClient, DirectoryFault, DirectorySession, LookupQuery, RecordSet,
    ResourceHandle, ResourceKind,
};
use crate::error::{ReconError, Result};
use crate::types::ConnectionParams;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A catalog entry held by the memory directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub card_key: String,
    pub item_key: String,
    pub substitute: String,
}

/// Fault injected on a specific query
#[derive(Debug, Clone)]
pub enum QueryFault {
    /// The query returns a directory error
    Error(DirectoryFault),
    /// The query panics, simulating a crash inside the adapter
    Panic(String),
}

/// Resource bookkeeping of a memory directory
#[derive(Debug, Clone, Default)]
pub struct DirectoryStats {
    /// Successful session opens
    pub opens: usize,
    /// Sessions that transitioned from open to closed
    pub closes: usize,
    /// All `close` calls, including repeated ones
    pub close_calls: usize,
    pub queries: usize,
    pub deletes: usize,
    /// Handles in acquisition order
    pub acquired: Vec<ResourceHandle>,
    /// Release count per handle id
    pub releases: HashMap<u64, usize>,
}

impl DirectoryStats {
    /// Whether every acquired handle was released exactly once
    pub fn all_released_once(&self) -> bool {
        self.releases.len() == self.acquired.len()
            && self
                .acquired
                .iter()
                .all(|h| self.releases.get(&h.id()) == Some(&1))
    }

    /// Handles acquired but never released
    pub fn outstanding(&self) -> Vec<ResourceHandle> {
        self.acquired
            .iter()
            .filter(|h| !self.releases.contains_key(&h.id()))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: Vec<CatalogEntry>,
    reject_connect: Option<DirectoryFault>,
    delete_failures: HashMap<(String, String), DirectoryFault>,
    unresolvable: HashSet<(String, String)>,
    query_faults: HashMap<usize, QueryFault>,
    /// Live handles; a catalog handle carries the entry it is positioned on
    open_handles: HashMap<u64, Option<CatalogKey>>,
    next_handle: u64,
    stats: DirectoryStats,
}

/// In-memory directory client
///
/// Clones share state, so a test can keep a handle for inspection while the
/// engine owns the session.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<MemoryState>>,
    lookup: LookupQuery,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret lookups rendered from a non-default query shape
    pub fn with_lookup(mut self, lookup: LookupQuery) -> Self {
        self.lookup = lookup;
        self
    }

    /// Add a catalog entry
    pub fn with_entry(self, card_key: &str, item_key: &str, substitute: &str) -> Self {
        self.lock().entries.push(CatalogEntry {
            card_key: card_key.to_string(),
            item_key: item_key.to_string(),
            substitute: substitute.to_string(),
        });
        self
    }

    /// Reject every session open with the given fault
    pub fn rejecting_connections(self, code: i32, message: &str) -> Self {
        self.lock().reject_connect = Some(DirectoryFault::new(code, message));
        self
    }

    /// Make deletes of an entry return a non-zero code
    pub fn failing_delete(self, card_key: &str, item_key: &str, code: i32, message: &str) -> Self {
        self.lock().delete_failures.insert(
            (card_key.to_string(), item_key.to_string()),
            DirectoryFault::new(code, message),
        );
        self
    }

    /// Let the lookup find an entry that then cannot be resolved by key
    pub fn unresolvable(self, card_key: &str, item_key: &str) -> Self {
        self.lock()
            .unresolvable
            .insert((card_key.to_string(), item_key.to_string()));
        self
    }

    /// Inject a fault on the Nth query (1-based) across all sessions
    pub fn fault_on_query(self, ordinal: usize, fault: QueryFault) -> Self {
        self.lock().query_faults.insert(ordinal, fault);
        self
    }

    /// Snapshot of resource bookkeeping
    pub fn stats(&self) -> DirectoryStats {
        self.lock().stats.clone()
    }

    /// Remaining catalog entries
    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.lock().entries.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking fault leaves no partial update behind, so a poisoned
        // lock still holds consistent state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn open(&self, params: &ConnectionParams) -> Result<Box<dyn DirectorySession>> {
        let mut state = self.lock();
        if let Some(fault) = &state.reject_connect {
            return Err(ReconError::Connection {
                code: fault.code,
                message: fault.message.clone(),
            });
        }
        state.stats.opens += 1;
        tracing::debug!(
            server = %params.server,
            company_db = %params.company_db,
            "Memory directory session opened"
        );

        Ok(Box::new(MemorySession {
            directory: self.clone(),
            open: true,
            last_error: DirectoryFault::default(),
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Session on a `MemoryDirectory`
pub struct MemorySession {
    directory: MemoryDirectory,
    open: bool,
    last_error: DirectoryFault,
}

impl MemorySession {
    fn ensure_open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        self.fail(-1, "Session is closed")
    }

    fn fail<T>(&mut self, code: i32, message: &str) -> Result<T> {
        self.last_error = DirectoryFault::new(code, message);
        Err(ReconError::Directory {
            code,
            message: message.to_string(),
        })
    }
}

fn acquire(state: &mut MemoryState, kind: ResourceKind) -> ResourceHandle {
    state.next_handle += 1;
    let handle = ResourceHandle::new(state.next_handle, kind);
    state.open_handles.insert(handle.id(), None);
    state.stats.acquired.push(handle.clone());
    handle
}

#[async_trait]
impl DirectorySession for MemorySession {
    async fn open_cursor(&mut self) -> Result<ResourceHandle> {
        self.ensure_open()?;
        let mut state = self.directory.lock();
        Ok(acquire(&mut state, ResourceKind::QueryCursor))
    }

    async fn open_catalog(&mut self) -> Result<ResourceHandle> {
        self.ensure_open()?;
        let mut state = self.directory.lock();
        Ok(acquire(&mut state, ResourceKind::Catalog))
    }

    async fn query(&mut self, cursor: &ResourceHandle, sql: &str) -> Result<RecordSet> {
        self.ensure_open()?;

        let result = {
            let mut state = self.directory.lock();
            if !state.open_handles.contains_key(&cursor.id()) {
                Err(DirectoryFault::new(-2, "Unknown cursor"))
            } else {
                state.stats.queries += 1;
                let ordinal = state.stats.queries;
                let fault = state.query_faults.get(&ordinal).cloned();
                match fault {
                    Some(QueryFault::Panic(message)) => {
                        drop(state);
                        panic!("{}", message);
                    }
                    Some(QueryFault::Error(fault)) => Err(fault),
                    None => run_lookup(&state.entries, &self.directory.lookup, sql),
                }
            }
        };

        match result {
            Ok(rs) => Ok(rs),
            Err(fault) => self.fail(fault.code, &fault.message),
        }
    }

    async fn find_catalog_entry(
        &mut self,
        catalog: &ResourceHandle,
        key: &CatalogKey,
    ) -> Result<bool> {
        self.ensure_open()?;

        let found = {
            let mut state = self.directory.lock();
            if !state.open_handles.contains_key(&catalog.id()) {
                None
            } else {
                let pair = (key.card_key.clone(), key.item_key.clone());
                let exists = !state.unresolvable.contains(&pair)
                    && state.entries.iter().any(|e| {
                        e.card_key == key.card_key
                            && e.item_key == key.item_key
                            && e.substitute == key.substitute
                    });
                let position = exists.then(|| key.clone());
                state.open_handles.insert(catalog.id(), position);
                Some(exists)
            }
        };

        match found {
            Some(exists) => Ok(exists),
            None => self.fail(-2, "Unknown catalog handle"),
        }
    }

    async fn delete(&mut self, catalog: &ResourceHandle) -> Result<i32> {
        self.ensure_open()?;

        let outcome = {
            let mut state = self.directory.lock();
            state.stats.deletes += 1;
            let position = state.open_handles.get(&catalog.id()).cloned();
            match position {
                None => Err(DirectoryFault::new(-2, "Unknown catalog handle")),
                Some(None) => Err(DirectoryFault::new(-4, "Catalog handle is not on an entry")),
                Some(Some(key)) => {
                    let pair = (key.card_key.clone(), key.item_key.clone());
                    if let Some(fault) = state.delete_failures.get(&pair).cloned() {
                        Ok(Some(fault))
                    } else {
                        state.entries.retain(|e| {
                            !(e.card_key == key.card_key
                                && e.item_key == key.item_key
                                && e.substitute == key.substitute)
                        });
                        state.open_handles.insert(catalog.id(), None);
                        Ok(None)
                    }
                }
            }
        };

        match outcome {
            Ok(None) => Ok(0),
            Ok(Some(fault)) => {
                let code = fault.code;
                self.last_error = fault;
                Ok(code)
            }
            Err(fault) => self.fail(fault.code, &fault.message),
        }
    }

    fn last_error(&self) -> DirectoryFault {
        self.last_error.clone()
    }

    async fn release(&mut self, handle: ResourceHandle) -> Result<()> {
        let known = {
            let mut state = self.directory.lock();
            *state.stats.releases.entry(handle.id()).or_insert(0) += 1;
            state.open_handles.remove(&handle.id()).is_some()
        };
        if !known {
            return self.fail(-2, "Handle already released or unknown");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.directory.lock();
        state.stats.close_calls += 1;
        if self.open {
            self.open = false;
            state.stats.closes += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Evaluate a rendered lookup query against the entries
fn run_lookup(
    entries: &[CatalogEntry],
    lookup: &LookupQuery,
    sql: &str,
) -> std::result::Result<RecordSet, DirectoryFault> {
    if !sql.contains(&format!("FROM \"{}\"", lookup.table)) {
        return Err(DirectoryFault::new(-3, "Unsupported query"));
    }
    let predicates = parse_predicates(sql);
    let (Some(card), Some(item)) = (
        predicates.get(&lookup.card_field),
        predicates.get(&lookup.item_field),
    ) else {
        return Err(DirectoryFault::new(-3, "Query must filter on both keys"));
    };

    let rows = entries
        .iter()
        .filter(|e| &e.card_key == card && &e.item_key == item)
        .map(|e| {
            let mut row = HashMap::new();
            row.insert(lookup.substitute_field.clone(), e.substitute.clone());
            row
        })
        .collect();
    Ok(RecordSet::new(rows))
}

/// Extract `"Field" = 'literal'` pairs, undoing quote doubling and
/// backslash escaping in the literal
fn parse_predicates(sql: &str) -> HashMap<String, String> {
    let mut predicates = HashMap::new();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '"' {
            i += 1;
            continue;
        }
        let Some(end) = chars[i + 1..].iter().position(|&c| c == '"') else {
            break;
        };
        let field: String = chars[i + 1..i + 1 + end].iter().collect();
        let mut j = i + end + 2;
        while j < chars.len() && chars[j] == ' ' {
            j += 1;
        }
        if chars.get(j) != Some(&'=') {
            i = i + end + 2;
            continue;
        }
        j += 1;
        while j < chars.len() && chars[j] == ' ' {
            j += 1;
        }
        if chars.get(j) != Some(&'\'') {
            i = j;
            continue;
        }
        j += 1;

        let mut literal = String::new();
        while j < chars.len() {
            match chars[j] {
                '\'' if chars.get(j + 1) == Some(&'\'') => {
                    literal.push('\'');
                    j += 2;
                }
                '\'' => break,
                '\\' if chars.get(j + 1) == Some(&'\\') => {
                    literal.push('\\');
                    j += 2;
                }
                c => {
                    literal.push(c);
                    j += 1;
                }
            }
        }
        predicates.insert(field, literal);
        i = j + 1;
    }

    predicates
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Time-bounded path resolution cache.
//!
//! Mapping a depot path to its local counterpart (or back) is a synchronous
//! round trip to the server, and UI-style callers ask for the same handful
//! of working-directory files over and over while refreshing status. The
//! [`PathCache`] memoizes each `where` lookup for a bounded window, trading
//! a little staleness for the elimination of redundant round trips. Expiry
//! is per key, so a hot path refreshes independently of a cold one.
//!
//! The workspace root lookup follows the same pattern with a much shorter
//! window: the root can legitimately change between invocations in
//! automated contexts and is cheap to ask for again.
//!
//! # Directory Queries
//!
//! The server only resolves file names, so a directory query (trailing
//! separator) gets an internal marker appended before it is sent or cached.
//! This keeps `depot/dir/` and a file literally named `depot/dir` on
//! distinct cache keys, and the marker is split back off every returned
//! value.
//!
//! # Clocks
//!
//! Entry age is measured through the [`Clock`] seam rather than ambient
//! time, so tests drive expiry deterministically with a fake clock.

use crate::{
    client::ReportMode,
    session::SessionHandle,
};

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};
use tracing::{debug, instrument};

/// Validity window for depot/local mapping entries.
pub const MAPPING_VALIDITY: Duration = Duration::from_secs(60);

/// Validity window for the workspace root entry.
pub const ROOT_VALIDITY: Duration = Duration::from_secs(10);

/// Marker appended to directory queries before caching or sending.
const DIRECTORY_MARKER: &str = "__DEPOTLINK_MARKER__";

/// Source of "now" for entry age checks.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Which way a path mapping query goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local filesystem path in, depot path out.
    LocalToDepot,

    /// Depot path in, local filesystem path out.
    DepotToLocal,
}

/// One resolved mapping as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    /// Server-side canonical path.
    pub depot_file: String,

    /// Workspace-syntax path.
    pub client_file: String,

    /// Local filesystem path.
    pub local_path: String,
}

struct MappingEntry {
    /// `None` records "no mapping found" so misses are memoized too.
    mapping: Option<PathMapping>,
    created: Instant,
}

struct RootEntry {
    root: PathBuf,
    created: Instant,
}

/// Path resolution cache over one injected clock.
///
/// Construct once per process and share by reference. Interior mutability
/// keeps lookups usable behind `&self` from multiple threads; the server
/// round trip itself happens outside the lock.
pub struct PathCache<C = SystemClock>
where
    C: Clock,
{
    clock: C,
    mappings: Mutex<HashMap<String, MappingEntry>>,
    root: Mutex<Option<RootEntry>>,
}

impl PathCache<SystemClock> {
    /// Construct a cache over the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for PathCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> PathCache<C>
where
    C: Clock,
{
    /// Construct a cache over a caller-supplied clock.
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            mappings: Mutex::new(HashMap::new()),
            root: Mutex::new(None),
        }
    }

    fn lock_mappings(&self) -> MutexGuard<'_, HashMap<String, MappingEntry>> {
        self.mappings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_root(&self) -> MutexGuard<'_, Option<RootEntry>> {
        self.root.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a path through the cache.
    ///
    /// Returns the mapped path in the requested direction, or `None` if
    /// the server has no mapping for it. Both outcomes are cached for
    /// [`MAPPING_VALIDITY`]; an entry older than that is treated as absent
    /// and re-queried. Server errors propagate without populating the
    /// cache.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Session`] if the `where` round trip fails
    ///   outright (spawn failure, lost connection).
    #[instrument(skip(self, handle), level = "debug")]
    pub fn resolve(
        &self,
        handle: &SessionHandle,
        path: &str,
        direction: Direction,
    ) -> Result<Option<String>> {
        let key = normalize_key(path);

        if let Some(entry) = self.fresh_mapping(&key) {
            debug!("cache hit for {key:?}");
            return Ok(project(entry.as_ref(), direction));
        }

        let records = {
            let _quiet = handle.at_report_mode(ReportMode::Silent);
            handle.run("where", &[key.as_str()])?
        };

        let mapping = records.first().map(|record| PathMapping {
            depot_file: record.get("depotFile").unwrap_or_default().to_owned(),
            client_file: record.get("clientFile").unwrap_or_default().to_owned(),
            local_path: record.get("path").unwrap_or_default().to_owned(),
        });

        let resolved = project(mapping.as_ref(), direction);
        self.lock_mappings().insert(
            key,
            MappingEntry {
                mapping,
                created: self.clock.now(),
            },
        );

        Ok(resolved)
    }

    /// Workspace root directory, through the cache.
    ///
    /// Asks the server for `info` and reads the reported client root.
    /// Cached for [`ROOT_VALIDITY`].
    ///
    /// # Errors
    ///
    /// - Return [`Error::Session`] if the `info` round trip fails.
    /// - Return [`Error::NoWorkspaceRoot`] if the server reports no root,
    ///   e.g. no workspace is bound to the connection.
    #[instrument(skip(self, handle), level = "debug")]
    pub fn workspace_root(&self, handle: &SessionHandle) -> Result<PathBuf> {
        {
            let cached = self.lock_root();
            if let Some(entry) = cached.as_ref() {
                if self.clock.now().duration_since(entry.created) < ROOT_VALIDITY {
                    debug!("workspace root served from cache");
                    return Ok(entry.root.clone());
                }
            }
        }

        let records = handle.run("info", &[])?;
        let root = records
            .first()
            .and_then(|record| record.get("clientRoot"))
            .map(PathBuf::from)
            .ok_or(Error::NoWorkspaceRoot)?;

        *self.lock_root() = Some(RootEntry {
            root: root.clone(),
            created: self.clock.now(),
        });

        Ok(root)
    }

    fn fresh_mapping(&self, key: &str) -> Option<Option<PathMapping>> {
        let mappings = self.lock_mappings();
        let entry = mappings.get(key)?;
        if self.clock.now().duration_since(entry.created) < MAPPING_VALIDITY {
            Some(entry.mapping.clone())
        } else {
            None
        }
    }
}

/// Append the directory marker to queries with a trailing separator.
fn normalize_key(path: &str) -> String {
    if path.ends_with('/') {
        format!("{path}{DIRECTORY_MARKER}")
    } else {
        path.to_owned()
    }
}

/// Project a mapping onto the requested direction, splitting the marker
/// back off.
fn project(mapping: Option<&PathMapping>, direction: Direction) -> Option<String> {
    let mapping = mapping?;
    let value = match direction {
        Direction::LocalToDepot => mapping.depot_file.as_str(),
        Direction::DepotToLocal => mapping.local_path.as_str(),
    };

    Some(
        value
            .split(DIRECTORY_MARKER)
            .next()
            .unwrap_or_default()
            .to_owned(),
    )
}

/// Path cache error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Server round trip fails.
    #[error(transparent)]
    Session(#[from] crate::session::Error),

    /// Server reports no workspace root.
    #[error("server reports no workspace root for this connection")]
    NoWorkspaceRoot,
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

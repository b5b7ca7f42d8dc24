// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! High-level path and identity queries.
//!
//! Convenience layer over the session, cache, and changelist machinery:
//! "is this file tracked?", "does this path live inside the workspace?",
//! "what revision of this file do I have?". Each helper takes the shared
//! [`SessionHandle`] so deep call chains keep riding one connection.

use crate::{
    cache::{Clock, Direction, PathCache},
    client::{ReportMode, TaggedRecord},
    session::SessionHandle,
};

use serde::Serialize;
use std::path::Path;
use tracing::{debug, instrument};

/// Snapshot of the settings a session is currently operating under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentConfiguration {
    /// User the session authenticated as.
    pub user: String,

    /// Server address.
    pub port: String,

    /// Bound workspace.
    pub workspace: String,

    /// Working directory commands run from.
    pub cwd: String,

    /// Editor configured for interactive forms, if any.
    pub editor: Option<String>,

    /// Whether the connection is currently open.
    pub connected: bool,
}

/// Describe the session's current settings.
pub fn current_configuration(handle: &SessionHandle) -> CurrentConfiguration {
    CurrentConfiguration {
        user: handle.user(),
        port: handle.port(),
        workspace: handle.workspace(),
        cwd: handle.cwd().to_string_lossy().into_owned(),
        editor: std::env::var("P4EDITOR").ok(),
        connected: handle.connected(),
    }
}

/// First record of the server's `info` output.
///
/// # Errors
///
/// - Return [`Error::Session`] if the query fails.
/// - Return [`Error::EmptyServerInfo`] if the server returns nothing.
pub fn server_info(handle: &SessionHandle) -> Result<TaggedRecord> {
    handle
        .run("info", &[])?
        .into_iter()
        .next()
        .ok_or(Error::EmptyServerInfo)
}

/// True if the file at `path` is tracked by the server.
///
/// Probes with `have` under the silent report mode, so an untracked path
/// comes back as plain `false` rather than an error. Does not work on
/// directories, matching the server command it rides on.
///
/// # Errors
///
/// - Return [`Error::Session`] if the probe fails outright.
#[instrument(skip(handle), level = "debug")]
pub fn is_tracked(handle: &SessionHandle, path: &str) -> Result<bool> {
    let path = realpath(path);
    let _quiet = handle.at_report_mode(ReportMode::Silent);
    let records = handle.run("have", &[path.as_str()])?;

    Ok(!records.is_empty())
}

/// True if `path` sits under the workspace root.
///
/// The root comes through the cache's short-window lookup.
///
/// # Errors
///
/// - Return [`Error::Cache`] if the root cannot be determined.
#[instrument(skip(handle, cache), level = "debug")]
pub fn is_under_workspace_root<C>(
    handle: &SessionHandle,
    cache: &PathCache<C>,
    path: &str,
) -> Result<bool>
where
    C: Clock,
{
    let root = cache.workspace_root(handle)?;
    let root = root.canonicalize().unwrap_or(root);
    let path = realpath(path);

    Ok(Path::new(path.as_str()).starts_with(&root))
}

/// Resolve a path to its `depot_path#revision` form.
///
/// Asks `fstat` for the depot path and held revision. Paths known to the
/// server but not synced report revision `-1`. Paths `fstat` does not know
/// fall back to the cached depot mapping, and paths outside the workspace
/// come back unchanged. With `ensure_tracked`, untracked paths short-circuit
/// to the input unchanged.
///
/// # Errors
///
/// - Return [`Error::Session`] if a server round trip fails.
/// - Return [`Error::Cache`] if the fallback mapping lookup fails.
#[instrument(skip(handle, cache), level = "debug")]
pub fn resolve_with_revision<C>(
    handle: &SessionHandle,
    cache: &PathCache<C>,
    path: &str,
    ensure_tracked: bool,
) -> Result<String>
where
    C: Clock,
{
    if ensure_tracked && !is_tracked(handle, path)? {
        debug!("{path:?} untracked, returned unchanged");
        return Ok(path.to_owned());
    }

    let records = {
        let _quiet = handle.at_report_mode(ReportMode::Silent);
        handle.run("fstat", &[path])?
    };

    match records.first() {
        Some(record) => {
            let depot_file = record
                .get("depotFile")
                .ok_or(Error::MissingField { field: "depotFile" })?;
            let revision = record.get("haveRev").unwrap_or("-1");
            Ok(format!("{depot_file}#{revision}"))
        }
        None => {
            let mapped = cache.resolve(handle, path, Direction::LocalToDepot)?;
            Ok(mapped.unwrap_or_else(|| path.to_owned()))
        }
    }
}

/// Keep only the tracked paths out of `paths`.
///
/// One shared session serves every probe.
///
/// # Errors
///
/// - Return [`Error::Session`] if a probe fails outright.
pub fn filter_tracked(
    handle: &SessionHandle,
    paths: impl IntoIterator<Item = impl Into<String>>,
) -> Result<Vec<String>> {
    let mut tracked = Vec::new();
    for path in paths {
        let path = path.into();
        if is_tracked(handle, path.as_str())? {
            tracked.push(path);
        }
    }

    Ok(tracked)
}

/// Canonicalize a local path, leaving depot-syntax paths untouched.
///
/// Paths that cannot be canonicalized (not existing locally) pass through
/// unchanged; the server gets the final say on what they mean.
fn realpath(path: &str) -> String {
    if path.starts_with("//") {
        return path.to_owned();
    }

    std::fs::canonicalize(path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_owned())
}

/// Query error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Server round trip fails.
    #[error(transparent)]
    Session(#[from] crate::session::Error),

    /// Cached lookup fails.
    #[error(transparent)]
    Cache(#[from] crate::cache::Error),

    /// Server record lacks a required field.
    #[error("server record missing field {field:?}")]
    MissingField { field: &'static str },

    /// Server produced no `info` record.
    #[error("server produced no info record")]
    EmptyServerInfo,
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

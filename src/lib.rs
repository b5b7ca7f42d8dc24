// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Scoped VCS sessions with cached depot/local path resolution.
//!
//! Depotlink lets deeply nested call chains share one live connection to a
//! centralized, changelist-based VCS server without every function needing
//! to know whether it is the outermost caller. A [`SessionHandle`] passed
//! down the chain is re-acquired at each level; the connection closes when
//! the last scope exits. Path mapping queries ride a time-bounded cache,
//! and pending changelist queries always hit the server fresh.
//!
//! # Example
//!
//! ```
//! use depotlink::{acquire, ReportMode, SessionHandle};
//!
//! fn first_function(existing: Option<&SessionHandle>) -> anyhow::Result<()> {
//!     let scope = acquire(existing, None)?;
//!     // Pass the handle to another function to reuse the connection.
//!     second_function(Some(scope.handle()))?;
//!     Ok(())
//! }
//!
//! fn second_function(existing: Option<&SessionHandle>) -> anyhow::Result<()> {
//!     let scope = acquire(existing, None)?;
//!     {
//!         // Probe optimistically: failures yield empty results here.
//!         let _quiet = scope.at_report_mode(ReportMode::Silent);
//!         let _ = scope.run("have", &["readme.md"])?;
//!     }
//!     // The report mode is back to whatever it was at function entry.
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod changes;
pub mod client;
pub mod env;
pub mod path;
pub mod query;
pub mod session;

pub use cache::{Clock, Direction, PathCache, PathMapping, SystemClock};
pub use changes::{has_pending, pending_for_current_user, Changelist};
pub use client::{CommandLineClient, ReportMode, TaggedRecord, VcsClient};
pub use env::{ConnectionOverrides, EnvRestore, EnvironmentSandbox};
pub use path::default_config_file;
pub use query::{
    current_configuration, filter_tracked, is_tracked, is_under_workspace_root,
    resolve_with_revision, server_info, CurrentConfiguration,
};
pub use session::{acquire, acquire_with, ExceptionLevelScope, SessionHandle, SessionScope};

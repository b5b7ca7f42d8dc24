// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Scoped, reference-counted server sessions.
//!
//! Deeply nested call chains all want the same thing: "give me a live
//! connection, I don't care whether my caller already has one". Passing a
//! [`SessionHandle`] down the chain and re-acquiring it at every level
//! makes that work: every acquisition bumps a scope count on the shared
//! handle, every [`SessionScope`] drop decrements it, and only the drop
//! that brings the count back to zero actually closes the connection and
//! restores any environment overrides applied at construction.
//!
//! The net effect is at most one live connection per logical call chain,
//! closed exactly once, when the last holder is done. Scope exits follow
//! drop order, so nesting is strictly last-in-first-out without any caller
//! discipline beyond ordinary ownership.
//!
//! Command failures normally surface as errors. A scope obtained from
//! [`SessionHandle::at_report_mode`] temporarily switches the session to
//! [`ReportMode::Silent`], under which failed commands yield an empty
//! record sequence instead. The prior mode comes back when the scope
//! drops, error paths included.

use crate::{
    client::{CommandLineClient, ReportMode, TaggedRecord, VcsClient},
    env::{ConnectionOverrides, EnvRestore, EnvironmentSandbox},
};

use std::{
    ops::Deref,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, instrument, warn};

/// Session state shared between all scopes of one call chain.
struct Session {
    client: Box<dyn VcsClient>,
    scope_count: u32,
    env_restore: Option<EnvRestore>,
}

/// Shared handle to one live server session.
///
/// Cheap to clone; all clones refer to the same underlying connection and
/// scope count. Hand a reference to nested callers so they can re-acquire
/// the session instead of opening their own connection.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

/// Acquire a session scope.
///
/// With an existing handle, the handle is re-scoped: the connection is
/// reused (reopened transparently if it had been closed), the scope count
/// goes up by one, and no environment work happens. Without one, a fresh
/// command-line client is constructed, the overrides (if any) are applied
/// through [`EnvironmentSandbox`], and the connection is opened.
///
/// Connection failures surface immediately; there is no retry here.
///
/// # Errors
///
/// - Return [`Error::Client`] if the connection cannot be opened.
#[instrument(skip(existing, overrides), level = "debug")]
pub fn acquire(
    existing: Option<&SessionHandle>,
    overrides: Option<&ConnectionOverrides>,
) -> Result<SessionScope> {
    match existing {
        Some(handle) => handle.rescope(),
        None => acquire_with(Box::new(CommandLineClient::new()), overrides),
    }
}

/// Acquire a session scope over a caller-supplied client.
///
/// Entry point for substituting a different [`VcsClient`] implementation.
///
/// # Errors
///
/// - Return [`Error::Client`] if the connection cannot be opened.
pub fn acquire_with(
    mut client: Box<dyn VcsClient>,
    overrides: Option<&ConnectionOverrides>,
) -> Result<SessionScope> {
    let env_restore = overrides
        .filter(|o| !o.is_empty())
        .map(EnvironmentSandbox::apply);

    if let Err(err) = client.connect() {
        // Token drop restores the environment before the error surfaces.
        drop(env_restore);
        return Err(err.into());
    }

    let handle = SessionHandle {
        inner: Arc::new(Mutex::new(Session {
            client,
            scope_count: 0,
            env_restore,
        })),
    };

    handle.rescope()
}

impl SessionHandle {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter another scope on this handle.
    ///
    /// Reopens the connection if it had been closed by the last scope
    /// exit, then increments the scope count.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Client`] if reconnecting fails.
    pub fn rescope(&self) -> Result<SessionScope> {
        let mut session = self.lock();
        if !session.client.connected() {
            debug!("reopening connection for reused handle");
            session.client.connect()?;
        }

        session.scope_count += 1;
        debug!("scope enter, count now {}", session.scope_count);

        Ok(SessionScope {
            handle: self.clone(),
        })
    }

    /// Run a command against the server.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Client`] if the command fails under
    ///   [`ReportMode::Raise`].
    pub fn run(&self, command: &str, args: &[&str]) -> Result<Vec<TaggedRecord>> {
        Ok(self.lock().client.run(command, args)?)
    }

    /// True if the underlying connection is open.
    pub fn connected(&self) -> bool {
        self.lock().client.connected()
    }

    /// User the session authenticated as.
    pub fn user(&self) -> String {
        self.lock().client.user().to_owned()
    }

    /// Workspace the session is bound to.
    pub fn workspace(&self) -> String {
        self.lock().client.workspace().to_owned()
    }

    /// Server address the session resolved to.
    pub fn port(&self) -> String {
        self.lock().client.port().to_owned()
    }

    /// Working directory commands are issued from.
    pub fn cwd(&self) -> PathBuf {
        self.lock().client.cwd().to_path_buf()
    }

    /// Current failure-report mode.
    pub fn report_mode(&self) -> ReportMode {
        self.lock().client.report_mode()
    }

    /// Switch the failure-report mode for the lifetime of the returned
    /// scope.
    ///
    /// Scopes stack: each one records the mode in force at entry and
    /// restores exactly that mode on drop, so after the last exit the
    /// session is back at the mode it started with, no matter how the
    /// block was left.
    pub fn at_report_mode(&self, mode: ReportMode) -> ExceptionLevelScope {
        let mut session = self.lock();
        let previous = session.client.report_mode();
        session.client.set_report_mode(mode);
        debug!("report mode {previous:?} -> {mode:?}");

        ExceptionLevelScope {
            handle: self.clone(),
            previous,
        }
    }
}

/// RAII scope over a [`SessionHandle`].
///
/// Dereferences to the handle, so commands run directly on the scope.
/// Dropping the scope decrements the shared count; the drop that reaches
/// zero closes the connection and restores the environment overrides
/// captured at construction.
pub struct SessionScope {
    handle: SessionHandle,
}

impl SessionScope {
    /// Borrow the shared handle to pass into nested callers.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Deref for SessionScope {
    type Target = SessionHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        let mut session = self.handle.lock();
        session.scope_count = session.scope_count.saturating_sub(1);
        debug!("scope exit, count now {}", session.scope_count);

        if session.scope_count == 0 {
            if let Err(err) = session.client.disconnect() {
                warn!("disconnect failed: {err}");
            }

            if let Some(restore) = session.env_restore.take() {
                restore.restore();
            }
        }
    }
}

/// Scoped override of the failure-report mode.
///
/// Restores the mode recorded at entry when dropped.
#[must_use = "dropping the scope immediately restores the prior report mode"]
pub struct ExceptionLevelScope {
    handle: SessionHandle,
    previous: ReportMode,
}

impl Drop for ExceptionLevelScope {
    fn drop(&mut self) {
        let mut session = self.handle.lock();
        session.client.set_report_mode(self.previous);
        debug!("report mode restored to {:?}", self.previous);
    }
}

/// Session error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operations on the underlying client fail.
    #[error(transparent)]
    Client(#[from] crate::client::Error),
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

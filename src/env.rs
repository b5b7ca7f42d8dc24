// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Process environment sandboxing for connection attempts.
//!
//! The command-line client reads its settings (server address, user,
//! workspace, and friends) from process-wide environment variables. To
//! connect with different settings without disturbing the rest of the
//! process, [`EnvironmentSandbox`] writes the overrides, records the prior
//! value of every variable it touches (including "was unset"), and hands
//! back an [`EnvRestore`] token that puts everything back exactly as it
//! was.
//!
//! Two variables get special treatment: `P4CONFIG` and `P4ROOT` configure
//! how the client *discovers* its settings from ambient files. Both are
//! cleared unconditionally before any override is written, so
//! caller-supplied overrides cannot be silently shadowed by a discovery
//! file sitting in the working tree. They are restored along with
//! everything else.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env,
    ffi::OsString,
};
use tracing::debug;

/// Variables that steer settings discovery rather than hold settings.
///
/// Cleared before overrides are applied, restored afterward.
pub const DISCOVERY_VARIABLES: [&str; 2] = ["P4CONFIG", "P4ROOT"];

/// Connection settings to apply for the duration of a connection.
///
/// Each logical setting translates to the corresponding process variable
/// (`user` -> `P4USER`, `workspace` -> `P4CLIENT`, and so on). Extra
/// variables pass through verbatim for settings this struct does not name,
/// e.g. `P4CHARSET`.
#[derive(Default, Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionOverrides {
    /// User to authenticate as (`P4USER`).
    pub user: Option<String>,

    /// Workspace (client spec) to bind to (`P4CLIENT`).
    pub workspace: Option<String>,

    /// Server address (`P4PORT`).
    pub port: Option<String>,

    /// Password or ticket (`P4PASSWD`).
    pub password: Option<String>,

    /// Editor spawned for interactive forms (`P4EDITOR`).
    pub editor: Option<String>,

    /// Verbatim variable passthrough.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ConnectionOverrides {
    /// Construct an empty override set.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no setting is overridden.
    pub fn is_empty(&self) -> bool {
        self.user.is_none()
            && self.workspace.is_none()
            && self.port.is_none()
            && self.password.is_none()
            && self.editor.is_none()
            && self.extra.is_empty()
    }

    /// Ordered `(variable, value)` pairs to write.
    ///
    /// Named settings come first in a fixed order, then the extras in
    /// their map order, so application and restoration are deterministic.
    fn pairs(&self) -> Vec<(String, String)> {
        let named = [
            ("P4USER", &self.user),
            ("P4CLIENT", &self.workspace),
            ("P4PORT", &self.port),
            ("P4PASSWD", &self.password),
            ("P4EDITOR", &self.editor),
        ];

        let mut pairs = Vec::new();
        for (variable, value) in named {
            if let Some(value) = value {
                pairs.push((variable.to_owned(), value.clone()));
            }
        }

        for (variable, value) in &self.extra {
            pairs.push((variable.clone(), value.clone()));
        }

        pairs
    }

    /// Fold another override set on top of this one.
    ///
    /// Settings present in `other` win. Used by the CLI to layer flag
    /// overrides over the configuration file.
    pub fn merge(&mut self, other: &ConnectionOverrides) {
        if other.user.is_some() {
            self.user.clone_from(&other.user);
        }
        if other.workspace.is_some() {
            self.workspace.clone_from(&other.workspace);
        }
        if other.port.is_some() {
            self.port.clone_from(&other.port);
        }
        if other.password.is_some() {
            self.password.clone_from(&other.password);
        }
        if other.editor.is_some() {
            self.editor.clone_from(&other.editor);
        }
        for (variable, value) in &other.extra {
            self.extra.insert(variable.clone(), value.clone());
        }
    }
}

/// Apply connection overrides to the process environment.
#[derive(Debug)]
pub struct EnvironmentSandbox;

impl EnvironmentSandbox {
    /// Write overrides into the process environment.
    ///
    /// Clears the discovery variables first, then writes each override in
    /// order, backing up the prior state of every variable touched. The
    /// returned token restores everything on [`EnvRestore::restore`] or on
    /// drop, whichever comes first.
    ///
    /// An empty override set is a strict no-op: nothing is read, written,
    /// or backed up, and restoring the token does nothing.
    pub fn apply(overrides: &ConnectionOverrides) -> EnvRestore {
        if overrides.is_empty() {
            return EnvRestore::default();
        }

        let mut saved = Vec::new();
        for variable in DISCOVERY_VARIABLES {
            saved.push((variable.to_owned(), env::var_os(variable)));
            env::remove_var(variable);
        }

        for (variable, value) in overrides.pairs() {
            debug!("override {variable}");
            saved.push((variable.clone(), env::var_os(&variable)));
            env::set_var(&variable, &value);
        }

        EnvRestore { saved }
    }
}

/// Restoration token for an applied override set.
///
/// Restores every touched variable to its prior value, removing variables
/// that did not exist beforehand. Restoration runs at most once, on the
/// explicit call or on drop.
#[derive(Default, Debug)]
#[must_use = "dropping the token immediately would undo the overrides"]
pub struct EnvRestore {
    saved: Vec<(String, Option<OsString>)>,
}

impl EnvRestore {
    /// Restore the prior environment now.
    pub fn restore(mut self) {
        self.restore_in_place();
    }

    fn restore_in_place(&mut self) {
        // INVARIANT: Restore in reverse application order.
        for (variable, prior) in self.saved.drain(..).rev() {
            match prior {
                Some(value) => env::set_var(&variable, value),
                None => env::remove_var(&variable),
            }
        }
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        self.restore_in_place();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn snapshot(variables: &[&str]) -> Vec<(String, Option<OsString>)> {
        variables
            .iter()
            .map(|v| (v.to_string(), env::var_os(v)))
            .collect()
    }

    #[sealed_test(env = [("P4USER", "ambient"), ("P4CONFIG", ".p4config")])]
    fn apply_writes_overrides_and_clears_discovery() {
        let overrides = ConnectionOverrides {
            user: Some("jdoe".into()),
            port: Some("ssl:perforce:1666".into()),
            ..Default::default()
        };

        let restore = EnvironmentSandbox::apply(&overrides);
        assert_eq!(env::var("P4USER").as_deref(), Ok("jdoe"));
        assert_eq!(env::var("P4PORT").as_deref(), Ok("ssl:perforce:1666"));
        assert_eq!(env::var_os("P4CONFIG"), None);
        assert_eq!(env::var_os("P4ROOT"), None);
        drop(restore);
    }

    #[sealed_test(env = [("P4USER", "ambient"), ("P4CONFIG", ".p4config")])]
    fn restore_puts_back_prior_state_exactly() {
        let watched = ["P4USER", "P4CLIENT", "P4PORT", "P4CONFIG", "P4ROOT", "P4CHARSET"];
        let before = snapshot(&watched);

        let overrides = ConnectionOverrides {
            user: Some("jdoe".into()),
            workspace: Some("jdoe-main".into()),
            extra: BTreeMap::from([("P4CHARSET".to_string(), "utf8".to_string())]),
            ..Default::default()
        };

        EnvironmentSandbox::apply(&overrides).restore();
        assert_eq!(snapshot(&watched), before);
    }

    #[sealed_test(env = [("P4CLIENT", "ambient-ws")])]
    fn previously_unset_variables_are_absent_again() {
        assert_eq!(env::var_os("P4USER"), None);

        let overrides = ConnectionOverrides {
            user: Some("jdoe".into()),
            workspace: Some("jdoe-main".into()),
            ..Default::default()
        };

        let restore = EnvironmentSandbox::apply(&overrides);
        assert_eq!(env::var("P4USER").as_deref(), Ok("jdoe"));
        restore.restore();

        assert_eq!(env::var_os("P4USER"), None);
        assert_eq!(env::var("P4CLIENT").as_deref(), Ok("ambient-ws"));
    }

    #[sealed_test(env = [("P4CONFIG", ".p4config"), ("P4ROOT", "/srv/p4root")])]
    fn empty_overrides_are_a_no_op() {
        let overrides = ConnectionOverrides::new();
        let restore = EnvironmentSandbox::apply(&overrides);

        // Discovery variables stay untouched on the fast path.
        assert_eq!(env::var("P4CONFIG").as_deref(), Ok(".p4config"));
        assert_eq!(env::var("P4ROOT").as_deref(), Ok("/srv/p4root"));
        restore.restore();
        assert_eq!(env::var("P4CONFIG").as_deref(), Ok(".p4config"));
    }

    #[test]
    fn merge_prefers_other_side() {
        let mut base = ConnectionOverrides {
            user: Some("jdoe".into()),
            port: Some("ssl:perforce:1666".into()),
            ..Default::default()
        };
        let layered = ConnectionOverrides {
            user: Some("admin".into()),
            workspace: Some("admin-ws".into()),
            ..Default::default()
        };

        base.merge(&layered);
        assert_eq!(base.user.as_deref(), Some("admin"));
        assert_eq!(base.workspace.as_deref(), Some("admin-ws"));
        assert_eq!(base.port.as_deref(), Some("ssl:perforce:1666"));
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Command execution surface for the VCS server.
//!
//! The server itself is an opaque endpoint. Everything above this module
//! talks to it through the [`VcsClient`] trait: open a connection, run a
//! command, collect the tagged result records, close the connection. The
//! wire protocol is somebody else's problem.
//!
//! The default implementation, [`CommandLineClient`], drives the stock `p4`
//! executable with tagged (`-ztag`) output. A "connection" for this client
//! is the initial `info` round trip that proves the server is reachable and
//! pins down the identity (user, workspace, port) the environment resolved
//! to at connect time. Commands after that each spawn their own process,
//! which matches how the command-line client actually behaves.

use std::{
    collections::HashMap,
    ffi::OsString,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, warn};

/// How command failures are reported to the caller.
///
/// Under [`ReportMode::Raise`] a failed command surfaces as
/// [`Error::Command`]. Under [`ReportMode::Silent`] it instead yields an
/// empty record sequence, which lets callers probe the server
/// optimistically ("is this path tracked?") without a catch-all error
/// handler. Scoped switching between the two lives in
/// [`ExceptionLevelScope`](crate::session::ExceptionLevelScope).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// Failed commands return an error.
    #[default]
    Raise,

    /// Failed commands return an empty record sequence.
    Silent,
}

/// One tagged result record returned by the server.
///
/// The server reports results as flat string key/value records, e.g. a
/// `where` record carries `depotFile`, `clientFile`, and `path` fields.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaggedRecord(HashMap<String, String>);

impl TaggedRecord {
    /// Construct an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a field by name.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Set a field, replacing any prior value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    /// True if the record carries no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for TaggedRecord
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Layer of indirection for server access.
///
/// Session handling, caching, and the changelist queries are all written
/// against this trait so tests can substitute a scripted double for the
/// real command-line client.
pub trait VcsClient: Send {
    /// Open the connection to the server.
    fn connect(&mut self) -> Result<()>;

    /// Close the connection.
    fn disconnect(&mut self) -> Result<()>;

    /// True if the connection is currently open.
    fn connected(&self) -> bool;

    /// Run a command against the server, returning its result records.
    fn run(&mut self, command: &str, args: &[&str]) -> Result<Vec<TaggedRecord>>;

    /// Current failure-report mode.
    fn report_mode(&self) -> ReportMode;

    /// Replace the failure-report mode.
    fn set_report_mode(&mut self, mode: ReportMode);

    /// User the connection authenticated as.
    fn user(&self) -> &str;

    /// Workspace (client spec) the connection is bound to.
    fn workspace(&self) -> &str;

    /// Server address the connection resolved to.
    fn port(&self) -> &str;

    /// Working directory commands are issued from.
    fn cwd(&self) -> &Path;
}

/// Server access through the `p4` executable.
#[derive(Debug)]
pub struct CommandLineClient {
    binary: OsString,
    connected: bool,
    mode: ReportMode,
    user: String,
    workspace: String,
    port: String,
    cwd: PathBuf,
}

impl CommandLineClient {
    /// Construct a new disconnected client driving the `p4` binary.
    pub fn new() -> Self {
        Self::with_binary("p4")
    }

    /// Construct a new disconnected client driving a specific binary.
    pub fn with_binary(binary: impl Into<OsString>) -> Self {
        Self {
            binary: binary.into(),
            connected: false,
            mode: ReportMode::default(),
            user: String::new(),
            workspace: String::new(),
            port: String::new(),
            cwd: PathBuf::new(),
        }
    }

    fn spawn(&self, command: &str, args: &[&str]) -> Result<Vec<TaggedRecord>> {
        let output = Command::new(&self.binary)
            .arg("-ztag")
            .arg(command)
            .args(args)
            .output()
            .map_err(|err| Error::Launch {
                source: err,
                binary: self.binary.clone(),
            })?;

        if !output.status.success() {
            let message = String::from_utf8_lossy(output.stderr.as_slice())
                .trim_end()
                .to_owned();
            return Err(Error::Command {
                command: command.to_owned(),
                message,
            });
        }

        let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
        Ok(parse_tagged(&stdout))
    }
}

impl Default for CommandLineClient {
    fn default() -> Self {
        Self::new()
    }
}

impl VcsClient for CommandLineClient {
    /// Open the connection.
    ///
    /// Runs `info` once to prove the server is reachable, then pins the
    /// identity the ambient environment resolved to. Identity must be
    /// captured here: environment overrides applied around the connection
    /// attempt are restored later, and the values read afterwards would no
    /// longer be the ones this connection authenticated with.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Launch`] if the binary cannot be spawned.
    /// - Return [`Error::Command`] if the server rejects the connection.
    fn connect(&mut self) -> Result<()> {
        let records = self.spawn("info", &[])?;
        let info = records.first().ok_or(Error::EmptyInfo)?;

        self.user = info.get("userName").unwrap_or_default().to_owned();
        self.workspace = info.get("clientName").unwrap_or_default().to_owned();
        self.port = info.get("serverAddress").unwrap_or_default().to_owned();
        self.cwd = std::env::current_dir().unwrap_or_default();
        self.connected = true;

        debug!(
            "connected to {} as {} (workspace {})",
            self.port, self.user, self.workspace
        );

        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            debug!("disconnecting from {}", self.port);
            self.connected = false;
        }

        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn run(&mut self, command: &str, args: &[&str]) -> Result<Vec<TaggedRecord>> {
        if !self.connected {
            return Err(Error::NotConnected {
                command: command.to_owned(),
            });
        }

        debug!("run {command} {args:?}");
        match self.spawn(command, args) {
            Ok(records) => Ok(records),
            Err(err @ Error::Command { .. }) if self.mode == ReportMode::Silent => {
                warn!("suppressed failure of {command:?}: {err}");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    fn report_mode(&self) -> ReportMode {
        self.mode
    }

    fn set_report_mode(&mut self, mode: ReportMode) {
        self.mode = mode;
    }

    fn user(&self) -> &str {
        &self.user
    }

    fn workspace(&self) -> &str {
        &self.workspace
    }

    fn port(&self) -> &str {
        &self.port
    }

    fn cwd(&self) -> &Path {
        self.cwd.as_path()
    }
}

/// Parse tagged (`-ztag`) output into result records.
///
/// Each field sits on its own `... field value` line. A blank line closes
/// the current record. Continuation lines without the `... ` prefix belong
/// to the previous field (multi-line descriptions).
fn parse_tagged(output: &str) -> Vec<TaggedRecord> {
    let mut records = Vec::new();
    let mut current = TaggedRecord::new();
    let mut last_field: Option<String> = None;

    for line in output.lines() {
        if line.is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            last_field = None;
            continue;
        }

        if let Some(rest) = line.strip_prefix("... ") {
            let (field, value) = match rest.split_once(' ') {
                Some((field, value)) => (field, value),
                None => (rest, ""),
            };
            current.set(field, value);
            last_field = Some(field.to_owned());
        } else if let Some(field) = &last_field {
            // INVARIANT: Continuation lines extend the previous field.
            let joined = match current.get(field) {
                Some(prior) => format!("{prior}\n{line}"),
                None => line.to_owned(),
            };
            current.set(field.clone(), joined);
        }
    }

    if !current.is_empty() {
        records.push(current);
    }

    records
}

/// Command execution error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client binary cannot be spawned at all.
    #[error("failed to launch {binary:?}")]
    Launch {
        #[source]
        source: std::io::Error,
        binary: OsString,
    },

    /// Server rejected or failed the command.
    #[error("command {command:?} failed: {message}")]
    Command { command: String, message: String },

    /// Command issued without a live connection.
    #[error("cannot run {command:?} without a live connection")]
    NotConnected { command: String },

    /// Server produced no `info` record on connect.
    #[error("server produced no info record")]
    EmptyInfo,
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    /// Shared call counters for [`MockClient`].
    #[derive(Debug, Default)]
    pub(crate) struct CallCounts {
        pub(crate) connects: AtomicUsize,
        pub(crate) disconnects: AtomicUsize,
        pub(crate) runs: AtomicUsize,
    }

    impl CallCounts {
        pub(crate) fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub(crate) fn disconnects(&self) -> usize {
            self.disconnects.load(Ordering::SeqCst)
        }

        pub(crate) fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    /// Scripted client double.
    ///
    /// Commands answer from a canned response table keyed by command name.
    /// Unknown commands return no records. A command listed in
    /// `failing_commands` fails under [`ReportMode::Raise`] and yields
    /// nothing under [`ReportMode::Silent`], like the real client.
    pub(crate) struct MockClient {
        pub(crate) counts: Arc<CallCounts>,
        pub(crate) responses: HashMap<String, Vec<TaggedRecord>>,
        pub(crate) failing_commands: Vec<String>,
        pub(crate) fail_connect: bool,
        connected: bool,
        mode: ReportMode,
        user: String,
        workspace: String,
        port: String,
        cwd: PathBuf,
    }

    impl MockClient {
        pub(crate) fn new() -> Self {
            Self {
                counts: Arc::new(CallCounts::default()),
                responses: HashMap::new(),
                failing_commands: Vec::new(),
                fail_connect: false,
                connected: false,
                mode: ReportMode::default(),
                user: "jdoe".into(),
                workspace: "jdoe-main".into(),
                port: "ssl:perforce:1666".into(),
                cwd: PathBuf::from("/home/jdoe/project"),
            }
        }

        pub(crate) fn counts(&self) -> Arc<CallCounts> {
            Arc::clone(&self.counts)
        }

        pub(crate) fn respond(
            &mut self,
            command: &str,
            records: impl IntoIterator<Item = TaggedRecord>,
        ) {
            self.responses
                .insert(command.to_owned(), records.into_iter().collect());
        }

        pub(crate) fn fail_on(&mut self, command: &str) {
            self.failing_commands.push(command.to_owned());
        }
    }

    impl VcsClient for MockClient {
        fn connect(&mut self) -> Result<()> {
            self.counts.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                return Err(Error::Command {
                    command: "info".into(),
                    message: "connect refused by test double".into(),
                });
            }

            self.connected = true;
            Ok(())
        }

        fn disconnect(&mut self) -> Result<()> {
            self.counts.disconnects.fetch_add(1, Ordering::SeqCst);
            self.connected = false;
            Ok(())
        }

        fn connected(&self) -> bool {
            self.connected
        }

        fn run(&mut self, command: &str, _args: &[&str]) -> Result<Vec<TaggedRecord>> {
            self.counts.runs.fetch_add(1, Ordering::SeqCst);
            if !self.connected {
                return Err(Error::NotConnected {
                    command: command.to_owned(),
                });
            }

            if self.failing_commands.iter().any(|c| c == command) {
                return match self.mode {
                    ReportMode::Raise => Err(Error::Command {
                        command: command.to_owned(),
                        message: "scripted failure".into(),
                    }),
                    ReportMode::Silent => Ok(Vec::new()),
                };
            }

            Ok(self.responses.get(command).cloned().unwrap_or_default())
        }

        fn report_mode(&self) -> ReportMode {
            self.mode
        }

        fn set_report_mode(&mut self, mode: ReportMode) {
            self.mode = mode;
        }

        fn user(&self) -> &str {
            &self.user
        }

        fn workspace(&self) -> &str {
            &self.workspace
        }

        fn port(&self) -> &str {
            &self.port
        }

        fn cwd(&self) -> &Path {
            self.cwd.as_path()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_tagged_single_record() {
        let output = indoc! {r#"
            ... depotFile //depot/project/readme.md
            ... clientFile //jdoe-main/project/readme.md
            ... path /home/jdoe/project/readme.md
        "#};

        let records = parse_tagged(output);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("depotFile"), Some("//depot/project/readme.md"));
        assert_eq!(records[0].get("path"), Some("/home/jdoe/project/readme.md"));
    }

    #[test]
    fn parse_tagged_multiple_records() {
        let output = indoc! {r#"
            ... change 105
            ... user jdoe

            ... change 12
            ... user jdoe
        "#};

        let records = parse_tagged(output);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("change"), Some("105"));
        assert_eq!(records[1].get("change"), Some("12"));
    }

    #[test]
    fn parse_tagged_continuation_lines() {
        let output = indoc! {r#"
            ... change 105
            ... desc fix the widget
            second line of description
        "#};

        let records = parse_tagged(output);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].get("desc"),
            Some("fix the widget\nsecond line of description")
        );
    }

    #[test]
    fn parse_tagged_field_without_value() {
        let records = parse_tagged("... unloaded\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("unloaded"), Some(""));
    }

    #[test]
    fn run_requires_connection() {
        let mut client = CommandLineClient::new();
        let result = client.run("info", &[]);
        assert!(matches!(result, Err(Error::NotConnected { .. })));
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pending changelist queries.
//!
//! Read-only views over the current user's pending changelists. Unlike
//! path resolution, nothing here is cached: pending state is live state,
//! and a stale answer to "is changelist 105 still pending?" is worse than
//! the extra round trip. Every call fetches fresh.

use crate::{client::TaggedRecord, session::SessionHandle};

use serde::Serialize;
use std::num::ParseIntError;
use tracing::{debug, instrument};

/// Immutable snapshot of one changelist as reported by the server.
///
/// The change number keeps its string form; the server treats change
/// numbers as unbounded integers rendered as strings, and callers compare
/// membership on the string form. Use [`Changelist::number`] for numeric
/// ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Changelist {
    /// Change number, string form as reported.
    pub change: String,

    /// Change type (`public`, `restricted`).
    pub change_type: String,

    /// Workspace the changelist belongs to.
    pub workspace: String,

    /// Description text.
    pub description: String,

    /// Status (`pending`, `submitted`, `shelved`).
    pub status: String,

    /// Server timestamp, seconds since the epoch as reported.
    pub time: String,

    /// Owning user.
    pub user: String,
}

impl Changelist {
    /// Build a changelist from a server record.
    ///
    /// Only the change number is mandatory; every other field defaults to
    /// empty when the server omits it.
    ///
    /// # Errors
    ///
    /// - Return [`Error::MissingField`] if the record has no `change`.
    pub fn from_record(record: &TaggedRecord) -> Result<Self> {
        let change = record
            .get("change")
            .ok_or(Error::MissingField { field: "change" })?
            .to_owned();

        Ok(Self {
            change,
            change_type: record.get("changeType").unwrap_or_default().to_owned(),
            workspace: record.get("client").unwrap_or_default().to_owned(),
            description: record.get("desc").unwrap_or_default().to_owned(),
            status: record.get("status").unwrap_or_default().to_owned(),
            time: record.get("time").unwrap_or_default().to_owned(),
            user: record.get("user").unwrap_or_default().to_owned(),
        })
    }

    /// Numeric change number.
    ///
    /// # Errors
    ///
    /// - Return [`Error::BadChangeNumber`] if the string form does not
    ///   parse as an unsigned integer.
    pub fn number(&self) -> Result<u64> {
        self.change
            .parse::<u64>()
            .map_err(|err| Error::BadChangeNumber {
                number: self.change.clone(),
                source: err,
            })
    }
}

/// Pending changelists of the current user, most recent first.
///
/// Sorted strictly descending by numeric change number. The comparison is
/// numeric, not lexical: `"105"` sorts above `"12"` even though it compares
/// below it as a string.
///
/// # Errors
///
/// - Return [`Error::Session`] if the server query fails.
/// - Return [`Error::MissingField`] or [`Error::BadChangeNumber`] if the
///   server hands back a malformed record.
#[instrument(skip(handle), level = "debug")]
pub fn pending_for_current_user(handle: &SessionHandle) -> Result<Vec<Changelist>> {
    let workspace = handle.workspace();
    let records = handle.run(
        "changes",
        &["--me", "-s", "pending", "-c", workspace.as_str()],
    )?;

    let mut keyed = records
        .iter()
        .map(|record| {
            let changelist = Changelist::from_record(record)?;
            let number = changelist.number()?;
            Ok((number, changelist))
        })
        .collect::<Result<Vec<_>>>()?;

    keyed.sort_by(|a, b| b.0.cmp(&a.0));
    debug!("{} pending changelists", keyed.len());

    Ok(keyed.into_iter().map(|(_, changelist)| changelist).collect())
}

/// True if the given change number is pending for the current user.
///
/// Membership of the string form in the freshly fetched pending set. Each
/// call is a full round trip on purpose; see the module docs.
///
/// # Errors
///
/// - Return [`Error::Session`] if the server query fails.
pub fn has_pending(handle: &SessionHandle, change: &str) -> Result<bool> {
    Ok(pending_for_current_user(handle)?
        .iter()
        .any(|changelist| changelist.change == change))
}

/// Changelist query error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Server query fails.
    #[error(transparent)]
    Session(#[from] crate::session::Error),

    /// Server record lacks a required field.
    #[error("changelist record missing field {field:?}")]
    MissingField { field: &'static str },

    /// Change number does not parse as an integer.
    #[error("changelist number {number:?} is not numeric")]
    BadChangeNumber {
        number: String,
        #[source]
        source: ParseIntError,
    },
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{client::testing::MockClient, session::acquire_with};
    use pretty_assertions::assert_eq;

    fn change_record(number: &str) -> TaggedRecord {
        TaggedRecord::from_iter([
            ("change", number),
            ("changeType", "public"),
            ("client", "jdoe-main"),
            ("desc", "work in progress"),
            ("status", "pending"),
            ("time", "1756000000"),
            ("user", "jdoe"),
        ])
    }

    fn scripted_scope(numbers: &[&str]) -> crate::session::SessionScope {
        let mut client = MockClient::new();
        client.respond("changes", numbers.iter().map(|n| change_record(n)));
        acquire_with(Box::new(client), None).unwrap()
    }

    #[test]
    fn pending_sorts_numerically_descending() {
        let scope = scripted_scope(&["12", "105", "7"]);

        let pending = pending_for_current_user(scope.handle()).unwrap();
        let numbers: Vec<&str> = pending.iter().map(|c| c.change.as_str()).collect();
        assert_eq!(numbers, vec!["105", "12", "7"]);
    }

    #[test]
    fn pending_parses_record_fields() {
        let scope = scripted_scope(&["42"]);

        let pending = pending_for_current_user(scope.handle()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user, "jdoe");
        assert_eq!(pending[0].workspace, "jdoe-main");
        assert_eq!(pending[0].status, "pending");
        assert_eq!(pending[0].number().unwrap(), 42);
    }

    #[test]
    fn has_pending_checks_string_membership() {
        let scope = scripted_scope(&["12", "105", "7"]);

        assert!(has_pending(scope.handle(), "105").unwrap());
        assert!(!has_pending(scope.handle(), "999").unwrap());
    }

    #[test]
    fn has_pending_refetches_every_call() {
        let mut client = MockClient::new();
        client.respond("changes", [change_record("105")]);
        let counts = client.counts();
        let scope = acquire_with(Box::new(client), None).unwrap();
        let runs_before = counts.runs();

        has_pending(scope.handle(), "105").unwrap();
        has_pending(scope.handle(), "105").unwrap();
        assert_eq!(counts.runs() - runs_before, 2);
    }

    #[test]
    fn non_numeric_change_number_is_an_error() {
        let scope = scripted_scope(&["default"]);

        let result = pending_for_current_user(scope.handle());
        assert!(matches!(result, Err(Error::BadChangeNumber { .. })));
    }

    #[test]
    fn record_without_change_is_an_error() {
        let mut client = MockClient::new();
        client.respond(
            "changes",
            [TaggedRecord::from_iter([("user", "jdoe")])],
        );
        let scope = acquire_with(Box::new(client), None).unwrap();

        let result = pending_for_current_user(scope.handle());
        assert!(matches!(
            result,
            Err(Error::MissingField { field: "change" })
        ));
    }
}

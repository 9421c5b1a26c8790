//! Tagged records returned by `p4 -G`.
//!
//! Every dictionary Perforce emits carries a `code` field (`stat`, `info`,
//! `error`, ...). [`RecordSet`] offers typed lookups by that tag so call
//! sites never probe raw dictionaries.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex_lite::Regex;

use super::marshal::Dict;
use crate::errors::P4Error;
use crate::models::ChangelistId;

/// `severity` at or above which an error record means the command failed.
pub const SEVERITY_FAILED: i32 = 3;

/// The `code` tag of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordCode {
    Stat,
    Info,
    Error,
    Text,
    Binary,
    Other(String),
}

impl RecordCode {
    fn parse(s: &str) -> Self {
        match s {
            "stat" => Self::Stat,
            "info" => Self::Info,
            "error" => Self::Error,
            "text" => Self::Text,
            "binary" => Self::Binary,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Stat => "stat",
            Self::Info => "info",
            Self::Error => "error",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for RecordCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single tagged record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub code: RecordCode,
    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new(code: RecordCode) -> Self {
        Self {
            code,
            fields: BTreeMap::new(),
        }
    }

    /// Builder used by tests and fakes.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }

    pub fn from_dict(dict: Dict) -> Self {
        let mut fields: BTreeMap<String, String> = dict
            .into_iter()
            .map(|(k, v)| (k, v.into_string()))
            .collect();
        let code = fields
            .remove("code")
            .map(|c| RecordCode::parse(&c))
            .unwrap_or_else(|| RecordCode::Other(String::new()));
        Self { code, fields }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn require(&self, field: &str) -> Result<&str, P4Error> {
        self.get(field).ok_or_else(|| P4Error::MissingField {
            code: self.code.to_string(),
            field: field.to_string(),
        })
    }

    /// Human-readable text of an `info`/`error` record.
    pub fn data(&self) -> &str {
        self.get("data").map(str::trim).unwrap_or("")
    }

    pub fn severity(&self) -> i32 {
        self.get("severity")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Whether this is an error record reporting a real failure (as opposed
    /// to a warning such as "file(s) not opened on this client").
    pub fn is_failure(&self) -> bool {
        self.code == RecordCode::Error && self.severity() >= SEVERITY_FAILED
    }
}

/// The ordered records of one command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet(pub Vec<Record>);

impl RecordSet {
    pub fn from_dicts(dicts: Vec<Dict>) -> Self {
        Self(dicts.into_iter().map(Record::from_dict).collect())
    }

    pub fn records(&self) -> &[Record] {
        &self.0
    }

    /// The first record tagged `code`, or `EntryNotFound`.
    pub fn first_of_kind(&self, code: RecordCode) -> Result<&Record, P4Error> {
        self.0
            .iter()
            .find(|r| r.code == code)
            .ok_or_else(|| P4Error::EntryNotFound {
                code: code.to_string(),
            })
    }

    /// All records tagged `code`; possibly none.
    pub fn all_of_kind(&self, code: RecordCode) -> impl Iterator<Item = &Record> + '_ {
        self.0.iter().filter(move |r| r.code == code)
    }

    /// All records tagged `code`; `EntryNotFound` when there are none.
    pub fn require_all_of_kind(&self, code: RecordCode) -> Result<Vec<&Record>, P4Error> {
        let label = code.to_string();
        let found: Vec<&Record> = self.all_of_kind(code).collect();
        if found.is_empty() {
            return Err(P4Error::EntryNotFound { code: label });
        }
        Ok(found)
    }

    /// First failure-severity error record, if any.
    pub fn first_failure(&self) -> Option<&Record> {
        self.0.iter().find(|r| r.is_failure())
    }
}

static CREATED_CHANGELIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Change (\d+) created").expect("valid changelist confirmation pattern"));

/// Extract the new changelist number from `p4 change -i` output.
pub fn parse_created_changelist(records: &RecordSet) -> Result<ChangelistId, P4Error> {
    let info = records.first_of_kind(RecordCode::Info)?;
    parse_created_changelist_message(info.data())
}

pub(crate) fn parse_created_changelist_message(message: &str) -> Result<ChangelistId, P4Error> {
    CREATED_CHANGELIST
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| ChangelistId::new(m.as_str()))
        .ok_or_else(|| P4Error::UnexpectedConfirmation(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p4::marshal::{decode_stream, encode_dict};

    fn sample() -> RecordSet {
        RecordSet(vec![
            Record::new(RecordCode::Stat).with("depotFile", "//depot/a.txt"),
            Record::new(RecordCode::Info).with("data", "Change 42 created.\n"),
            Record::new(RecordCode::Stat).with("depotFile", "//depot/b.txt"),
        ])
    }

    #[test]
    fn test_first_and_all_of_kind() {
        let set = sample();
        let first = set.first_of_kind(RecordCode::Stat).unwrap();
        assert_eq!(first.get("depotFile"), Some("//depot/a.txt"));

        let all: Vec<_> = set
            .all_of_kind(RecordCode::Stat)
            .map(|r| r.require("depotFile").unwrap())
            .collect();
        assert_eq!(all, vec!["//depot/a.txt", "//depot/b.txt"]);
    }

    #[test]
    fn test_missing_kind_is_not_found() {
        let set = sample();
        let err = set.first_of_kind(RecordCode::Error).unwrap_err();
        assert!(err.is_not_found());
        assert!(set.require_all_of_kind(RecordCode::Error).is_err());
        assert_eq!(set.all_of_kind(RecordCode::Error).count(), 0);
    }

    #[test]
    fn test_require_missing_field() {
        let rec = Record::new(RecordCode::Stat);
        assert!(matches!(
            rec.require("path"),
            Err(P4Error::MissingField { ref field, .. }) if field == "path"
        ));
    }

    #[test]
    fn test_from_decoded_dict() {
        let bytes = encode_dict(&[("code", "stat"), ("change", "17"), ("desc", "Add foo\n")]);
        let set = RecordSet::from_dicts(decode_stream(&bytes).unwrap());
        let rec = set.first_of_kind(RecordCode::Stat).unwrap();
        assert_eq!(rec.get("change"), Some("17"));
        assert!(rec.get("code").is_none());
    }

    #[test]
    fn test_failure_severity() {
        let warning = Record::new(RecordCode::Error).with("severity", "2");
        let failure = Record::new(RecordCode::Error).with("severity", "3");
        assert!(!warning.is_failure());
        assert!(failure.is_failure());
        assert!(RecordSet(vec![warning.clone()]).first_failure().is_none());
        assert!(RecordSet(vec![warning, failure]).first_failure().is_some());
    }

    #[test]
    fn test_parse_created_changelist() {
        assert_eq!(
            parse_created_changelist(&sample()).unwrap(),
            ChangelistId::new("42")
        );
        assert!(matches!(
            parse_created_changelist_message("Change new updated."),
            Err(P4Error::UnexpectedConfirmation(_))
        ));
        assert!(parse_created_changelist(&RecordSet::default())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_confirmation_pattern_is_shared_across_calls() {
        for n in ["1", "77", "123456"] {
            let message = format!("Change {} created.", n);
            assert_eq!(
                parse_created_changelist_message(&message).unwrap(),
                ChangelistId::new(n)
            );
        }
        assert!(parse_created_changelist_message("Submitting Change 3 created.").is_err());
    }
}

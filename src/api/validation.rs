//! Purpose: Provide a stable validation report for an on-disk state store.
//! Exports: `ValidationReport`, `ValidationStatus`, `ValidationIssue`, `validate_store`.
//! Role: Shared contract for the `doctor` command and embedding applications.
//! Invariants: Validation never writes records; it may only run pending migrations on open.
//! Invariants: A store that cannot be read as a database is reported, not returned as an error.

use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind};
use crate::core::lock::{LockMode, StoreLock};
use crate::core::store::{SqliteStateStore, StateStore, StoreOptions};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ValidationStatus {
    Ok,
    Corrupt,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationReport {
    pub path: PathBuf,
    pub status: ValidationStatus,
    pub schema_version: Option<u32>,
    pub record_count: Option<usize>,
    pub issues: Vec<ValidationIssue>,
    pub issue_count: usize,
    pub remediation_hints: Vec<String>,
}

impl ValidationReport {
    pub fn ok(path: PathBuf) -> Self {
        Self {
            path,
            status: ValidationStatus::Ok,
            schema_version: None,
            record_count: None,
            issues: Vec::new(),
            issue_count: 0,
            remediation_hints: Vec::new(),
        }
    }

    pub fn corrupt(path: PathBuf, issue: ValidationIssue) -> Self {
        Self::ok(path).set_issues(vec![issue])
    }

    pub fn set_issues(mut self, issues: Vec<ValidationIssue>) -> Self {
        self.issue_count = issues.len();
        self.issues = issues;
        if self.issue_count == 0 {
            self.status = ValidationStatus::Ok;
        } else {
            self.status = ValidationStatus::Corrupt;
            self.remediation_hints.push(
                "State store appears corrupt. Move it aside to start fresh; labels are not recoverable from file contents."
                    .to_string(),
            );
        }
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ValidationStatus::Ok
    }
}

/// Opens the store under its exclusive lock and checks schema and page integrity.
pub fn validate_store(store_path: &Path, mode: LockMode) -> Result<ValidationReport, Error> {
    if !store_path.exists() {
        return Err(Error::new(ErrorKind::NotFound)
            .with_message("state store not found")
            .with_path(store_path)
            .with_hint("Nothing has been recorded yet; run `filestate set` first."));
    }

    let _lock = StoreLock::acquire(store_path, mode)?;
    let store = match SqliteStateStore::open(store_path, StoreOptions::default()) {
        Ok(store) => store,
        Err(err) if err.kind() == ErrorKind::Schema => {
            return Ok(ValidationReport::corrupt(
                store_path.to_path_buf(),
                issue("schema", &err.to_string()),
            ));
        }
        Err(err) => return Err(err),
    };

    let issues = store
        .integrity_check()?
        .iter()
        .map(|line| issue("integrity", line))
        .collect();
    let mut report = ValidationReport::ok(store_path.to_path_buf()).set_issues(issues);
    report.schema_version = Some(store.schema_version()?);

    if report.is_ok() {
        let records = store.records()?;
        let pathless = records.iter().filter(|record| record.path.is_none()).count();
        if pathless > 0 {
            report.remediation_hints.push(format!(
                "warning: {pathless} record(s) predate path tracking and are only reachable by identity"
            ));
        }
        report.record_count = Some(records.len());
    }
    Ok(report)
}

fn issue(code: &str, message: &str) -> ValidationIssue {
    ValidationIssue {
        code: code.to_string(),
        message: message.to_string(),
    }
}

use crate::{error::EngineError, status::AchievementStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

pub const STATUS_KEY: &str = "获取状态";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(rename = "获取状态", default)]
    pub status: AchievementStatus,
}

impl ProgressRecord {
    pub fn new(status: AchievementStatus) -> Self {
        Self { status }
    }
}

/// One user's ledger: code -> status record. Keys stay sorted so written
/// documents diff cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserProgress {
    pub entries: BTreeMap<String, ProgressRecord>,
}

/// Outcome of reconciling a ledger against the catalog's codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub added: usize,
    pub dropped: usize,
}

impl UserProgress {
    /// Builds a ledger from a stored document, coercing malformed entries to
    /// `NotStarted`. Each coercion is returned as a soft error.
    pub fn from_value(user: &str, value: Value) -> (Self, Vec<EngineError>) {
        let mut ledger = UserProgress::default();
        let mut repairs = Vec::new();

        let map = match value {
            Value::Object(map) => map,
            other => {
                let repair = EngineError::CorruptLedgerEntry {
                    user: user.to_string(),
                    code: "*".to_string(),
                    detail: format!("expected an object, found {}", kind_of(&other)),
                };
                warn!(user, error = %repair, "ledger replaced with an empty one");
                repairs.push(repair);
                return (ledger, repairs);
            }
        };

        for (code, raw) in map {
            if code.is_empty() {
                continue;
            }
            let parsed = match &raw {
                Value::Object(record) => match record.get(STATUS_KEY).or_else(|| record.get("status")) {
                    None | Some(Value::Null) => Ok(AchievementStatus::NotStarted),
                    Some(Value::String(label)) => AchievementStatus::from_label(label)
                        .ok_or_else(|| format!("unknown status label {label:?}")),
                    Some(other) => Err(format!("status must be a string, found {}", kind_of(other))),
                },
                other => Err(format!("expected a status object, found {}", kind_of(other))),
            };
            let status = match parsed {
                Ok(status) => status,
                Err(detail) => {
                    let repair = EngineError::CorruptLedgerEntry {
                        user: user.to_string(),
                        code: code.clone(),
                        detail,
                    };
                    warn!(user, code = code.as_str(), error = %repair, "ledger entry reset to not started");
                    repairs.push(repair);
                    AchievementStatus::NotStarted
                }
            };
            ledger.entries.insert(code, ProgressRecord::new(status));
        }

        (ledger, repairs)
    }

    pub fn status(&self, code: &str) -> AchievementStatus {
        self.entries
            .get(code)
            .map(|record| record.status)
            .unwrap_or_default()
    }

    pub fn set(&mut self, code: &str, status: AchievementStatus) {
        self.entries
            .insert(code.to_string(), ProgressRecord::new(status));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, status: AchievementStatus) -> usize {
        self.entries
            .values()
            .filter(|record| record.status == status)
            .count()
    }

    /// Adds `NotStarted` for catalog codes the ledger lacks and drops codes
    /// the catalog no longer has.
    pub fn reconcile(&mut self, codes: &HashSet<String>) -> Reconciled {
        let before = self.entries.len();
        self.entries.retain(|code, _| codes.contains(code));
        let dropped = before - self.entries.len();
        let mut added = 0;
        for code in codes {
            if !self.entries.contains_key(code) {
                self.entries.insert(code.clone(), ProgressRecord::default());
                added += 1;
            }
        }
        Reconciled { added, dropped }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

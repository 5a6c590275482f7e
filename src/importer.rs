use crate::{
    catalog::{normalize_version, Achievement, IdentityKey},
    categories::CategoryRegistry,
    error::{EngineError, Result},
    status::AchievementStatus,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{info, warn};

const HIDDEN_MARKER: &str = "「隐藏成就」";
const REWARD_PREFIX: &str = "星声*";
const STATUS_KEYS: [&str; 2] = ["获取状态", "status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// The imported records become the catalog.
    Replace,
    /// Only records not already present are appended.
    Merge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedRecord {
    pub achievement: Achievement,
    pub status: Option<AchievementStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportPayload {
    Records(Vec<ImportedRecord>),
    /// code -> status, for an existing catalog.
    Progress(BTreeMap<String, AchievementStatus>),
}

/// Catalog and statuses to hand to the reencode transaction.
#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub achievements: Vec<Achievement>,
    pub statuses: Vec<(IdentityKey, AchievementStatus)>,
    pub imported: usize,
    pub skipped: usize,
}

/// Recognises an array of records, an object of records keyed by code, or an
/// object of bare status records keyed by code.
pub fn parse_document(value: Value) -> Result<ImportPayload> {
    match value {
        Value::Array(items) => {
            let mut records = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let Value::Object(map) = item else {
                    return Err(EngineError::InvalidDocument(format!(
                        "record {index} is not an object"
                    )));
                };
                records.push(normalize_record(map, None)?);
            }
            non_empty(ImportPayload::Records(records))
        }
        Value::Object(map) if is_progress_only(&map) => {
            let mut progress = BTreeMap::new();
            for (code, value) in map {
                if let Some(status) = value.as_object().and_then(status_of) {
                    progress.insert(code, status);
                }
            }
            non_empty(ImportPayload::Progress(progress))
        }
        Value::Object(map) => {
            let mut records = Vec::with_capacity(map.len());
            for (code, item) in map {
                let Value::Object(fields) = item else {
                    return Err(EngineError::InvalidDocument(format!(
                        "record {code} is not an object"
                    )));
                };
                records.push(normalize_record(fields, Some(&code))?);
            }
            non_empty(ImportPayload::Records(records))
        }
        _ => Err(EngineError::InvalidDocument(
            "expected a list or an object of achievements".to_string(),
        )),
    }
}

fn non_empty(payload: ImportPayload) -> Result<ImportPayload> {
    let empty = match &payload {
        ImportPayload::Records(records) => records.is_empty(),
        ImportPayload::Progress(progress) => progress.is_empty(),
    };
    if empty {
        return Err(EngineError::InvalidDocument("document holds no achievements".to_string()));
    }
    Ok(payload)
}

fn is_progress_only(map: &Map<String, Value>) -> bool {
    !map.is_empty()
        && map.values().all(|value| match value {
            Value::Object(fields) => {
                !fields.is_empty() && fields.keys().all(|key| STATUS_KEYS.contains(&key.as_str()))
            }
            _ => false,
        })
}

fn status_of(fields: &Map<String, Value>) -> Option<AchievementStatus> {
    let raw = STATUS_KEYS.iter().find_map(|key| fields.get(*key))?;
    match raw {
        Value::String(label) => {
            let status = AchievementStatus::from_label(label);
            if status.is_none() {
                warn!(label = label.as_str(), "unknown status label ignored");
            }
            status
        }
        _ => None,
    }
}

/// Maps legacy keys onto the catalog fields and cleans up values.
pub fn normalize_record(fields: Map<String, Value>, code: Option<&str>) -> Result<ImportedRecord> {
    let status = status_of(&fields);
    let mut renamed = Map::new();
    for (key, value) in fields {
        if STATUS_KEYS.contains(&key.as_str()) {
            continue;
        }
        let key = match key.as_str() {
            "is_hidden" => "hidden".to_string(),
            "serial_number" => "code".to_string(),
            "first_category" => "firstCategory".to_string(),
            "second_category" => "secondCategory".to_string(),
            "absolute_ordinal" => "absoluteOrdinal".to_string(),
            "group_id" => "groupId".to_string(),
            "mutex_codes" => "mutexCodes".to_string(),
            _ => key,
        };
        renamed.insert(key, value);
    }
    if let Some(code) = code {
        renamed.insert("code".to_string(), Value::String(code.to_string()));
    }

    let mut achievement: Achievement = serde_json::from_value(Value::Object(renamed))?;
    achievement.name = achievement.name.trim().to_string();
    if achievement.name.contains(HIDDEN_MARKER) {
        achievement.name = achievement.name.replace(HIDDEN_MARKER, "").trim().to_string();
        achievement.hidden = true;
    }
    achievement.description = achievement.description.trim().to_string();
    achievement.version = normalize_version(&achievement.version);
    achievement.first_category = achievement.first_category.trim().to_string();
    achievement.second_category = achievement.second_category.trim().to_string();
    let reward = achievement.reward.trim();
    achievement.reward = if !reward.is_empty() && reward.chars().all(|ch| ch.is_ascii_digit()) {
        format!("{REWARD_PREFIX}{reward}")
    } else {
        reward.to_string()
    };

    Ok(ImportedRecord { achievement, status })
}

/// Fills a missing first category from the registry's reverse lookup. Every
/// second category that cannot be placed is reported at once.
pub fn resolve_categories(records: &mut [ImportedRecord], registry: &CategoryRegistry) -> Result<()> {
    let mut missing = BTreeSet::new();
    for record in records.iter_mut() {
        let entry = &mut record.achievement;
        if !entry.first_category.is_empty() || entry.second_category.is_empty() {
            continue;
        }
        match registry.first_category_for_second(&entry.second_category) {
            Some(first) => entry.first_category = first.to_string(),
            None => {
                missing.insert(entry.second_category.clone());
            }
        }
    }
    if missing.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = missing.into_iter().collect();
    warn!(missing = ?names, "import aborted on unmapped categories");
    Err(EngineError::MissingCategory { names })
}

/// Description with trailing punctuation removed, for duplicate detection.
pub fn clean_description(description: &str) -> &str {
    description
        .trim()
        .trim_end_matches(|ch: char| {
            matches!(ch, '.' | ',' | '…' | '。' | '，' | '；' | '：' | '！' | '？' | '、')
        })
        .trim_end()
}

fn merge_key(entry: &Achievement) -> (String, String) {
    (entry.name.clone(), clean_description(&entry.description).to_string())
}

pub fn plan_import(
    existing: &[Achievement],
    mut records: Vec<ImportedRecord>,
    mode: ImportMode,
    registry: &CategoryRegistry,
) -> Result<ImportPlan> {
    resolve_categories(&mut records, registry)?;

    let total = records.len();
    let (achievements, accepted) = match mode {
        ImportMode::Replace => {
            let achievements = records
                .iter()
                .map(|record| record.achievement.clone())
                .collect();
            (achievements, records)
        }
        ImportMode::Merge => {
            let mut seen: HashSet<(String, String)> = existing.iter().map(merge_key).collect();
            let mut accepted = Vec::new();
            for mut record in records {
                if !seen.insert(merge_key(&record.achievement)) {
                    continue;
                }
                record.achievement.code.clear();
                record.achievement.clear_group();
                accepted.push(record);
            }
            let mut achievements = existing.to_vec();
            achievements.extend(accepted.iter().map(|record| record.achievement.clone()));
            (achievements, accepted)
        }
    };

    let statuses = accepted
        .iter()
        .filter_map(|record| record.status.map(|status| (record.achievement.identity(), status)))
        .collect();
    let imported = accepted.len();
    info!(?mode, imported, skipped = total - imported, "import planned");
    Ok(ImportPlan {
        achievements,
        statuses,
        imported,
        skipped: total - imported,
    })
}

//! Mutually exclusive achievement groups and the status state machine.
//!
//! Group membership is read from `group_id` on catalog entries; `mutex_codes`
//! is only ever derived from it. Completing one member locks every other
//! member, and resetting any member of a group resets the whole group.

use crate::{
    catalog::{group_members, Achievement},
    error::{EngineError, Result},
    progress::UserProgress,
    status::AchievementStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

/// Caller intent behind a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusIntent {
    Complete,
    Reset,
    MarkUnavailable,
    ClearUnavailable,
    /// Complete when not started, otherwise reset.
    Toggle,
}

impl StatusIntent {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "complete" => Some(StatusIntent::Complete),
            "reset" => Some(StatusIntent::Reset),
            "unavailable" | "mark-unavailable" => Some(StatusIntent::MarkUnavailable),
            "available" | "clear-unavailable" => Some(StatusIntent::ClearUnavailable),
            "toggle" => Some(StatusIntent::Toggle),
            _ => None,
        }
    }

    fn resolve(self, current: AchievementStatus) -> Transition {
        match self {
            StatusIntent::Complete => Transition::Complete,
            StatusIntent::Reset => Transition::Reset,
            StatusIntent::MarkUnavailable => Transition::MarkUnavailable,
            StatusIntent::ClearUnavailable => Transition::ClearUnavailable,
            StatusIntent::Toggle if current == AchievementStatus::NotStarted => {
                Transition::Complete
            }
            StatusIntent::Toggle => Transition::Reset,
        }
    }
}

/// A `StatusIntent` with `Toggle` resolved against the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Complete,
    Reset,
    MarkUnavailable,
    ClearUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub code: String,
    pub from: AchievementStatus,
    pub to: AchievementStatus,
}

/// Applies `intent` to `code` and returns every ledger entry that changed.
pub fn apply_transition(
    catalog: &[Achievement],
    ledger: &mut UserProgress,
    code: &str,
    intent: StatusIntent,
) -> Result<Vec<StatusChange>> {
    let entry = catalog
        .iter()
        .find(|entry| entry.has_code() && entry.code == code)
        .ok_or_else(|| EngineError::UnknownAchievement(code.to_string()))?;
    let current = ledger.status(code);
    let transition = intent.resolve(current);

    let mut changes = Vec::new();
    match transition {
        Transition::Complete => {
            set(ledger, code, AchievementStatus::Completed, &mut changes);
            for member in members_of(catalog, entry) {
                if member != code {
                    set(ledger, &member, AchievementStatus::Locked, &mut changes);
                }
            }
        }
        Transition::Reset => match current {
            AchievementStatus::Completed | AchievementStatus::Locked => {
                let members = members_of(catalog, entry);
                if members.is_empty() {
                    set(ledger, code, AchievementStatus::NotStarted, &mut changes);
                } else {
                    for member in members {
                        set(ledger, &member, AchievementStatus::NotStarted, &mut changes);
                    }
                }
            }
            AchievementStatus::Unavailable => {
                set(ledger, code, AchievementStatus::NotStarted, &mut changes);
            }
            AchievementStatus::NotStarted => {}
        },
        Transition::MarkUnavailable => {
            set(ledger, code, AchievementStatus::Unavailable, &mut changes);
        }
        Transition::ClearUnavailable => {
            set(ledger, code, AchievementStatus::NotStarted, &mut changes);
        }
    }

    debug!(code, ?intent, ?transition, changed = changes.len(), "status transition applied");
    Ok(changes)
}

/// Replaces the membership of `group_id` with `codes`, moving codes out of any
/// group they were in. Returns the ids of groups dissolved as a result.
pub fn set_group_membership(
    group_id: &str,
    codes: &[String],
    catalog: &mut [Achievement],
) -> Result<Vec<String>> {
    let known: HashSet<&str> = catalog
        .iter()
        .filter(|entry| entry.has_code())
        .map(|entry| entry.code.as_str())
        .collect();
    if let Some(missing) = codes.iter().find(|code| !known.contains(code.as_str())) {
        return Err(EngineError::UnknownAchievement(missing.clone()));
    }

    let wanted: HashSet<&str> = codes.iter().map(String::as_str).collect();
    for entry in catalog.iter_mut() {
        if wanted.contains(entry.code.as_str()) {
            entry.group_id = Some(group_id.to_string());
        } else if entry.group() == Some(group_id) {
            entry.clear_group();
        }
    }

    let dissolved = normalize_groups(catalog);
    info!(group = group_id, members = wanted.len(), dissolved = dissolved.len(), "group membership set");
    Ok(dissolved)
}

pub fn dissolve_group(group_id: &str, catalog: &mut [Achievement]) -> usize {
    let mut cleared = 0;
    for entry in catalog.iter_mut() {
        if entry.group() == Some(group_id) {
            entry.clear_group();
            cleared += 1;
        }
    }
    cleared
}

/// Recomputes `mutex_codes` from current codes and dissolves groups that no
/// longer have two coded members. Returns the dissolved group ids.
pub fn normalize_groups(catalog: &mut [Achievement]) -> Vec<String> {
    for entry in catalog.iter_mut() {
        if entry.group_id.as_deref() == Some("") || (entry.group().is_some() && !entry.has_code()) {
            entry.clear_group();
        }
    }

    let groups = group_members(catalog);
    let mut dissolved = Vec::new();
    for (group_id, members) in &groups {
        if members.len() <= 1 {
            dissolve_group(group_id, catalog);
            info!(group = group_id.as_str(), "group dissolved");
            dissolved.push(group_id.clone());
            continue;
        }
        for entry in catalog.iter_mut() {
            if entry.group() == Some(group_id.as_str()) {
                let others: Vec<String> = members
                    .iter()
                    .filter(|member| **member != entry.code)
                    .cloned()
                    .collect();
                entry.mutex_codes = Some(others);
            }
        }
    }
    for entry in catalog.iter_mut() {
        if entry.group().is_none() && entry.mutex_codes.is_some() {
            entry.mutex_codes = None;
        }
    }
    dissolved
}

/// Restores the group invariants in a ledger: one completed member locks the
/// rest, a lock without a completed member is released, and ungrouped codes
/// are never locked.
pub fn repair_ledger(catalog: &[Achievement], ledger: &mut UserProgress) -> Vec<StatusChange> {
    let mut changes = Vec::new();
    let groups = group_members(catalog);
    let grouped: HashSet<&str> = groups
        .values()
        .flat_map(|members| members.iter().map(String::as_str))
        .collect();

    for members in groups.values() {
        let sorted: BTreeSet<&String> = members.iter().collect();
        let winner = sorted
            .iter()
            .find(|code| ledger.status(code) == AchievementStatus::Completed)
            .map(|code| code.to_string());
        match winner {
            Some(winner) => {
                for member in members {
                    if *member != winner {
                        set(ledger, member, AchievementStatus::Locked, &mut changes);
                    }
                }
            }
            None => {
                for member in members {
                    if ledger.status(member) == AchievementStatus::Locked {
                        set(ledger, member, AchievementStatus::NotStarted, &mut changes);
                    }
                }
            }
        }
    }

    let stray: Vec<String> = ledger
        .entries
        .iter()
        .filter(|(code, record)| {
            record.status == AchievementStatus::Locked && !grouped.contains(code.as_str())
        })
        .map(|(code, _)| code.clone())
        .collect();
    for code in stray {
        set(ledger, &code, AchievementStatus::NotStarted, &mut changes);
    }

    if !changes.is_empty() {
        info!(repaired = changes.len(), "ledger group invariants repaired");
    }
    changes
}

/// Smallest unused `group_NNN` id.
pub fn next_group_id(catalog: &[Achievement]) -> String {
    let used: HashSet<u32> = catalog
        .iter()
        .filter_map(|entry| entry.group())
        .filter_map(|id| id.strip_prefix("group_"))
        .filter_map(|number| number.parse::<u32>().ok())
        .collect();
    let mut next = 1;
    while used.contains(&next) {
        next += 1;
    }
    format!("group_{next:03}")
}

fn members_of(catalog: &[Achievement], entry: &Achievement) -> Vec<String> {
    let Some(group_id) = entry.group() else {
        return Vec::new();
    };
    catalog
        .iter()
        .filter(|member| member.has_code() && member.group() == Some(group_id))
        .map(|member| member.code.clone())
        .collect()
}

fn set(
    ledger: &mut UserProgress,
    code: &str,
    status: AchievementStatus,
    changes: &mut Vec<StatusChange>,
) {
    let from = ledger.status(code);
    let present = ledger.entries.contains_key(code);
    if from == status && present {
        return;
    }
    ledger.set(code, status);
    if from != status {
        changes.push(StatusChange {
            code: code.to_string(),
            from,
            to: status,
        });
    }
}

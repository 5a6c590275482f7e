use crate::{
    catalog::{major_version, Achievement},
    progress::UserProgress,
    status::AchievementStatus,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HiddenFilter {
    #[default]
    All,
    Only,
    Exclude,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Availability {
    #[default]
    All,
    Obtainable,
    Unavailable,
    GroupsOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListOrder {
    #[default]
    Ordinal,
    IncompleteFirst,
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub search: Option<String>,
    pub version: Option<String>,
    /// Major version number, matched against `<major>.x`.
    pub major: Option<String>,
    pub first_category: Option<String>,
    pub second_category: Option<String>,
    pub hidden: HiddenFilter,
    pub availability: Availability,
    pub order: ListOrder,
}

impl Filter {
    pub fn matches(&self, entry: &Achievement, status: AchievementStatus) -> bool {
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            if !entry.name.to_lowercase().contains(&needle)
                && !entry.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        if let Some(version) = self.version.as_deref() {
            if entry.version != version.trim() {
                return false;
            }
        }
        if let Some(major) = self.major.as_deref() {
            if entry.major_version() != major_version(major) {
                return false;
            }
        }
        if let Some(first) = self.first_category.as_deref() {
            if entry.first_category != first {
                return false;
            }
        }
        if let Some(second) = self.second_category.as_deref() {
            if entry.second_category != second {
                return false;
            }
        }
        let hidden_ok = match self.hidden {
            HiddenFilter::All => true,
            HiddenFilter::Only => entry.hidden,
            HiddenFilter::Exclude => !entry.hidden,
        };
        if !hidden_ok {
            return false;
        }
        match self.availability {
            Availability::All => true,
            Availability::Obtainable => status != AchievementStatus::Unavailable,
            Availability::Unavailable => status == AchievementStatus::Unavailable,
            Availability::GroupsOnly => entry.group().is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    pub achievement: &'a Achievement,
    pub status: AchievementStatus,
}

pub fn filter<'a>(catalog: &'a [Achievement], ledger: &UserProgress, filter: &Filter) -> Vec<Row<'a>> {
    let mut rows: Vec<Row<'a>> = catalog
        .iter()
        .map(|achievement| Row {
            achievement,
            status: ledger.status(&achievement.code),
        })
        .filter(|row| filter.matches(row.achievement, row.status))
        .collect();
    rows.sort_by_key(|row| {
        let bucket = match filter.order {
            ListOrder::Ordinal => 0,
            ListOrder::IncompleteFirst => incomplete_rank(row.status),
        };
        (bucket, row.achievement.absolute_ordinal)
    });
    rows
}

fn incomplete_rank(status: AchievementStatus) -> u8 {
    match status {
        AchievementStatus::NotStarted => 0,
        AchievementStatus::Unavailable => 1,
        AchievementStatus::Locked => 2,
        AchievementStatus::Completed => 3,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub completed: usize,
    pub not_started: usize,
    pub unavailable: usize,
    pub hidden: usize,
    pub groups: usize,
    pub completion_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakdown {
    pub label: String,
    pub total: usize,
    pub completed: usize,
    pub completion_rate: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub summary: Summary,
    pub by_category: Vec<Breakdown>,
    pub by_version: Vec<Breakdown>,
}

/// A counting unit: a lone achievement, or a whole group collapsed into one.
struct Unit<'a> {
    lead: &'a Achievement,
    status: AchievementStatus,
    hidden: bool,
    grouped: bool,
}

fn units<'a>(entries: &[&'a Achievement], ledger: &UserProgress) -> Vec<Unit<'a>> {
    let mut out: Vec<Unit<'a>> = Vec::new();
    let mut slots: HashMap<&'a str, usize> = HashMap::new();
    for &entry in entries {
        let status = ledger.status(&entry.code);
        let Some(group_id) = entry.group() else {
            let status = match status {
                AchievementStatus::Locked => AchievementStatus::NotStarted,
                other => other,
            };
            out.push(Unit {
                lead: entry,
                status,
                hidden: entry.hidden,
                grouped: false,
            });
            continue;
        };
        match slots.get(group_id) {
            Some(&slot) => {
                let unit = &mut out[slot];
                unit.status = group_precedence(unit.status, status);
                unit.hidden |= entry.hidden;
            }
            None => {
                slots.insert(group_id, out.len());
                out.push(Unit {
                    lead: entry,
                    status: group_precedence(AchievementStatus::NotStarted, status),
                    hidden: entry.hidden,
                    grouped: true,
                });
            }
        }
    }
    out
}

/// Completed beats Unavailable beats everything else.
fn group_precedence(current: AchievementStatus, member: AchievementStatus) -> AchievementStatus {
    match (current, member) {
        (AchievementStatus::Completed, _) | (_, AchievementStatus::Completed) => {
            AchievementStatus::Completed
        }
        (AchievementStatus::Unavailable, _) | (_, AchievementStatus::Unavailable) => {
            AchievementStatus::Unavailable
        }
        _ => AchievementStatus::NotStarted,
    }
}

pub fn completion_rate(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (completed * 100 / total) as u32
}

pub fn summarize(entries: &[&Achievement], ledger: &UserProgress) -> Summary {
    let units = units(entries, ledger);
    let mut summary = Summary {
        total: units.len(),
        ..Summary::default()
    };
    for unit in &units {
        match unit.status {
            AchievementStatus::Completed => summary.completed += 1,
            AchievementStatus::Unavailable => summary.unavailable += 1,
            _ => summary.not_started += 1,
        }
        if unit.hidden {
            summary.hidden += 1;
        }
        if unit.grouped {
            summary.groups += 1;
        }
    }
    summary.completion_rate = completion_rate(summary.completed, summary.total);
    summary
}

/// Group-aware summary plus per first category and per major version
/// breakdowns. Categories keep catalog order; versions sort numerically.
pub fn report(entries: &[&Achievement], ledger: &UserProgress) -> Report {
    let units = units(entries, ledger);

    let mut by_category: Vec<Breakdown> = Vec::new();
    let mut category_slots: HashMap<String, usize> = HashMap::new();
    let mut by_version: BTreeMap<(u64, String), Breakdown> = BTreeMap::new();
    for unit in &units {
        let completed = unit.status == AchievementStatus::Completed;

        let category = if unit.lead.first_category.is_empty() {
            "unknown".to_string()
        } else {
            unit.lead.first_category.clone()
        };
        let slot = *category_slots.entry(category.clone()).or_insert_with(|| {
            by_category.push(Breakdown::empty(category));
            by_category.len() - 1
        });
        by_category[slot].add(completed);

        let major = unit.lead.major_version();
        let sort = major
            .trim_end_matches(".x")
            .parse::<u64>()
            .unwrap_or(u64::MAX);
        by_version
            .entry((sort, major.clone()))
            .or_insert_with(|| Breakdown::empty(major))
            .add(completed);
    }

    for breakdown in by_category.iter_mut() {
        breakdown.finish();
    }
    let by_version = by_version
        .into_values()
        .map(|mut breakdown| {
            breakdown.finish();
            breakdown
        })
        .collect();

    Report {
        summary: summarize(entries, ledger),
        by_category,
        by_version,
    }
}

impl Breakdown {
    fn empty(label: String) -> Self {
        Self {
            label,
            total: 0,
            completed: 0,
            completion_rate: 0,
        }
    }

    fn add(&mut self, completed: bool) {
        self.total += 1;
        if completed {
            self.completed += 1;
        }
    }

    fn finish(&mut self) {
        self.completion_rate = completion_rate(self.completed, self.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(code: &str, first: &str, version: &str, group: Option<&str>) -> Achievement {
        let mut entry = Achievement::new(code, first, "S", version);
        entry.code = code.to_string();
        entry.description = format!("about {code}");
        entry.group_id = group.map(str::to_string);
        entry
    }

    fn catalog() -> Vec<Achievement> {
        let mut catalog = vec![
            entry("1", "A", "1.0", Some("group_001")),
            entry("2", "A", "1.2", Some("group_001")),
            entry("3", "A", "2.0", None),
            entry("4", "B", "2.1", None),
            entry("5", "B", "10.0", None),
        ];
        for (index, entry) in catalog.iter_mut().enumerate() {
            entry.absolute_ordinal = index as u32 + 1;
        }
        catalog[4].hidden = true;
        catalog
    }

    fn ledger() -> UserProgress {
        let mut ledger = UserProgress::default();
        ledger.set("1", AchievementStatus::Completed);
        ledger.set("2", AchievementStatus::Locked);
        ledger.set("4", AchievementStatus::Unavailable);
        ledger
    }

    #[test]
    fn groups_count_once() {
        let catalog = catalog();
        let entries: Vec<&Achievement> = catalog.iter().collect();
        let summary = summarize(&entries, &ledger());
        assert_eq!(summary.total, 4);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.unavailable, 1);
        assert_eq!(summary.not_started, 2);
        assert_eq!(summary.groups, 1);
        assert_eq!(summary.hidden, 1);
        assert_eq!(summary.completion_rate, 25);
    }

    #[test]
    fn group_with_locked_member_only_is_not_started() {
        let catalog = catalog();
        let entries: Vec<&Achievement> = catalog.iter().collect();
        let mut ledger = UserProgress::default();
        ledger.set("2", AchievementStatus::Locked);
        let summary = summarize(&entries, &ledger);
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.not_started, 4);
    }

    #[test]
    fn breakdowns_collapse_groups() {
        let catalog = catalog();
        let entries: Vec<&Achievement> = catalog.iter().collect();
        let report = report(&entries, &ledger());
        assert_eq!(report.by_category[0].label, "A");
        assert_eq!(report.by_category[0].total, 2);
        assert_eq!(report.by_category[0].completion_rate, 50);
        let versions: Vec<&str> = report.by_version.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(versions, vec!["1.x", "2.x", "10.x"]);
    }

    fn codes(rows: Vec<Row<'_>>) -> Vec<&str> {
        rows.iter().map(|row| row.achievement.code.as_str()).collect()
    }

    #[test]
    fn version_filter_is_exact() {
        let catalog = catalog();
        let ledger = ledger();
        let exact = Filter {
            version: Some("2.1".to_string()),
            ..Filter::default()
        };
        assert_eq!(codes(filter(&catalog, &ledger, &exact)), vec!["4"]);

        let missing = Filter {
            version: Some("2".to_string()),
            ..Filter::default()
        };
        assert!(filter(&catalog, &ledger, &missing).is_empty());
    }

    #[test]
    fn major_filter_and_search() {
        let catalog = catalog();
        let ledger = ledger();
        let by_major = Filter {
            major: Some("2".to_string()),
            ..Filter::default()
        };
        assert_eq!(codes(filter(&catalog, &ledger, &by_major)), vec!["3", "4"]);

        let search = Filter {
            search: Some("ABOUT 5".to_string()),
            ..Filter::default()
        };
        assert_eq!(filter(&catalog, &ledger, &search).len(), 1);
    }

    #[test]
    fn incomplete_first_ordering() {
        let catalog = catalog();
        let order = Filter {
            order: ListOrder::IncompleteFirst,
            availability: Availability::Obtainable,
            ..Filter::default()
        };
        let codes: Vec<&str> = filter(&catalog, &ledger(), &order)
            .iter()
            .map(|row| row.achievement.code.as_str())
            .collect();
        assert_eq!(codes, vec!["3", "5", "2", "1"]);
    }

    #[test]
    fn empty_rate_is_zero() {
        assert_eq!(completion_rate(0, 0), 0);
        assert_eq!(completion_rate(2, 3), 66);
    }
}

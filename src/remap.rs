use crate::{
    catalog::{Achievement, IdentityKey},
    error::EngineError,
    progress::{Reconciled, UserProgress},
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

/// How one generation's codes translate into the next one's.
#[derive(Debug, Clone, Default)]
pub struct CodeMapping {
    /// old code -> new code, only where the code changed.
    pub renamed: BTreeMap<String, String>,
    /// Old codes whose achievement kept its code.
    retained: HashSet<String>,
    /// Old codes whose achievement left the catalog.
    retired: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Mapped(String),
    Retired,
    Passthrough,
}

impl CodeMapping {
    /// Correlates both catalogs by `(name, first, second)`. Duplicate identities
    /// resolve last-wins and are returned as soft errors.
    pub fn build(old: &[Achievement], new: &[Achievement]) -> (Self, Vec<EngineError>) {
        let mut ambiguities = Vec::new();
        collect_ambiguities(old, &mut ambiguities);
        collect_ambiguities(new, &mut ambiguities);

        let old_by_identity = codes_by_identity(old);
        let new_by_identity = codes_by_identity(new);

        let mut mapping = CodeMapping::default();
        for (key, old_code) in &old_by_identity {
            match new_by_identity.get(key) {
                Some(new_code) if new_code == old_code => {
                    mapping.retained.insert(old_code.to_string());
                }
                Some(new_code) => {
                    mapping
                        .renamed
                        .insert(old_code.to_string(), new_code.to_string());
                }
                None => {}
            }
        }

        // Codes shadowed by a later duplicate fall through to passthrough.
        for entry in old.iter().filter(|entry| entry.has_code()) {
            if !new_by_identity.contains_key(&entry.identity()) {
                mapping.retired.insert(entry.code.clone());
            }
        }

        (mapping, ambiguities)
    }

    pub fn is_identity(&self) -> bool {
        self.renamed.is_empty() && self.retired.is_empty()
    }

    fn resolve(&self, old_code: &str) -> Resolution {
        if let Some(new_code) = self.renamed.get(old_code) {
            return Resolution::Mapped(new_code.clone());
        }
        if self.retained.contains(old_code) {
            return Resolution::Mapped(old_code.to_string());
        }
        if self.retired.contains(old_code) {
            return Resolution::Retired;
        }
        Resolution::Passthrough
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserRemapStats {
    pub renamed: usize,
    pub retired: usize,
    pub added: usize,
    pub dropped: usize,
}

#[derive(Debug, Default)]
pub struct RemapReport {
    pub renamed: BTreeMap<String, String>,
    pub users: BTreeMap<String, UserRemapStats>,
    pub ambiguities: Vec<EngineError>,
}

/// Translates one ledger into the new generation's codes.
///
/// Entries whose achievement is known carry over by identity. Codes the old
/// catalog never had pass through unchanged but never overwrite a carried
/// entry. The result holds exactly the new catalog's codes.
pub fn remap_ledger(
    ledger: &UserProgress,
    mapping: &CodeMapping,
    new_codes: &HashSet<String>,
) -> (UserProgress, UserRemapStats) {
    let mut stats = UserRemapStats::default();
    let mut out = UserProgress::default();
    let mut carried = Vec::new();

    for (old_code, record) in &ledger.entries {
        match mapping.resolve(old_code) {
            Resolution::Passthrough => {
                out.entries.insert(old_code.clone(), *record);
            }
            Resolution::Retired => stats.retired += 1,
            Resolution::Mapped(new_code) => {
                if new_code != *old_code {
                    stats.renamed += 1;
                }
                carried.push((new_code, *record));
            }
        }
    }
    for (new_code, record) in carried {
        out.entries.insert(new_code, record);
    }

    let Reconciled { added, dropped } = out.reconcile(new_codes);
    stats.added = added;
    stats.dropped = dropped;
    (out, stats)
}

/// Remaps every user's ledger from `old` catalog codes to `new` catalog codes.
pub fn remap_all_users(
    old: &[Achievement],
    new: &[Achievement],
    ledgers: BTreeMap<String, UserProgress>,
) -> (BTreeMap<String, UserProgress>, RemapReport) {
    let (mapping, ambiguities) = CodeMapping::build(old, new);
    for ambiguity in &ambiguities {
        warn!(error = %ambiguity, "identity shared by several achievements; last one wins");
    }

    let new_codes: HashSet<String> = new
        .iter()
        .filter(|entry| entry.has_code())
        .map(|entry| entry.code.clone())
        .collect();

    let mut report = RemapReport {
        renamed: mapping.renamed.clone(),
        users: BTreeMap::new(),
        ambiguities,
    };
    let mut out = BTreeMap::new();
    for (user, ledger) in ledgers {
        let (remapped, stats) = remap_ledger(&ledger, &mapping, &new_codes);
        info!(
            user = user.as_str(),
            renamed = stats.renamed,
            retired = stats.retired,
            added = stats.added,
            dropped = stats.dropped,
            "ledger remapped"
        );
        report.users.insert(user.clone(), stats);
        out.insert(user, remapped);
    }
    (out, report)
}

/// Last entry wins for a shared identity.
fn codes_by_identity(achievements: &[Achievement]) -> HashMap<IdentityKey, &str> {
    achievements
        .iter()
        .filter(|entry| entry.has_code())
        .map(|entry| (entry.identity(), entry.code.as_str()))
        .collect()
}

fn collect_ambiguities(achievements: &[Achievement], out: &mut Vec<EngineError>) {
    let mut seen: BTreeMap<IdentityKey, Vec<String>> = BTreeMap::new();
    for entry in achievements.iter().filter(|entry| entry.has_code()) {
        seen.entry(entry.identity())
            .or_default()
            .push(entry.code.clone());
    }
    for (key, codes) in seen {
        if codes.len() < 2 {
            continue;
        }
        let duplicate = out.iter().any(|existing| match existing {
            EngineError::AmbiguousIdentity {
                name,
                first_category,
                second_category,
                ..
            } => {
                *name == key.name
                    && *first_category == key.first_category
                    && *second_category == key.second_category
            }
            _ => false,
        });
        if duplicate {
            continue;
        }
        out.push(EngineError::AmbiguousIdentity {
            name: key.name,
            first_category: key.first_category,
            second_category: key.second_category,
            codes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{categories::CategoryRegistry, encode::reencode, status::AchievementStatus};

    fn registry() -> CategoryRegistry {
        let mut registry = CategoryRegistry::empty();
        registry.add_first("A", Some(1));
        registry.add_first("B", Some(2));
        registry.add_second("A", "X", Some(10)).expect("A/X");
        registry.add_second("B", "X", Some(10)).expect("B/X");
        registry
    }

    fn catalog(registry: &mut CategoryRegistry) -> Vec<Achievement> {
        reencode(
            vec![
                Achievement::new("a1", "A", "X", "1.0"),
                Achievement::new("a2", "A", "X", "1.1"),
                Achievement::new("b1", "B", "X", "1.0"),
            ],
            registry,
        )
        .achievements
    }

    fn code_of<'a>(catalog: &'a [Achievement], name: &str) -> &'a str {
        catalog
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.code.as_str())
            .expect("entry")
    }

    #[test]
    fn swapped_ranks_keep_statuses() {
        let mut registry = registry();
        let old = catalog(&mut registry);
        let mut ledger = UserProgress::default();
        ledger.set(code_of(&old, "a1"), AchievementStatus::Completed);
        ledger.set(code_of(&old, "b1"), AchievementStatus::Unavailable);
        let mut ledgers = BTreeMap::new();
        ledgers.insert("Default".to_string(), ledger);

        registry.set_rank("A", 2).expect("A");
        registry.set_rank("B", 1).expect("B");
        let new = reencode(old.clone(), &mut registry).achievements;
        let (remapped, report) = remap_all_users(&old, &new, ledgers);

        let ledger = &remapped["Default"];
        assert_eq!(code_of(&new, "a1"), "20100001");
        assert_eq!(ledger.status("20100001"), AchievementStatus::Completed);
        assert_eq!(ledger.status(code_of(&new, "b1")), AchievementStatus::Unavailable);
        assert_eq!(ledger.status(code_of(&new, "a2")), AchievementStatus::NotStarted);
        assert_eq!(ledger.len(), 3);
        assert_eq!(report.renamed.len(), 3);
        assert!(report.ambiguities.is_empty());
    }

    #[test]
    fn reordering_conserves_completed_count() {
        let mut registry = registry();
        let old = catalog(&mut registry);
        let mut ledgers = BTreeMap::new();
        for (user, names) in [("one", vec!["a1", "b1"]), ("two", vec!["a2"])] {
            let mut ledger = UserProgress::default();
            for name in names {
                ledger.set(code_of(&old, name), AchievementStatus::Completed);
            }
            ledgers.insert(user.to_string(), ledger);
        }
        let before: usize = ledgers
            .values()
            .map(|ledger| ledger.count(AchievementStatus::Completed))
            .sum();

        registry.move_down("A").expect("move");
        let new = reencode(old.clone(), &mut registry).achievements;
        let (remapped, _) = remap_all_users(&old, &new, ledgers);
        let after: usize = remapped
            .values()
            .map(|ledger| ledger.count(AchievementStatus::Completed))
            .sum();
        assert_eq!(before, after);
    }

    #[test]
    fn removed_achievement_does_not_leak_into_reused_code() {
        let mut registry = registry();
        let old = catalog(&mut registry);
        let mut ledger = UserProgress::default();
        ledger.set(code_of(&old, "a1"), AchievementStatus::Completed);

        let remaining: Vec<Achievement> = old
            .iter()
            .filter(|entry| entry.name != "a1")
            .cloned()
            .collect();
        let new = reencode(remaining, &mut registry).achievements;
        assert_eq!(code_of(&new, "a2"), "10100001");

        let mut ledgers = BTreeMap::new();
        ledgers.insert("Default".to_string(), ledger);
        let (remapped, report) = remap_all_users(&old, &new, ledgers);
        let ledger = &remapped["Default"];
        assert_eq!(ledger.status("10100001"), AchievementStatus::NotStarted);
        assert_eq!(report.users["Default"].retired, 1);
    }

    #[test]
    fn unknown_ledger_codes_pass_through_then_prune() {
        let mut registry = registry();
        let old = catalog(&mut registry);
        let mut ledger = UserProgress::default();
        ledger.set("99990001", AchievementStatus::Completed);
        ledger.set(code_of(&old, "b1"), AchievementStatus::Completed);
        let mut ledgers = BTreeMap::new();
        ledgers.insert("Default".to_string(), ledger);

        let (remapped, report) = remap_all_users(&old, &old, ledgers);
        let ledger = &remapped["Default"];
        assert!(!ledger.entries.contains_key("99990001"));
        assert_eq!(ledger.status(code_of(&old, "b1")), AchievementStatus::Completed);
        assert_eq!(report.users["Default"].dropped, 1);
        assert_eq!(report.users["Default"].added, 2);
    }

    fn twins(registry: &mut CategoryRegistry) -> Vec<Achievement> {
        reencode(
            vec![
                Achievement::new("twin", "A", "X", "1.0"),
                Achievement::new("twin", "A", "X", "1.1"),
                Achievement::new("b1", "B", "X", "1.0"),
            ],
            registry,
        )
        .achievements
    }

    #[test]
    fn duplicate_identities_keep_statuses_when_codes_hold() {
        let mut registry = registry();
        let old = twins(&mut registry);
        let mut ledger = UserProgress::default();
        ledger.set("10100001", AchievementStatus::Completed);
        ledger.set("10100002", AchievementStatus::Unavailable);
        let mut ledgers = BTreeMap::new();
        ledgers.insert("Default".to_string(), ledger);

        registry.add_first("Spare", None);
        let new = reencode(old.clone(), &mut registry).achievements;
        assert_eq!(code_of(&new, "twin"), "10100001");

        let (remapped, report) = remap_all_users(&old, &new, ledgers);
        assert_eq!(report.ambiguities.len(), 1);
        assert!(report.ambiguities[0].is_soft());
        assert!(report.renamed.is_empty());
        let ledger = &remapped["Default"];
        assert_eq!(ledger.status("10100001"), AchievementStatus::Completed);
        assert_eq!(ledger.status("10100002"), AchievementStatus::Unavailable);
        assert_eq!(report.users["Default"].retired, 0);
    }

    #[test]
    fn duplicate_identities_map_last_entry_only() {
        let mut registry = registry();
        let old = twins(&mut registry);
        let (mapping, _) = CodeMapping::build(&old, &old);
        assert!(mapping.is_identity());
        assert_eq!(
            mapping.resolve("10100002"),
            Resolution::Mapped("10100002".to_string())
        );
        assert_eq!(mapping.resolve("10100001"), Resolution::Passthrough);
    }

    #[test]
    fn unchanged_catalog_maps_to_itself() {
        let mut registry = registry();
        let old = catalog(&mut registry);
        let (mapping, _) = CodeMapping::build(&old, &old);
        assert!(mapping.is_identity());
    }
}

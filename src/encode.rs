use crate::{
    catalog::{Achievement, IdentityKey},
    categories::{Allocation, CategoryRegistry},
};
use std::{cmp::Ordering, collections::HashMap};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Reencoded {
    /// Catalog in canonical order with fresh codes and ordinals.
    pub achievements: Vec<Achievement>,
    /// Identity -> code held before this reencode (empty when it had none).
    pub old_codes: HashMap<IdentityKey, String>,
    pub allocations: Vec<Allocation>,
    pub changed: usize,
}

#[derive(Debug, Clone)]
struct SortKey {
    rank: i64,
    suffix: u32,
    version: f64,
    code: String,
}

impl SortKey {
    fn of(entry: &Achievement, registry: &CategoryRegistry) -> Self {
        Self {
            rank: registry.rank_of(&entry.first_category),
            suffix: registry.suffix_sort_value(&entry.first_category, &entry.second_category),
            version: entry.version_value(),
            code: entry.code.clone(),
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        let rank = self.rank.cmp(&other.rank);
        if rank != Ordering::Equal {
            return rank;
        }
        let suffix = self.suffix.cmp(&other.suffix);
        if suffix != Ordering::Equal {
            return suffix;
        }
        let version = self.version.total_cmp(&other.version);
        if version != Ordering::Equal {
            return version;
        }
        // Entries without a code sort after every coded entry.
        let empty = self.code.is_empty().cmp(&other.code.is_empty());
        if empty != Ordering::Equal {
            return empty;
        }
        self.code.cmp(&other.code)
    }
}

/// Allocates any unseen categories in one batch, then assigns codes and
/// ordinals to the whole catalog.
pub fn reencode(achievements: Vec<Achievement>, registry: &mut CategoryRegistry) -> Reencoded {
    let allocations = registry.allocate_missing(&achievements);
    let old_codes: HashMap<IdentityKey, String> = achievements
        .iter()
        .map(|entry| (entry.identity(), entry.code.clone()))
        .collect();
    let before: HashMap<IdentityKey, (String, u32)> = achievements
        .iter()
        .map(|entry| (entry.identity(), (entry.code.clone(), entry.absolute_ordinal)))
        .collect();

    let achievements = assign_codes(achievements, registry);
    let changed = achievements
        .iter()
        .filter(|entry| {
            before
                .get(&entry.identity())
                .map_or(true, |(code, ordinal)| {
                    *code != entry.code || *ordinal != entry.absolute_ordinal
                })
        })
        .count();

    info!(
        total = achievements.len(),
        changed,
        allocated = allocations.len(),
        "catalog reencoded"
    );

    Reencoded {
        achievements,
        old_codes,
        allocations,
        changed,
    }
}

/// Sorts the catalog canonically and derives `code` and `absolute_ordinal`.
///
/// Expects every referenced category to be registered already; an entry whose
/// categories are unknown gets an empty code.
pub fn assign_codes(achievements: Vec<Achievement>, registry: &CategoryRegistry) -> Vec<Achievement> {
    let mut keyed: Vec<(SortKey, Achievement)> = achievements
        .into_iter()
        .map(|entry| (SortKey::of(&entry, registry), entry))
        .collect();
    keyed.sort_by(|a, b| a.0.compare(&b.0));

    let mut counters: HashMap<String, u32> = HashMap::new();
    let mut out = Vec::with_capacity(keyed.len());
    for (index, (_, mut entry)) in keyed.into_iter().enumerate() {
        entry.absolute_ordinal = (index + 1) as u32;
        entry.code = match code_prefix(&entry, registry) {
            Some(prefix) => {
                let counter = counters.entry(prefix.clone()).or_insert(1);
                let code = format!("{prefix}{:04}", *counter);
                *counter += 1;
                code
            }
            None => String::new(),
        };
        out.push(entry);
    }
    out
}

/// `<rank><suffix:3>` for a fully categorised entry.
pub fn code_prefix(entry: &Achievement, registry: &CategoryRegistry) -> Option<String> {
    if !entry.has_categories() {
        return None;
    }
    if !registry.contains_first(&entry.first_category) {
        warn!(
            name = entry.name.as_str(),
            category = entry.first_category.as_str(),
            "first category not registered; code left empty"
        );
        return None;
    }
    let Some(suffix) = registry.suffix_of(&entry.first_category, &entry.second_category) else {
        warn!(
            name = entry.name.as_str(),
            category = entry.second_category.as_str(),
            "second category not registered; code left empty"
        );
        return None;
    };
    let rank = registry.rank_of(&entry.first_category);
    Some(format!("{rank}{suffix:03}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn registry() -> CategoryRegistry {
        let mut registry = CategoryRegistry::empty();
        registry.add_first("A", Some(1));
        registry.add_first("B", Some(2));
        registry.add_second("A", "X", Some(10)).expect("X");
        registry.add_second("A", "Y", Some(20)).expect("Y");
        registry.add_second("B", "X", Some(10)).expect("B/X");
        registry
    }

    fn catalog() -> Vec<Achievement> {
        vec![
            Achievement::new("late", "B", "X", "2.0"),
            Achievement::new("first", "A", "X", "1.0"),
            Achievement::new("uncategorised", "", "", "1.0"),
            Achievement::new("second", "A", "X", "1.1"),
            Achievement::new("y", "A", "Y", "1.0"),
        ]
    }

    fn codes(achievements: &[Achievement]) -> Vec<(&str, &str)> {
        achievements
            .iter()
            .map(|entry| (entry.name.as_str(), entry.code.as_str()))
            .collect()
    }

    #[test]
    fn bucket_sequence_matches_expected_codes() {
        let mut registry = registry();
        let result = reencode(catalog(), &mut registry);
        assert_eq!(
            codes(&result.achievements),
            vec![
                ("first", "10100001"),
                ("second", "10100002"),
                ("y", "10200001"),
                ("late", "20100001"),
                ("uncategorised", ""),
            ]
        );
    }

    #[test]
    fn ordinals_cover_whole_catalog() {
        let mut registry = registry();
        let result = reencode(catalog(), &mut registry);
        let mut ordinals: Vec<u32> = result
            .achievements
            .iter()
            .map(|entry| entry.absolute_ordinal)
            .collect();
        ordinals.sort_unstable();
        assert_eq!(ordinals, (1..=5).collect::<Vec<u32>>());
    }

    #[test]
    fn reencode_is_idempotent() {
        let mut registry = registry();
        let once = reencode(catalog(), &mut registry);
        let twice = reencode(once.achievements.clone(), &mut registry);
        assert_eq!(once.achievements, twice.achievements);
        assert_eq!(twice.changed, 0);
        assert!(twice.allocations.is_empty());
    }

    #[test]
    fn reencode_is_idempotent_with_new_categories() {
        let mut registry = registry();
        let mut input = catalog();
        input.push(Achievement::new("fresh", "C", "Q", "1.0"));
        let once = reencode(input, &mut registry);
        assert_eq!(once.allocations.len(), 2);
        let twice = reencode(once.achievements.clone(), &mut registry);
        assert_eq!(once.achievements, twice.achievements);
        let fresh = twice
            .achievements
            .iter()
            .find(|entry| entry.name == "fresh")
            .expect("fresh");
        assert_eq!(fresh.code, "30100001");
    }

    #[test]
    fn codes_are_unique_even_with_shared_suffixes() {
        let mut registry = registry();
        registry.add_second("A", "X alias", Some(10)).expect("alias");
        let mut input = catalog();
        input.push(Achievement::new("alias", "A", "X alias", "1.0"));
        let result = reencode(input, &mut registry);
        let coded: Vec<&str> = result
            .achievements
            .iter()
            .filter(|entry| entry.has_code())
            .map(|entry| entry.code.as_str())
            .collect();
        let unique: HashSet<&str> = coded.iter().copied().collect();
        assert_eq!(coded.len(), unique.len());
    }

    #[test]
    fn old_codes_break_ties_within_a_bucket() {
        let mut registry = registry();
        let mut b = Achievement::new("b", "A", "X", "1.0");
        b.code = "10100001".to_string();
        let mut a = Achievement::new("a", "A", "X", "1.0");
        a.code = "10100002".to_string();
        let fresh = Achievement::new("c", "A", "X", "1.0");
        let result = reencode(vec![fresh, a, b], &mut registry);
        assert_eq!(
            codes(&result.achievements)[..3],
            [("b", "10100001"), ("a", "10100002"), ("c", "10100003")]
        );
        assert_eq!(result.old_codes[&Achievement::new("a", "A", "X", "").identity()], "10100002");
    }

    #[test]
    fn swapping_ranks_changes_leading_digit() {
        let mut registry = registry();
        let once = reencode(catalog(), &mut registry);
        registry.set_rank("A", 2).expect("A");
        registry.set_rank("B", 1).expect("B");
        let swapped = reencode(once.achievements, &mut registry);
        let first = swapped
            .achievements
            .iter()
            .find(|entry| entry.name == "first")
            .expect("first");
        let late = swapped
            .achievements
            .iter()
            .find(|entry| entry.name == "late")
            .expect("late");
        assert_eq!(first.code, "20100001");
        assert_eq!(late.code, "10100001");
        assert_eq!(late.absolute_ordinal, 1);
    }

    #[test]
    fn identity_fields_are_untouched() {
        let mut registry = registry();
        let mut input = catalog();
        input[0].description = "keep me".to_string();
        input[0].group_id = Some("group_001".to_string());
        let result = reencode(input, &mut registry);
        let late = result
            .achievements
            .iter()
            .find(|entry| entry.name == "late")
            .expect("late");
        assert_eq!(late.description, "keep me");
        assert_eq!(late.group_id.as_deref(), Some("group_001"));
    }

    #[test]
    fn assign_codes_leaves_unregistered_entries_uncoded() {
        let registry = registry();
        let result = assign_codes(vec![Achievement::new("z", "Q", "R", "1.0")], &registry);
        assert_eq!(result[0].code, "");
        assert_eq!(result[0].absolute_ordinal, 1);
    }
}

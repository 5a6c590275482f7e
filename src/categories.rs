use crate::{
    catalog::Achievement,
    error::{EngineError, Result},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

/// Rank reported for first categories the registry does not know.
pub const UNKNOWN_RANK: i64 = 999;
/// Sort value for second categories the registry does not know.
pub const UNKNOWN_SUFFIX: u32 = 999;
pub const SUFFIX_STEP: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirstCategory {
    pub name: String,
    pub rank: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondCategory {
    pub name: String,
    pub suffix: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SecondLevel {
    first: String,
    entries: Vec<SecondCategory>,
}

/// Two-level category taxonomy. Insertion order is kept so that equal ranks
/// resolve by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RegistryDocument", into = "RegistryDocument")]
pub struct CategoryRegistry {
    firsts: Vec<FirstCategory>,
    seconds: Vec<SecondLevel>,
}

/// Categories an import or edit references that the registry lacks, in
/// first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationPlan {
    pub firsts: Vec<String>,
    pub seconds: Vec<(String, String)>,
}

impl AllocationPlan {
    pub fn is_empty(&self) -> bool {
        self.firsts.is_empty() && self.seconds.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum Allocation {
    First { name: String, rank: i64 },
    Second { first: String, name: String, suffix: u32 },
}

impl CategoryRegistry {
    pub fn empty() -> Self {
        Self {
            firsts: Vec::new(),
            seconds: Vec::new(),
        }
    }

    pub fn rank_of(&self, first: &str) -> i64 {
        self.first(first).map(|entry| entry.rank).unwrap_or(UNKNOWN_RANK)
    }

    pub fn suffix_of(&self, first: &str, second: &str) -> Option<u32> {
        self.level(first)?
            .entries
            .iter()
            .find(|entry| entry.name == second)
            .map(|entry| entry.suffix)
    }

    pub fn suffix_sort_value(&self, first: &str, second: &str) -> u32 {
        self.suffix_of(first, second).unwrap_or(UNKNOWN_SUFFIX)
    }

    pub fn contains_first(&self, first: &str) -> bool {
        self.first(first).is_some()
    }

    pub fn contains_second(&self, first: &str, second: &str) -> bool {
        self.suffix_of(first, second).is_some()
    }

    /// First categories in rank order, ties by insertion position.
    pub fn first_categories(&self) -> Vec<&FirstCategory> {
        let mut out: Vec<&FirstCategory> = self.firsts.iter().collect();
        out.sort_by_key(|entry| entry.rank);
        out
    }

    /// Second categories of `first` in suffix order, ties by insertion position.
    pub fn second_categories(&self, first: &str) -> Vec<&SecondCategory> {
        let mut out: Vec<&SecondCategory> = self
            .level(first)
            .map(|level| level.entries.iter().collect())
            .unwrap_or_default();
        out.sort_by_key(|entry| entry.suffix);
        out
    }

    /// Reverse lookup used when an import names only the second category.
    pub fn first_category_for_second(&self, second: &str) -> Option<&str> {
        self.seconds
            .iter()
            .find(|level| level.entries.iter().any(|entry| entry.name == second))
            .map(|level| level.first.as_str())
    }

    /// Returns the rank of `first`, allocating `max(rank) + 1` when unseen.
    pub fn ensure_first_category(&mut self, first: &str) -> i64 {
        if let Some(entry) = self.first(first) {
            return entry.rank;
        }
        let rank = self
            .firsts
            .iter()
            .map(|entry| entry.rank)
            .max()
            .map_or(1, |max| max + 1);
        self.firsts.push(FirstCategory {
            name: first.to_string(),
            rank,
        });
        self.level_mut(first);
        info!(category = first, rank, "allocated first category");
        rank
    }

    /// Returns the suffix of `second` under `first`, allocating the smallest
    /// unused multiple of ten when unseen. Unknown first categories are
    /// allocated as well.
    pub fn ensure_second_category(&mut self, first: &str, second: &str) -> String {
        self.ensure_first_category(first);
        if let Some(suffix) = self.suffix_of(first, second) {
            return suffix.to_string();
        }
        let suffix = self.next_suffix(first);
        self.level_mut(first).entries.push(SecondCategory {
            name: second.to_string(),
            suffix,
        });
        info!(category = first, second, suffix, "allocated second category");
        suffix.to_string()
    }

    pub fn next_suffix(&self, first: &str) -> u32 {
        let used: Vec<u32> = self
            .level(first)
            .map(|level| level.entries.iter().map(|entry| entry.suffix).collect())
            .unwrap_or_default();
        let mut suffix = SUFFIX_STEP;
        while used.contains(&suffix) {
            suffix += SUFFIX_STEP;
        }
        suffix
    }

    /// Smallest unused rank starting at 1, for manually added categories.
    pub fn next_free_rank(&self) -> i64 {
        let mut rank = 1;
        while self.firsts.iter().any(|entry| entry.rank == rank) {
            rank += 1;
        }
        rank
    }

    /// Collects the categories referenced by `achievements` that are not yet
    /// registered. Entries missing either category are ignored.
    pub fn plan_allocations(&self, achievements: &[Achievement]) -> AllocationPlan {
        let mut plan = AllocationPlan::default();
        for entry in achievements.iter().filter(|entry| entry.has_categories()) {
            let first = &entry.first_category;
            let second = &entry.second_category;
            if !self.contains_first(first) && !plan.firsts.contains(first) {
                plan.firsts.push(first.clone());
            }
            let pair = (first.clone(), second.clone());
            if !self.contains_second(first, second) && !plan.seconds.contains(&pair) {
                plan.seconds.push(pair);
            }
        }
        plan
    }

    pub fn apply_plan(&mut self, plan: &AllocationPlan) -> Vec<Allocation> {
        let mut applied = Vec::new();
        for first in &plan.firsts {
            if self.contains_first(first) {
                continue;
            }
            let rank = self.ensure_first_category(first);
            applied.push(Allocation::First {
                name: first.clone(),
                rank,
            });
        }
        for (first, second) in &plan.seconds {
            if self.contains_second(first, second) {
                continue;
            }
            self.ensure_second_category(first, second);
            applied.push(Allocation::Second {
                first: first.clone(),
                name: second.clone(),
                suffix: self.suffix_sort_value(first, second),
            });
        }
        applied
    }

    /// Plan and apply in one step; each unseen category is allocated once.
    pub fn allocate_missing(&mut self, achievements: &[Achievement]) -> Vec<Allocation> {
        let plan = self.plan_allocations(achievements);
        if plan.is_empty() {
            return Vec::new();
        }
        self.apply_plan(&plan)
    }

    pub fn add_first(&mut self, name: &str, rank: Option<i64>) -> i64 {
        if let Some(entry) = self.first(name) {
            return entry.rank;
        }
        let rank = rank.unwrap_or_else(|| self.next_free_rank());
        self.firsts.push(FirstCategory {
            name: name.to_string(),
            rank,
        });
        self.level_mut(name);
        rank
    }

    pub fn add_second(&mut self, first: &str, name: &str, suffix: Option<u32>) -> Result<u32> {
        if !self.contains_first(first) {
            return Err(EngineError::UnknownCategory(first.to_string()));
        }
        if let Some(existing) = self.suffix_of(first, name) {
            return Ok(existing);
        }
        let suffix = suffix.unwrap_or_else(|| self.next_suffix(first));
        self.level_mut(first).entries.push(SecondCategory {
            name: name.to_string(),
            suffix,
        });
        Ok(suffix)
    }

    pub fn set_rank(&mut self, first: &str, rank: i64) -> Result<()> {
        let entry = self
            .firsts
            .iter_mut()
            .find(|entry| entry.name == first)
            .ok_or_else(|| EngineError::UnknownCategory(first.to_string()))?;
        entry.rank = rank;
        Ok(())
    }

    pub fn set_suffix(&mut self, first: &str, second: &str, suffix: u32) -> Result<()> {
        let entry = self
            .seconds
            .iter_mut()
            .find(|level| level.first == first)
            .and_then(|level| level.entries.iter_mut().find(|entry| entry.name == second))
            .ok_or_else(|| EngineError::UnknownCategory(format!("{first}/{second}")))?;
        entry.suffix = suffix;
        Ok(())
    }

    pub fn move_up(&mut self, first: &str) -> Result<()> {
        self.shift(first, -1)
    }

    pub fn move_down(&mut self, first: &str) -> Result<()> {
        self.shift(first, 1)
    }

    pub fn remove_first(&mut self, first: &str) -> Result<()> {
        let before = self.firsts.len();
        self.firsts.retain(|entry| entry.name != first);
        if self.firsts.len() == before {
            return Err(EngineError::UnknownCategory(first.to_string()));
        }
        self.seconds.retain(|level| level.first != first);
        Ok(())
    }

    pub fn remove_second(&mut self, first: &str, second: &str) -> Result<()> {
        let level = self
            .seconds
            .iter_mut()
            .find(|level| level.first == first)
            .ok_or_else(|| EngineError::UnknownCategory(first.to_string()))?;
        let before = level.entries.len();
        level.entries.retain(|entry| entry.name != second);
        if level.entries.len() == before {
            return Err(EngineError::UnknownCategory(format!("{first}/{second}")));
        }
        Ok(())
    }

    fn shift(&mut self, first: &str, step: isize) -> Result<()> {
        let order: Vec<String> = self
            .first_categories()
            .into_iter()
            .map(|entry| entry.name.clone())
            .collect();
        let index = order
            .iter()
            .position(|name| name == first)
            .ok_or_else(|| EngineError::UnknownCategory(first.to_string()))?;
        let target = index as isize + step;
        if target < 0 || target as usize >= order.len() {
            return Ok(());
        }
        let a = self.position(first);
        let b = self.position(&order[target as usize]);
        if let (Some(a), Some(b)) = (a, b) {
            let rank_a = self.firsts[a].rank;
            self.firsts[a].rank = self.firsts[b].rank;
            self.firsts[b].rank = rank_a;
            self.firsts.swap(a, b);
        }
        Ok(())
    }

    fn position(&self, first: &str) -> Option<usize> {
        self.firsts.iter().position(|entry| entry.name == first)
    }

    fn first(&self, first: &str) -> Option<&FirstCategory> {
        self.firsts.iter().find(|entry| entry.name == first)
    }

    fn level(&self, first: &str) -> Option<&SecondLevel> {
        self.seconds.iter().find(|level| level.first == first)
    }

    fn level_mut(&mut self, first: &str) -> &mut SecondLevel {
        let index = match self.seconds.iter().position(|level| level.first == first) {
            Some(index) => index,
            None => {
                self.seconds.push(SecondLevel {
                    first: first.to_string(),
                    entries: Vec::new(),
                });
                self.seconds.len() - 1
            }
        };
        &mut self.seconds[index]
    }
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        let mut registry = CategoryRegistry::empty();
        let defaults: [(&str, i64, &[(&str, u32)]); 4] = [
            (
                "索拉漫行",
                1,
                &[
                    ("索拉的大地·瑝珑", 10),
                    ("瑝珑的足迹·一", 20),
                    ("瑝珑的足迹·二", 30),
                    ("黑海岸的足迹·一", 40),
                    ("索拉的大地·黎那汐塔", 50),
                    ("黎那汐塔的足迹·一", 60),
                    ("黎那汐塔的足迹·二", 70),
                    ("黎那汐塔的足迹·三", 80),
                    ("荒野的呼唤", 90),
                ],
            ),
            (
                "长路留迹",
                2,
                &[
                    ("漂泊之旅", 10),
                    ("漂泊之旅·一", 10),
                    ("漂泊之旅·二", 20),
                    ("与你的印迹", 30),
                    ("世间百态", 40),
                    ("世间百态·一", 40),
                ],
            ),
            (
                "铿锵刃鸣",
                3,
                &[
                    ("战斗的记忆", 10),
                    ("战斗的技巧·一", 20),
                    ("战斗的技巧·二", 30),
                    ("战斗的技巧·三", 40),
                    ("战斗的技巧·四", 50),
                    ("战斗的回响", 60),
                    ("意外体验", 70),
                    ("来自深塔·一", 80),
                    ("来自深塔·二", 90),
                ],
            ),
            (
                "诸音声轨",
                4,
                &[("成长之路", 10), ("别域的友谊", 20), ("声骸数据", 30)],
            ),
        ];
        for (first, rank, seconds) in defaults {
            registry.firsts.push(FirstCategory {
                name: first.to_string(),
                rank,
            });
            registry.seconds.push(SecondLevel {
                first: first.to_string(),
                entries: seconds
                    .iter()
                    .map(|(name, suffix)| SecondCategory {
                        name: name.to_string(),
                        suffix: *suffix,
                    })
                    .collect(),
            });
        }
        registry
    }
}

/// On-disk shape: `{firstCategories: {name: rank}, secondCategories: {first: {name: "suffix"}}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryDocument {
    #[serde(default, alias = "first_categories")]
    first_categories: Map<String, Value>,
    #[serde(default, alias = "second_categories")]
    second_categories: Map<String, Value>,
}

impl TryFrom<RegistryDocument> for CategoryRegistry {
    type Error = EngineError;

    fn try_from(document: RegistryDocument) -> Result<Self> {
        let mut firsts = Vec::new();
        for (name, value) in document.first_categories {
            let rank = parse_number(&value)
                .ok_or_else(|| EngineError::InvalidDocument(format!("rank of {name}: {value}")))?;
            firsts.push(FirstCategory { name, rank });
        }

        let mut seconds = Vec::new();
        for (first, value) in document.second_categories {
            let Value::Object(entries) = value else {
                return Err(EngineError::InvalidDocument(format!(
                    "second categories of {first} must be an object"
                )));
            };
            let mut level = SecondLevel {
                first,
                entries: Vec::new(),
            };
            for (name, raw) in entries {
                let suffix = parse_number(&raw)
                    .and_then(|value| u32::try_from(value).ok())
                    .ok_or_else(|| {
                        EngineError::InvalidDocument(format!(
                            "suffix of {}/{name}: {raw}",
                            level.first
                        ))
                    })?;
                level.entries.push(SecondCategory { name, suffix });
            }
            seconds.push(level);
        }

        Ok(CategoryRegistry { firsts, seconds })
    }
}

impl From<CategoryRegistry> for RegistryDocument {
    fn from(registry: CategoryRegistry) -> Self {
        let first_categories = registry
            .firsts
            .into_iter()
            .map(|entry| (entry.name, Value::from(entry.rank)))
            .collect();
        let second_categories = registry
            .seconds
            .into_iter()
            .map(|level| {
                let entries: Map<String, Value> = level
                    .entries
                    .into_iter()
                    .map(|entry| (entry.name, Value::String(entry.suffix.to_string())))
                    .collect();
                (level.first, Value::Object(entries))
            })
            .collect();
        RegistryDocument {
            first_categories,
            second_categories,
        }
    }
}

fn parse_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}

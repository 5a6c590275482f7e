use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// One entry of the shared achievement catalog.
///
/// `code` and `absolute_ordinal` are derived by [`crate::encode::reencode`];
/// `mutex_codes` is derived by [`crate::groups`]. Status never lives here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    #[serde(default, alias = "绝对编号", with = "ordinal")]
    pub absolute_ordinal: u32,
    #[serde(default, alias = "版本", deserialize_with = "text")]
    pub version: String,
    #[serde(default, alias = "第一分类")]
    pub first_category: String,
    #[serde(default, alias = "第二分类")]
    pub second_category: String,
    #[serde(default, alias = "编号")]
    pub code: String,
    #[serde(default, alias = "名称")]
    pub name: String,
    #[serde(default, alias = "描述")]
    pub description: String,
    #[serde(default, alias = "奖励", deserialize_with = "text")]
    pub reward: String,
    #[serde(default, alias = "是否隐藏", deserialize_with = "hidden_flag")]
    pub hidden: bool,
    #[serde(default, alias = "成就组ID", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, alias = "互斥成就", skip_serializing_if = "Option::is_none")]
    pub mutex_codes: Option<Vec<String>>,
}

/// Stable join key across reencodes. Codes are not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub name: String,
    pub first_category: String,
    pub second_category: String,
}

impl Achievement {
    pub fn new(name: &str, first_category: &str, second_category: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            first_category: first_category.to_string(),
            second_category: second_category.to_string(),
            version: version.to_string(),
            ..Self::default()
        }
    }

    pub fn identity(&self) -> IdentityKey {
        IdentityKey {
            name: self.name.clone(),
            first_category: self.first_category.clone(),
            second_category: self.second_category.clone(),
        }
    }

    pub fn has_categories(&self) -> bool {
        !self.first_category.is_empty() && !self.second_category.is_empty()
    }

    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
    }

    pub fn group(&self) -> Option<&str> {
        self.group_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Version as a float for ordering; unparsable versions sort as 0.0.
    pub fn version_value(&self) -> f64 {
        self.version.trim().parse::<f64>().unwrap_or(0.0)
    }

    pub fn major_version(&self) -> String {
        major_version(&self.version)
    }

    pub fn clear_group(&mut self) {
        self.group_id = None;
        self.mutex_codes = None;
    }
}

/// The base catalog document: an array ordered by absolute ordinal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    pub achievements: Vec<Achievement>,
}

impl Catalog {
    pub fn new(achievements: Vec<Achievement>) -> Self {
        Self { achievements }
    }

    pub fn len(&self) -> usize {
        self.achievements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.achievements.is_empty()
    }

    pub fn find(&self, code: &str) -> Option<&Achievement> {
        if code.is_empty() {
            return None;
        }
        self.achievements.iter().find(|entry| entry.code == code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.find(code).is_some()
    }

    pub fn index_by_code(&self) -> HashMap<String, usize> {
        index_by_code(&self.achievements)
    }

    pub fn codes(&self) -> HashSet<String> {
        self.achievements
            .iter()
            .filter(|entry| entry.has_code())
            .map(|entry| entry.code.clone())
            .collect()
    }

    pub fn groups(&self) -> BTreeMap<String, Vec<String>> {
        group_members(&self.achievements)
    }

    pub fn sort_by_ordinal(&mut self) {
        self.achievements.sort_by_key(|entry| entry.absolute_ordinal);
    }

    /// Number of achievements filed under a first category, or under one of
    /// its second categories when `second` is given.
    pub fn category_usage(&self, first: &str, second: Option<&str>) -> usize {
        self.achievements
            .iter()
            .filter(|entry| entry.first_category == first)
            .filter(|entry| second.map_or(true, |second| entry.second_category == second))
            .count()
    }
}

pub fn index_by_code(achievements: &[Achievement]) -> HashMap<String, usize> {
    achievements
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.has_code())
        .map(|(index, entry)| (entry.code.clone(), index))
        .collect()
}

/// Group id -> member codes, in catalog order.
pub fn group_members(achievements: &[Achievement]) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in achievements {
        if let Some(group_id) = entry.group() {
            groups
                .entry(group_id.to_string())
                .or_default()
                .push(entry.code.clone());
        }
    }
    groups
}

/// `"2"` becomes `"2.0"`; anything already dotted or non-numeric is kept.
pub fn normalize_version(raw: &str) -> String {
    let version = raw.trim();
    if version.is_empty() || version.contains('.') {
        return version.to_string();
    }
    if version.chars().all(|ch| ch.is_ascii_digit()) {
        if let Ok(value) = version.parse::<u64>() {
            return format!("{value}.0");
        }
    }
    version.to_string()
}

pub fn major_version(version: &str) -> String {
    let version = version.trim();
    if version.is_empty() {
        return "unknown".to_string();
    }
    match version.split_once('.') {
        Some((major, _)) => format!("{major}.x"),
        None => format!("{version}.x"),
    }
}

mod ordinal {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(0),
            Value::Number(number) => number
                .as_u64()
                .and_then(|value| u32::try_from(value).ok())
                .ok_or_else(|| serde::de::Error::custom(format!("invalid ordinal: {number}"))),
            Value::String(raw) if raw.trim().is_empty() => Ok(0),
            Value::String(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| serde::de::Error::custom(format!("invalid ordinal: {raw}"))),
            other => Err(serde::de::Error::custom(format!(
                "invalid ordinal: {other}"
            ))),
        }
    }
}

fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(raw) => Ok(raw),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(serde::de::Error::custom(format!("expected text, got {other}"))),
    }
}

fn hidden_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::String(raw) => is_hidden_label(&raw),
        Value::Number(number) => number.as_i64().unwrap_or(0) != 0,
        _ => false,
    })
}

pub fn is_hidden_label(raw: &str) -> bool {
    let raw = raw.trim();
    !(raw.is_empty() || raw == "否" || raw == "0" || raw.eq_ignore_ascii_case("false"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_legacy_keys() {
        let raw = r#"{
            "绝对编号": "12",
            "版本": "2.7",
            "第一分类": "索拉漫行",
            "第二分类": "荒野的呼唤",
            "编号": "10900001",
            "名称": "Old Friend",
            "描述": "Meet again.",
            "奖励": "星声*5",
            "是否隐藏": "隐藏"
        }"#;
        let entry: Achievement = serde_json::from_str(raw).expect("parse");
        assert_eq!(entry.absolute_ordinal, 12);
        assert_eq!(entry.code, "10900001");
        assert_eq!(entry.first_category, "索拉漫行");
        assert!(entry.hidden);
        assert!(entry.group_id.is_none());
    }

    #[test]
    fn writes_camel_case_with_string_ordinal() {
        let mut entry = Achievement::new("A", "F", "S", "1.0");
        entry.absolute_ordinal = 3;
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["absoluteOrdinal"], "3");
        assert_eq!(value["firstCategory"], "F");
        assert!(value.get("groupId").is_none());
        assert!(value.get("status").is_none());
    }

    #[test]
    fn numeric_version_and_ordinal_are_accepted() {
        let entry: Achievement =
            serde_json::from_str(r#"{"absoluteOrdinal": 4, "version": 2.5, "hidden": false}"#)
                .expect("parse");
        assert_eq!(entry.absolute_ordinal, 4);
        assert_eq!(entry.version, "2.5");
        assert!(!entry.hidden);
    }

    #[test]
    fn version_helpers() {
        assert_eq!(normalize_version("2"), "2.0");
        assert_eq!(normalize_version(" 2.7 "), "2.7");
        assert_eq!(normalize_version("beta"), "beta");
        assert_eq!(major_version("2.7"), "2.x");
        assert_eq!(major_version(""), "unknown");
        assert_eq!(Achievement::new("a", "", "", "x").version_value(), 0.0);
    }

    #[test]
    fn groups_collect_members_in_order() {
        let mut first = Achievement::new("P", "F", "S", "1.0");
        first.code = "1".to_string();
        first.group_id = Some("group_001".to_string());
        let mut second = Achievement::new("Q", "F", "S", "1.0");
        second.code = "2".to_string();
        second.group_id = Some("group_001".to_string());
        let loose = Achievement::new("R", "F", "S", "1.0");
        let catalog = Catalog::new(vec![first, loose, second]);
        let groups = catalog.groups();
        assert_eq!(groups["group_001"], vec!["1".to_string(), "2".to_string()]);
        assert_eq!(catalog.category_usage("F", Some("S")), 3);
    }
}

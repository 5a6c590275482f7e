use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const LABEL_NOT_STARTED: &str = "未完成";
pub const LABEL_COMPLETED: &str = "已完成";
pub const LABEL_UNAVAILABLE: &str = "暂不可获取";
pub const LABEL_LOCKED: &str = "已占用";

/// Per-user completion state of one achievement.
///
/// On disk the state is always the game's label string; this type is the only
/// place where labels and variants are translated into each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AchievementStatus {
    #[default]
    NotStarted,
    Completed,
    Unavailable,
    Locked,
}

impl AchievementStatus {
    pub fn label(self) -> &'static str {
        match self {
            AchievementStatus::NotStarted => LABEL_NOT_STARTED,
            AchievementStatus::Completed => LABEL_COMPLETED,
            AchievementStatus::Unavailable => LABEL_UNAVAILABLE,
            AchievementStatus::Locked => LABEL_LOCKED,
        }
    }

    /// Accepts current labels and the older English/empty spellings.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            LABEL_NOT_STARTED | "" => Some(AchievementStatus::NotStarted),
            LABEL_COMPLETED | "completed" => Some(AchievementStatus::Completed),
            LABEL_UNAVAILABLE | "unavailable" => Some(AchievementStatus::Unavailable),
            LABEL_LOCKED | "locked" => Some(AchievementStatus::Locked),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AchievementStatus::NotStarted => "not_started",
            AchievementStatus::Completed => "completed",
            AchievementStatus::Unavailable => "unavailable",
            AchievementStatus::Locked => "locked",
        }
    }

    pub fn is_completed(self) -> bool {
        matches!(self, AchievementStatus::Completed)
    }
}

impl fmt::Display for AchievementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for AchievementStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for AchievementStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AchievementStatus::from_label(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown status label: {raw}")))
    }
}

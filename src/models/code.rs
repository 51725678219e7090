use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

static GOLDEN_KEYS: OnceLock<Regex> = OnceLock::new();
static NON_ALNUM: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardCategory {
    GoldenKey,
    NonGoldenKey,
    Other,
}

impl RewardCategory {
    pub fn from_reward(reward: &str) -> Self {
        let golden = GOLDEN_KEYS.get_or_init(|| {
            Regex::new(r"(?i)^\s*\d*\s*gold(en)?\s+keys?").expect("golden key pattern")
        });
        if golden.is_match(reward) {
            RewardCategory::GoldenKey
        } else if reward.to_lowercase().contains("key") {
            RewardCategory::NonGoldenKey
        } else {
            RewardCategory::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RewardCategory::GoldenKey => "golden",
            RewardCategory::NonGoldenKey => "non_golden",
            RewardCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "golden" => Some(RewardCategory::GoldenKey),
            "non_golden" => Some(RewardCategory::NonGoldenKey),
            "other" => Some(RewardCategory::Other),
            _ => None,
        }
    }
}

/// Which reward categories a run may redeem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryFilter {
    pub golden: bool,
    pub non_golden: bool,
    pub other: bool,
}

impl CategoryFilter {
    pub fn all() -> Self {
        Self {
            golden: true,
            non_golden: true,
            other: true,
        }
    }

    #[cfg(test)]
    pub fn only(category: RewardCategory) -> Self {
        Self {
            golden: category == RewardCategory::GoldenKey,
            non_golden: category == RewardCategory::NonGoldenKey,
            other: category == RewardCategory::Other,
        }
    }

    pub fn allows(&self, category: RewardCategory) -> bool {
        match category {
            RewardCategory::GoldenKey => self.golden,
            RewardCategory::NonGoldenKey => self.non_golden,
            RewardCategory::Other => self.other,
        }
    }
}

impl Default for CategoryFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// A code as supplied by a feed or by the operator, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCode {
    pub code: String,
    pub game: Option<String>,
    /// Empty means the code applies to every platform.
    pub platforms: Vec<String>,
    pub reward: String,
    pub category: RewardCategory,
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewCode {
    /// Minimal record for a code nobody has published metadata for.
    pub fn placeholder(code: &str) -> Self {
        Self {
            code: code.to_string(),
            game: None,
            platforms: Vec::new(),
            reward: "Unknown".to_string(),
            category: RewardCategory::Other,
            title: None,
            description: None,
            source: Some("manual".to_string()),
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeRecord {
    pub id: i64,
    pub code: String,
    pub game: Option<String>,
    pub platforms: Vec<String>,
    pub reward: String,
    pub category: RewardCategory,
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CodeRecord {
    pub fn applies_to(&self, platform: &str) -> bool {
        self.platforms.is_empty() || self.platforms.iter().any(|p| p == platform)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the metadata came from a feed rather than a manual placeholder.
    pub fn has_source_metadata(&self) -> bool {
        self.source.as_deref().is_some_and(|s| s != "manual")
    }
}

/// Normalize a code into five dash-joined blocks of five upper-case alphanumerics.
pub fn normalize_code(raw: &str) -> Option<String> {
    let strip = NON_ALNUM.get_or_init(|| Regex::new(r"[^A-Za-z0-9]").expect("strip pattern"));
    let compact = strip.replace_all(raw.trim(), "").to_uppercase();
    if compact.len() != 25 {
        return None;
    }
    let blocks: Vec<&str> = (0..5).map(|i| &compact[i * 5..i * 5 + 5]).collect();
    Some(blocks.join("-"))
}

pub fn looks_like_code(raw: &str) -> bool {
    normalize_code(raw).is_some()
}

/// Parse the expiry formats seen in feeds. Unparseable values mean "no expiry".
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let text = raw.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("unknown") {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_loose_codes() {
        assert_eq!(
            normalize_code(" abcde12345xxxxx-yyyyy zzzzz ").as_deref(),
            Some("ABCDE-12345-XXXXX-YYYYY-ZZZZZ")
        );
        assert_eq!(normalize_code("ABCDE-12345"), None);
        assert!(!looks_like_code("bl3:steam"));
    }

    #[test]
    fn categorizes_rewards() {
        assert_eq!(RewardCategory::from_reward("3 Golden Keys"), RewardCategory::GoldenKey);
        assert_eq!(RewardCategory::from_reward("1 gold key"), RewardCategory::GoldenKey);
        assert_eq!(RewardCategory::from_reward("Diamond Key"), RewardCategory::NonGoldenKey);
        assert_eq!(RewardCategory::from_reward("Cosmetic head"), RewardCategory::Other);
        assert_eq!(RewardCategory::from_reward("Unknown"), RewardCategory::Other);
    }

    #[test]
    fn parses_feed_expiry_formats() {
        assert!(parse_expiry("2025-03-01T12:00:00Z").is_some());
        assert!(parse_expiry("2025-03-01 12:00:00").is_some());
        assert!(parse_expiry("2025-03-01").is_some());
        assert_eq!(parse_expiry("Unknown"), None);
        assert_eq!(parse_expiry("soon"), None);
    }
}

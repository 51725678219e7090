use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the redemption service said about one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutcomeKind {
    Success,
    AlreadyRedeemed,
    Invalid,
    Expired,
    NotYetLive,
    RateLimited,
    Unknown,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 7] = [
        OutcomeKind::Success,
        OutcomeKind::AlreadyRedeemed,
        OutcomeKind::Invalid,
        OutcomeKind::Expired,
        OutcomeKind::NotYetLive,
        OutcomeKind::RateLimited,
        OutcomeKind::Unknown,
    ];

    /// Stored status after this outcome is recorded.
    pub fn status(&self) -> RedemptionStatus {
        match self {
            OutcomeKind::Success => RedemptionStatus::Redeemed,
            OutcomeKind::AlreadyRedeemed => RedemptionStatus::AlreadyRedeemed,
            OutcomeKind::Invalid | OutcomeKind::Expired => RedemptionStatus::PermanentlyInvalid,
            OutcomeKind::NotYetLive | OutcomeKind::RateLimited | OutcomeKind::Unknown => {
                RedemptionStatus::Pending
            }
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, OutcomeKind::Success | OutcomeKind::AlreadyRedeemed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "SUCCESS",
            OutcomeKind::AlreadyRedeemed => "ALREADY_REDEEMED",
            OutcomeKind::Invalid => "INVALID",
            OutcomeKind::Expired => "EXPIRED",
            OutcomeKind::NotYetLive => "NOT_YET_LIVE",
            OutcomeKind::RateLimited => "RATE_LIMITED",
            OutcomeKind::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        OutcomeKind::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RedemptionStatus {
    #[default]
    Pending,
    Redeemed,
    AlreadyRedeemed,
    PermanentlyInvalid,
}

impl RedemptionStatus {
    /// Terminal statuses are never re-attempted and never overwritten.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RedemptionStatus::Redeemed | RedemptionStatus::AlreadyRedeemed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RedemptionStatus::Pending => "pending",
            RedemptionStatus::Redeemed => "redeemed",
            RedemptionStatus::AlreadyRedeemed => "already_redeemed",
            RedemptionStatus::PermanentlyInvalid => "invalid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RedemptionStatus::Pending),
            "redeemed" => Some(RedemptionStatus::Redeemed),
            "already_redeemed" => Some(RedemptionStatus::AlreadyRedeemed),
            "invalid" => Some(RedemptionStatus::PermanentlyInvalid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionRecord {
    pub code: String,
    pub game: String,
    pub platform: String,
    pub status: RedemptionStatus,
    pub last_outcome: Option<OutcomeKind>,
    pub detail: Option<String>,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl RedemptionRecord {
    /// Whether the planner should leave this pair alone.
    ///
    /// Terminal records are always skipped. Invalid records and pairs that hit
    /// the unknown-outcome cap are skipped unless `bypass_fail` is set.
    pub fn blocks_planning(&self, bypass_fail: bool, max_unknown_attempts: u32) -> bool {
        if self.status.is_terminal() {
            return true;
        }
        if bypass_fail {
            return false;
        }
        match self.status {
            RedemptionStatus::PermanentlyInvalid => true,
            RedemptionStatus::Pending => {
                self.last_outcome == Some(OutcomeKind::Unknown)
                    && self.attempts >= max_unknown_attempts
            }
            _ => false,
        }
    }
}

/// Whether `record_outcome` changed the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeWrite {
    Applied,
    IgnoredTerminal,
}

/// Raw response from the redemption service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub message: String,
}

impl RawResponse {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

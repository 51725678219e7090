pub mod catalog;
mod code;
mod redemption;
mod summary;

pub use code::{
    looks_like_code, normalize_code, parse_expiry, CategoryFilter, CodeRecord, NewCode,
    RewardCategory,
};
pub use redemption::{
    OutcomeKind, OutcomeWrite, RawResponse, RedemptionRecord, RedemptionStatus,
};
pub use summary::RunSummary;

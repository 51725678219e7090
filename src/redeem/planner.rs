use chrono::{DateTime, Utc};

use crate::db::{PairFilter, PendingPair, TrackingStore};
use crate::error::{RedeemError, Result};
use crate::models::{catalog, normalize_code, CategoryFilter, CodeRecord, NewCode, RewardCategory};

/// One game and the platforms to redeem it on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub game: String,
    pub platforms: Vec<String>,
}

/// A single planned submission.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub code: CodeRecord,
    pub game: String,
    pub platform: String,
}

impl Attempt {
    fn from_pair(game: &str, pair: PendingPair) -> Self {
        Self {
            code: pair.code,
            game: game.to_string(),
            platform: pair.platform,
        }
    }

    pub fn is_golden(&self) -> bool {
        self.code.category == RewardCategory::GoldenKey
    }
}

/// Ordered work for one invocation of the submission loop.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub attempts: Vec<Attempt>,
    /// Past their expiry; recorded without a remote call.
    pub expired: Vec<Attempt>,
    pub skipped_settled: u32,
    /// Stop submitting golden keys after this many succeed. `None` is unlimited.
    pub golden_limit: Option<u32>,
    pub manual: bool,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty() && self.expired.is_empty()
    }
}

pub struct Planner<'a> {
    store: &'a TrackingStore,
    bypass_fail: bool,
    max_unknown_attempts: u32,
}

impl<'a> Planner<'a> {
    pub fn new(store: &'a TrackingStore, bypass_fail: bool, max_unknown_attempts: u32) -> Self {
        Self {
            store,
            bypass_fail,
            max_unknown_attempts,
        }
    }

    fn filter(&self, categories: CategoryFilter) -> PairFilter {
        PairFilter {
            categories,
            bypass_fail: self.bypass_fail,
            max_unknown_attempts: self.max_unknown_attempts,
        }
    }

    /// Plan every outstanding (code, platform) pair for the requested games.
    ///
    /// Within each game and platform, golden keys come first, then other
    /// keys, then everything else; feed order is kept inside each group.
    pub async fn plan_mapping(
        &self,
        targets: &[Target],
        categories: CategoryFilter,
        golden_limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Plan> {
        let filter = self.filter(categories);
        let mut plan = Plan {
            golden_limit: Some(golden_limit),
            ..Plan::default()
        };

        for target in targets {
            let pairs = self
                .store
                .pending_pairs(&target.game, &target.platforms, filter)
                .await?;
            plan.skipped_settled += self
                .store
                .settled_count(&target.game, &target.platforms, filter)
                .await?;

            for platform in &target.platforms {
                let mut group: Vec<PendingPair> =
                    pairs.iter().filter(|p| &p.platform == platform).cloned().collect();
                group.sort_by_key(|p| p.code.category);
                tracing::debug!(
                    "{} on {}: {} pending codes",
                    target.game,
                    platform,
                    group.len()
                );

                for pair in group {
                    let attempt = Attempt::from_pair(&target.game, pair);
                    if attempt.code.is_expired(now) && !self.bypass_fail {
                        plan.expired.push(attempt);
                        continue;
                    }
                    self.store
                        .mark_planned(&attempt.code.code, &attempt.game, &attempt.platform)
                        .await?;
                    plan.attempts.push(attempt);
                }
            }
        }

        tracing::info!(
            "Planned {} attempts ({} expired, {} already settled)",
            plan.attempts.len(),
            plan.expired.len(),
            plan.skipped_settled
        );
        Ok(plan)
    }

    /// Plan a single operator-supplied code.
    ///
    /// The code is stored first: with feed metadata when the feed knows it,
    /// otherwise as a placeholder. A code already stored with feed metadata
    /// is left as is. Games fall back to every supported game when the code
    /// is not tied to a known one; platforms fall back to every supported
    /// platform when `platforms` is empty. The platforms a feed lists for the
    /// code are not used to narrow the attempts.
    pub async fn plan_manual(
        &self,
        raw_code: &str,
        platforms: &[String],
        feed_metadata: Option<NewCode>,
    ) -> Result<Plan> {
        let code = normalize_code(raw_code).ok_or_else(|| {
            RedeemError::InvalidCode(format!(
                "'{}' is not a 25 character SHiFT code",
                raw_code.trim()
            ))
        })?;

        let existing = self.store.get_code(&code).await?;
        match (existing.as_ref(), feed_metadata) {
            (Some(record), _) if record.has_source_metadata() => {
                tracing::debug!("{} already stored with feed metadata", code);
            }
            (_, Some(mut metadata)) => {
                metadata.code = code.clone();
                self.store.upsert_code(metadata).await?;
            }
            (None, None) => {
                self.store.upsert_code(NewCode::placeholder(&code)).await?;
            }
            (Some(_), None) => {}
        }
        let record = self.store.get_code(&code).await?.ok_or_else(|| {
            RedeemError::StoreIo(format!("{} vanished right after being stored", code))
        })?;

        let supported = catalog::game_ids();
        let games: Vec<String> = match record.game.as_ref() {
            Some(game) if supported.contains(game) => vec![game.clone()],
            _ => supported,
        };
        let platforms: Vec<String> = if platforms.is_empty() {
            catalog::platform_ids()
        } else {
            platforms.to_vec()
        };

        let mut plan = Plan {
            manual: true,
            ..Plan::default()
        };
        for game in &games {
            for platform in &platforms {
                let settled = self
                    .store
                    .get_redemption(&code, game, platform)
                    .await?
                    .is_some_and(|r| r.status.is_terminal());
                if settled {
                    plan.skipped_settled += 1;
                    continue;
                }
                self.store.mark_planned(&code, game, platform).await?;
                plan.attempts.push(Attempt {
                    code: record.clone(),
                    game: game.clone(),
                    platform: platform.clone(),
                });
            }
        }

        tracing::info!(
            "Manual redeem of {}: probing {} game(s) across {} platform(s)",
            code,
            games.len(),
            platforms.len()
        );
        Ok(plan)
    }
}

//! Executes a plan one submission at a time.
//!
//! Each attempt moves through `Pending -> Submitting -> {Recorded, Backoff,
//! Aborted}`; `Backoff` loops back to `Submitting` for the same attempt.
//! Outcomes are written to the store before the next attempt starts.

use std::time::Duration;

use chrono::Utc;

use super::backoff::Backoff;
use super::classifier::classify;
use super::planner::{Attempt, Plan};
use super::shutdown::Shutdown;
use crate::config::Pacing;
use crate::db::TrackingStore;
use crate::error::Result;
use crate::models::{OutcomeKind, RunSummary};
use crate::services::Redeemer;

#[derive(Debug, Clone, Copy, PartialEq)]
enum AttemptState {
    Pending,
    Submitting,
    Recorded(OutcomeKind),
    Backoff(Duration),
    Aborted,
}

pub struct SubmissionLoop<'a> {
    store: &'a TrackingStore,
    redeemer: &'a dyn Redeemer,
    pacing: Pacing,
    shutdown: Shutdown,
    unknown_cap: u32,
}

impl<'a> SubmissionLoop<'a> {
    pub fn new(
        store: &'a TrackingStore,
        redeemer: &'a dyn Redeemer,
        pacing: Pacing,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            redeemer,
            pacing,
            shutdown,
            unknown_cap: 5,
        }
    }

    /// Unrecognised responses after which a pair is reported as failed.
    pub fn with_unknown_cap(mut self, cap: u32) -> Self {
        self.unknown_cap = cap;
        self
    }

    pub async fn run(&mut self, plan: Plan) -> Result<RunSummary> {
        let mut summary = RunSummary {
            skipped_settled: plan.skipped_settled,
            ..RunSummary::default()
        };

        for attempt in &plan.expired {
            self.store
                .record_outcome(
                    &attempt.code.code,
                    &attempt.game,
                    &attempt.platform,
                    OutcomeKind::Expired,
                    Some("expired before submission".to_string()),
                    Utc::now(),
                )
                .await?;
            summary.record(&attempt.platform, OutcomeKind::Expired);
            summary.preclassified_expired += 1;
        }

        let mut backoff = Backoff::from_pacing(&self.pacing);
        let mut submitted: u32 = 0;
        let mut golden_redeemed: u32 = 0;
        let total = plan.attempts.len();

        for (index, attempt) in plan.attempts.iter().enumerate() {
            if self.shutdown.is_triggered() {
                summary.interrupted = true;
                summary.aborted_remaining = (total - index) as u32;
                break;
            }

            if attempt.is_golden() && plan.golden_limit.is_some_and(|limit| golden_redeemed >= limit) {
                tracing::debug!(
                    "Golden key limit reached, leaving {} on {} pending",
                    attempt.code.code,
                    attempt.platform
                );
                summary.quota_skipped += 1;
                continue;
            }

            if submitted > 0 && self.pause_before_next(submitted).await {
                summary.interrupted = true;
                summary.aborted_remaining = (total - index) as u32;
                break;
            }

            tracing::info!(
                "Redeeming {} ({}) for {} on {} [{}/{}]",
                attempt.code.code,
                attempt.code.reward,
                attempt.game,
                attempt.platform,
                index + 1,
                total
            );

            let mut state = AttemptState::Pending;
            loop {
                state = match state {
                    AttemptState::Pending => AttemptState::Submitting,
                    AttemptState::Submitting => {
                        submitted += 1;
                        self.submit(attempt, &mut backoff, &mut summary).await?
                    }
                    AttemptState::Backoff(delay) => {
                        tracing::warn!(
                            "Rate limited ({} in a row), waiting {}s before retrying {}",
                            backoff.streak(),
                            delay.as_secs(),
                            attempt.code.code
                        );
                        if self.shutdown.sleep(delay).await {
                            summary.interrupted = true;
                            AttemptState::Aborted
                        } else {
                            AttemptState::Submitting
                        }
                    }
                    AttemptState::Recorded(_) | AttemptState::Aborted => break,
                };
            }

            match state {
                AttemptState::Recorded(OutcomeKind::Success) if attempt.is_golden() => {
                    golden_redeemed += 1;
                }
                AttemptState::Aborted => {
                    summary.aborted_remaining = (total - index) as u32;
                    break;
                }
                _ => {}
            }
        }

        if plan.manual {
            if summary.confirmed() > 0 {
                tracing::info!("Outcome confirmed: code is on the account");
            } else {
                tracing::warn!("No attempt confirmed the code");
            }
        }
        Ok(summary)
    }

    /// Wait between submissions. Returns `true` if interrupted.
    async fn pause_before_next(&mut self, submitted: u32) -> bool {
        let burst = self.pacing.burst_size;
        if burst > 0 && submitted % burst == 0 {
            tracing::info!(
                "{} submissions sent, pausing {}s",
                submitted,
                self.pacing.burst_pause_secs
            );
            return self.shutdown.sleep(self.pacing.burst_pause()).await;
        }
        self.shutdown.sleep(self.pacing.min_delay()).await
    }

    async fn submit(
        &self,
        attempt: &Attempt,
        backoff: &mut Backoff,
        summary: &mut RunSummary,
    ) -> Result<AttemptState> {
        let (code, game, platform) = (&attempt.code.code, &attempt.game, &attempt.platform);

        let response = match self.redeemer.submit(code, game, platform).await {
            Ok(response) => response,
            Err(e) if !e.is_fatal() => {
                tracing::warn!("Submitting {} for {} on {} failed: {}", code, game, platform, e);
                self.store
                    .touch_attempt(code, game, platform, e.to_string(), Utc::now())
                    .await?;
                summary.transport_failures += 1;
                backoff.reset();
                return Ok(AttemptState::Recorded(OutcomeKind::Unknown));
            }
            Err(e) => return Err(e),
        };

        let kind = classify(&response);
        self.store
            .record_outcome(code, game, platform, kind, Some(response.message.clone()), Utc::now())
            .await?;
        summary.record(platform, kind);

        match kind {
            OutcomeKind::RateLimited => {
                if backoff.streak() + 1 >= self.pacing.max_consecutive_rate_limits {
                    summary.rate_limit_abort = true;
                    tracing::warn!("Rate limited {} times in a row, ending this run", backoff.streak() + 1);
                    return Ok(AttemptState::Aborted);
                }
                Ok(AttemptState::Backoff(backoff.next_delay()))
            }
            OutcomeKind::Unknown => {
                tracing::warn!(
                    "Unrecognised response for {} on {}: {}",
                    code,
                    platform,
                    response.message
                );
                let attempts = self
                    .store
                    .get_redemption(code, game, platform)
                    .await?
                    .map_or(0, |r| r.attempts);
                if attempts >= self.unknown_cap {
                    tracing::error!(
                        "{} for {} on {} failed {} times, skipped from now on unless --bypass-fail",
                        code,
                        game,
                        platform,
                        attempts
                    );
                }
                backoff.reset();
                Ok(AttemptState::Recorded(kind))
            }
            _ => {
                tracing::info!("{} on {}: {}", code, platform, kind);
                backoff.reset();
                Ok(AttemptState::Recorded(kind))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RedeemError;
    use crate::models::{CategoryFilter, NewCode, RawResponse, RedemptionStatus};
    use crate::redeem::planner::{Planner, Target};
    use crate::redeem::shutdown;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const SUCCESS: &str = "Your code was successfully redeemed";
    const SLOW: &str = "Too many requests, slow down";

    /// Answers from a script, then with `fallback` once the script runs out.
    struct ScriptedRedeemer {
        script: Mutex<VecDeque<Result<RawResponse>>>,
        fallback: &'static str,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl ScriptedRedeemer {
        fn new(script: Vec<Result<RawResponse>>, fallback: &'static str) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Redeemer for ScriptedRedeemer {
        async fn submit(&self, code: &str, game: &str, platform: &str) -> Result<RawResponse> {
            self.calls
                .lock()
                .unwrap()
                .push((code.to_string(), game.to_string(), platform.to_string()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RawResponse::new(200, self.fallback)))
        }
    }

    fn feed_code(code: &str, reward: &str, platforms: &[&str]) -> NewCode {
        NewCode {
            code: code.to_string(),
            game: Some("bl3".to_string()),
            platforms: platforms.iter().map(|p| p.to_string()).collect(),
            reward: reward.to_string(),
            category: crate::models::RewardCategory::from_reward(reward),
            title: None,
            description: None,
            source: Some("feed".to_string()),
            expires_at: None,
        }
    }

    fn target(platforms: &[&str]) -> Vec<Target> {
        vec![Target {
            game: "bl3".to_string(),
            platforms: platforms.iter().map(|p| p.to_string()).collect(),
        }]
    }

    fn golden(i: usize) -> String {
        format!("GOLD{}-12345-XXXXX-YYYYY-ZZZZZ", i)
    }

    async fn run(store: &TrackingStore, redeemer: &dyn Redeemer, plan: Plan) -> RunSummary {
        let (_trigger, shutdown) = shutdown::channel();
        SubmissionLoop::new(store, redeemer, Pacing::immediate(), shutdown)
            .run(plan)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn golden_quota_stops_after_n_successes() {
        let store = TrackingStore::open_in_memory().await.unwrap();
        for i in 0..5 {
            store.upsert_code(feed_code(&golden(i), "3 Golden Keys", &[])).await.unwrap();
        }
        store
            .upsert_code(feed_code("SKINS-12345-XXXXX-YYYYY-ZZZZZ", "Cosmetic", &[]))
            .await
            .unwrap();

        let plan = Planner::new(&store, false, 5)
            .plan_mapping(&target(&["steam"]), CategoryFilter::all(), 2, Utc::now())
            .await
            .unwrap();
        let redeemer = ScriptedRedeemer::new(Vec::new(), SUCCESS);
        let summary = run(&store, &redeemer, plan).await;

        let submitted: Vec<String> = redeemer.calls().into_iter().map(|(c, _, _)| c).collect();
        assert_eq!(
            submitted,
            vec![golden(0), golden(1), "SKINS-12345-XXXXX-YYYYY-ZZZZZ".to_string()]
        );
        assert_eq!(summary.quota_skipped, 3);

        for i in 2..5 {
            let record = store.get_redemption(&golden(i), "bl3", "steam").await.unwrap().unwrap();
            assert_eq!(record.status, RedemptionStatus::Pending);
            assert_eq!(record.attempts, 0);
        }
    }

    #[tokio::test]
    async fn redeemed_platform_is_not_replanned() {
        let store = TrackingStore::open_in_memory().await.unwrap();
        let code = "ABCDE-12345-XXXXX-YYYYY-ZZZZZ";
        store.upsert_code(feed_code(code, "Skin", &["steam", "epic"])).await.unwrap();
        let planner = Planner::new(&store, false, 5);

        let plan = planner
            .plan_mapping(&target(&["steam"]), CategoryFilter::all(), 200, Utc::now())
            .await
            .unwrap();
        let redeemer = ScriptedRedeemer::new(Vec::new(), SUCCESS);
        let summary = run(&store, &redeemer, plan).await;
        assert_eq!(summary.count(OutcomeKind::Success), 1);
        let record = store.get_redemption(code, "bl3", "steam").await.unwrap().unwrap();
        assert_eq!(record.status, RedemptionStatus::Redeemed);

        let plan = planner
            .plan_mapping(&target(&["steam", "epic"]), CategoryFilter::all(), 200, Utc::now())
            .await
            .unwrap();
        let pairs: Vec<(&str, &str)> = plan
            .attempts
            .iter()
            .map(|a| (a.code.code.as_str(), a.platform.as_str()))
            .collect();
        assert_eq!(pairs, vec![(code, "epic")]);
    }

    #[tokio::test]
    async fn rate_limit_retries_same_code_then_aborts() {
        let store = TrackingStore::open_in_memory().await.unwrap();
        for i in 0..3 {
            store.upsert_code(feed_code(&golden(i), "Cosmetic", &[])).await.unwrap();
        }
        let plan = Planner::new(&store, false, 5)
            .plan_mapping(&target(&["psn"]), CategoryFilter::all(), 200, Utc::now())
            .await
            .unwrap();

        // One retry after backoff succeeds, then two in a row end the run.
        let redeemer = ScriptedRedeemer::new(
            vec![
                Ok(RawResponse::new(429, "")),
                Ok(RawResponse::new(200, SUCCESS)),
                Ok(RawResponse::new(200, SLOW)),
                Ok(RawResponse::new(429, SLOW)),
            ],
            SUCCESS,
        );
        let summary = run(&store, &redeemer, plan).await;

        let submitted: Vec<String> = redeemer.calls().into_iter().map(|(c, _, _)| c).collect();
        assert_eq!(submitted, vec![golden(0), golden(0), golden(1), golden(1)]);
        assert!(summary.rate_limit_abort);
        assert_eq!(summary.aborted_remaining, 2);
        assert_eq!(summary.count(OutcomeKind::RateLimited), 3);

        let first = store.get_redemption(&golden(0), "bl3", "psn").await.unwrap().unwrap();
        assert_eq!(first.status, RedemptionStatus::Redeemed);
        let last = store.get_redemption(&golden(2), "bl3", "psn").await.unwrap().unwrap();
        assert_eq!(last.status, RedemptionStatus::Pending);
        assert_eq!(last.attempts, 0);
    }

    #[tokio::test]
    async fn transport_failure_does_not_stop_the_queue() {
        let store = TrackingStore::open_in_memory().await.unwrap();
        store.upsert_code(feed_code(&golden(0), "Cosmetic", &[])).await.unwrap();
        store.upsert_code(feed_code(&golden(1), "Cosmetic", &[])).await.unwrap();
        let plan = Planner::new(&store, false, 5)
            .plan_mapping(&target(&["steam"]), CategoryFilter::all(), 200, Utc::now())
            .await
            .unwrap();

        let redeemer = ScriptedRedeemer::new(
            vec![Err(RedeemError::Transport("connection reset".into()))],
            "This SHiFT code has already been redeemed",
        );
        let summary = run(&store, &redeemer, plan).await;

        assert_eq!(summary.transport_failures, 1);
        assert_eq!(summary.count(OutcomeKind::AlreadyRedeemed), 1);
        let failed = store.get_redemption(&golden(0), "bl3", "steam").await.unwrap().unwrap();
        assert_eq!(failed.status, RedemptionStatus::Pending);
        assert_eq!(failed.attempts, 0);
    }

    #[tokio::test]
    async fn fatal_errors_abort_the_run() {
        let store = TrackingStore::open_in_memory().await.unwrap();
        store.upsert_code(feed_code(&golden(0), "Cosmetic", &[])).await.unwrap();
        let plan = Planner::new(&store, false, 5)
            .plan_mapping(&target(&["steam"]), CategoryFilter::all(), 200, Utc::now())
            .await
            .unwrap();

        let redeemer = ScriptedRedeemer::new(
            vec![Err(RedeemError::Config("bad cookie".into()))],
            SUCCESS,
        );
        let (_trigger, shutdown) = shutdown::channel();
        let result = SubmissionLoop::new(&store, &redeemer, Pacing::immediate(), shutdown)
            .run(plan)
            .await;
        assert!(matches!(result, Err(RedeemError::Config(_))));
    }

    #[tokio::test]
    async fn interrupt_leaves_queue_pending() {
        let store = TrackingStore::open_in_memory().await.unwrap();
        store.upsert_code(feed_code(&golden(0), "Cosmetic", &[])).await.unwrap();
        let plan = Planner::new(&store, false, 5)
            .plan_mapping(&target(&["steam", "epic"]), CategoryFilter::all(), 200, Utc::now())
            .await
            .unwrap();

        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();
        let redeemer = ScriptedRedeemer::new(Vec::new(), SUCCESS);
        let summary = SubmissionLoop::new(&store, &redeemer, Pacing::immediate(), shutdown)
            .run(plan)
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.aborted_remaining, 2);
        assert!(redeemer.calls().is_empty());
    }

    #[tokio::test]
    async fn expired_codes_are_recorded_without_submitting() {
        let store = TrackingStore::open_in_memory().await.unwrap();
        let mut old = feed_code(&golden(0), "3 Golden Keys", &[]);
        old.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        store.upsert_code(old).await.unwrap();
        let plan = Planner::new(&store, false, 5)
            .plan_mapping(&target(&["steam"]), CategoryFilter::all(), 200, Utc::now())
            .await
            .unwrap();

        let redeemer = ScriptedRedeemer::new(Vec::new(), SUCCESS);
        let summary = run(&store, &redeemer, plan).await;

        assert!(redeemer.calls().is_empty());
        assert_eq!(summary.preclassified_expired, 1);
        let record = store.get_redemption(&golden(0), "bl3", "steam").await.unwrap().unwrap();
        assert_eq!(record.status, RedemptionStatus::PermanentlyInvalid);
        assert_eq!(record.last_outcome, Some(OutcomeKind::Expired));
    }

    #[tokio::test]
    async fn manual_already_redeemed_counts_as_confirmed() {
        let store = TrackingStore::open_in_memory().await.unwrap();
        let plan = Planner::new(&store, false, 5)
            .plan_manual(&golden(7), &["steam".to_string()], Some(feed_code(&golden(7), "Skin", &[])))
            .await
            .unwrap();

        let redeemer = ScriptedRedeemer::new(Vec::new(), "This code has already been redeemed");
        let summary = run(&store, &redeemer, plan).await;
        assert_eq!(summary.confirmed(), 1);
        assert_eq!(redeemer.calls(), vec![(golden(7), "bl3".to_string(), "steam".to_string())]);
    }

    #[tokio::test]
    async fn repeated_unknown_responses_stop_being_planned() {
        let store = TrackingStore::open_in_memory().await.unwrap();
        store.upsert_code(feed_code(&golden(0), "Cosmetic", &[])).await.unwrap();
        let planner = Planner::new(&store, false, 2);
        let redeemer = ScriptedRedeemer::new(Vec::new(), "Something went sideways");

        for _ in 0..2 {
            let plan = planner
                .plan_mapping(&target(&["steam"]), CategoryFilter::all(), 200, Utc::now())
                .await
                .unwrap();
            let (_trigger, shutdown) = shutdown::channel();
            let summary = SubmissionLoop::new(&store, &redeemer, Pacing::immediate(), shutdown)
                .with_unknown_cap(2)
                .run(plan)
                .await
                .unwrap();
            assert_eq!(summary.count(OutcomeKind::Unknown), 1);
        }

        let plan = planner
            .plan_mapping(&target(&["steam"]), CategoryFilter::all(), 200, Utc::now())
            .await
            .unwrap();
        assert!(plan.attempts.is_empty());
        assert_eq!(plan.skipped_settled, 1);

        let retry = Planner::new(&store, true, 2)
            .plan_mapping(&target(&["steam"]), CategoryFilter::all(), 200, Utc::now())
            .await
            .unwrap();
        assert_eq!(retry.attempts.len(), 1);
    }
}

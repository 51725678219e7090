use chrono::Utc;

use crate::cli::{RunMode, RunPlan};
use crate::config::Config;
use crate::db::TrackingStore;
use crate::error::Result;
use crate::feed::CodeFeed;
use crate::models::{normalize_code, NewCode, RunSummary};
use crate::redeem::{Planner, Shutdown, SubmissionLoop};
use crate::services::Redeemer;

pub struct App {
    config: Config,
    store: TrackingStore,
    feed: CodeFeed,
    redeemer: Box<dyn Redeemer>,
    shutdown: Shutdown,
}

impl App {
    pub async fn new(
        config: Config,
        plan: &RunPlan,
        redeemer: Box<dyn Redeemer>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let path = config.store_path(&plan.profile);
        tracing::debug!("Using store {} for profile '{}'", path.display(), plan.profile);
        let store = TrackingStore::open(&path).await?;

        Ok(Self {
            config,
            store,
            feed: CodeFeed::new(),
            redeemer,
            shutdown,
        })
    }

    /// One full pass: refresh the feed, plan, submit, summarise.
    pub async fn run_once(&self, plan: &RunPlan) -> Result<RunSummary> {
        let planner = Planner::new(
            &self.store,
            plan.bypass_fail,
            self.config.max_unknown_attempts,
        );

        let work = match &plan.mode {
            RunMode::Mapping {
                targets,
                categories,
                golden_limit,
            } => {
                self.refresh_feed(&plan.sources).await?;
                planner
                    .plan_mapping(targets, *categories, *golden_limit, Utc::now())
                    .await?
            }
            RunMode::Manual { code, platforms } => {
                let metadata = self.feed_metadata(&plan.sources, code).await;
                planner.plan_manual(code, platforms, metadata).await?
            }
        };
        self.announce_registry().await?;

        if work.is_empty() {
            tracing::info!("Nothing to redeem");
        }

        let summary = SubmissionLoop::new(
            &self.store,
            self.redeemer.as_ref(),
            self.config.pacing.clone(),
            self.shutdown.clone(),
        )
        .with_unknown_cap(self.config.max_unknown_attempts)
        .run(work)
        .await?;
        summary.log(plan.verbose);
        Ok(summary)
    }

    /// Load the feeds and store every code. Feed trouble is not fatal: the
    /// run continues with whatever the store already knows.
    async fn refresh_feed(&self, sources: &[String]) -> Result<()> {
        let codes = match self.feed.load_all(sources).await {
            Ok(codes) => codes,
            Err(e) if !e.is_fatal() => {
                tracing::warn!("Code feed unavailable, using stored codes: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let total = codes.len();
        let mut added = 0;
        for code in codes {
            if self.store.upsert_code(code).await? {
                added += 1;
            }
        }
        tracing::info!("Feed lists {} codes, {} new", total, added);
        Ok(())
    }

    /// Feed metadata for a single manual code, without storing the rest of the feed.
    async fn feed_metadata(&self, sources: &[String], raw_code: &str) -> Option<NewCode> {
        let code = normalize_code(raw_code)?;
        match self.feed.load_all(sources).await {
            Ok(codes) => codes.into_iter().find(|c| c.code == code),
            Err(e) => {
                tracing::warn!("Could not read code feed, using placeholder metadata: {}", e);
                None
            }
        }
    }

    async fn announce_registry(&self) -> Result<()> {
        for game in self.store.known_games().await? {
            tracing::info!("New game seen: {}", game);
        }
        for platform in self.store.known_platforms().await? {
            tracing::info!("New platform seen: {}", platform);
        }
        Ok(())
    }
}

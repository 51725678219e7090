use std::collections::BTreeMap;

use super::redemption::OutcomeKind;

/// Counters for one invocation of the submission loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub outcomes: BTreeMap<OutcomeKind, u32>,
    pub per_platform: BTreeMap<String, BTreeMap<OutcomeKind, u32>>,
    /// Pairs the planner left out because they were already settled.
    pub skipped_settled: u32,
    /// Expired pairs recorded without a remote call.
    pub preclassified_expired: u32,
    /// Golden-key attempts left pending because the quota was reached.
    pub quota_skipped: u32,
    /// Attempts left pending after a rate-limit abort or an interrupt.
    pub aborted_remaining: u32,
    pub transport_failures: u32,
    pub rate_limit_abort: bool,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn record(&mut self, platform: &str, kind: OutcomeKind) {
        *self.outcomes.entry(kind).or_default() += 1;
        *self
            .per_platform
            .entry(platform.to_string())
            .or_default()
            .entry(kind)
            .or_default() += 1;
    }

    pub fn count(&self, kind: OutcomeKind) -> u32 {
        self.outcomes.get(&kind).copied().unwrap_or(0)
    }

    pub fn attempted(&self) -> u32 {
        self.outcomes.values().sum::<u32>() + self.transport_failures
    }

    /// Success and already-redeemed both confirm the code is on the account.
    pub fn confirmed(&self) -> u32 {
        OutcomeKind::ALL
            .iter()
            .filter(|k| k.is_confirmed())
            .map(|k| self.count(*k))
            .sum()
    }

    pub fn log(&self, verbose: bool) {
        let counts = OutcomeKind::ALL
            .iter()
            .map(|k| format!("{}={}", k, self.count(*k)))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!("Run summary: {}", counts);
        tracing::info!(
            "  skipped (settled)={}, expired={}, over quota={}, transport failures={}, left pending={}",
            self.skipped_settled,
            self.preclassified_expired,
            self.quota_skipped,
            self.transport_failures,
            self.aborted_remaining
        );
        if self.rate_limit_abort {
            tracing::warn!("Run ended early: rate limited repeatedly, remaining codes stay pending");
        }
        if self.interrupted {
            tracing::warn!("Run interrupted, remaining codes stay pending");
        }

        if verbose {
            for (platform, counts) in &self.per_platform {
                let line = counts
                    .iter()
                    .map(|(k, n)| format!("{}={}", k, n))
                    .collect::<Vec<_>>()
                    .join(", ");
                tracing::info!("  {}: {}", platform, line);
            }
        }
    }
}

use crate::models::{OutcomeKind, RawResponse};

/// Known phrase fragments in redemption responses, matched case-insensitively.
///
/// Fragments must be specific enough not to collide with another kind's
/// messages; a response matching two different kinds is treated as unknown.
const PHRASES: &[(&str, OutcomeKind)] = &[
    ("successfully redeemed", OutcomeKind::Success),
    ("your code was successfully", OutcomeKind::Success),
    ("redemption successful", OutcomeKind::Success),
    ("already been redeemed", OutcomeKind::AlreadyRedeemed),
    ("already redeemed", OutcomeKind::AlreadyRedeemed),
    ("does not exist", OutcomeKind::Invalid),
    ("not a valid", OutcomeKind::Invalid),
    ("is not valid", OutcomeKind::Invalid),
    ("not available for your", OutcomeKind::Invalid),
    ("cannot be redeemed on", OutcomeKind::Invalid),
    ("has expired", OutcomeKind::Expired),
    ("code expired", OutcomeKind::Expired),
    ("no longer active", OutcomeKind::Expired),
    ("not yet active", OutcomeKind::NotYetLive),
    ("not active yet", OutcomeKind::NotYetLive),
    ("has not started", OutcomeKind::NotYetLive),
    ("too many requests", OutcomeKind::RateLimited),
    ("slow down", OutcomeKind::RateLimited),
    ("try again later", OutcomeKind::RateLimited),
    ("launch a shift-enabled title", OutcomeKind::RateLimited),
];

/// Map a raw service response to an outcome kind.
///
/// HTTP 429 is always a rate limit. Otherwise the message decides; no match
/// or conflicting matches yield `Unknown`.
pub fn classify(response: &RawResponse) -> OutcomeKind {
    if response.status == 429 {
        return OutcomeKind::RateLimited;
    }

    let message = response.message.to_lowercase();
    let mut matched: Vec<OutcomeKind> = PHRASES
        .iter()
        .filter(|(fragment, _)| message.contains(fragment))
        .map(|(_, kind)| *kind)
        .collect();
    matched.sort();
    matched.dedup();

    match matched.as_slice() {
        [kind] => *kind,
        [] => {
            tracing::debug!(
                "Unrecognised response (HTTP {}): {}",
                response.status,
                response.message
            );
            OutcomeKind::Unknown
        }
        several => {
            tracing::debug!(
                "Ambiguous response matched {:?}, classifying as unknown: {}",
                several,
                response.message
            );
            OutcomeKind::Unknown
        }
    }
}

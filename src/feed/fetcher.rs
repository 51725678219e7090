use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::{RedeemError, Result};
use crate::models::{catalog, normalize_code, parse_expiry, NewCode, RewardCategory};

/// One entry as published by code feeds.
#[derive(Debug, Deserialize)]
struct FeedEntry {
    code: String,
    #[serde(default)]
    game: Option<String>,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    reward: Option<String>,
    #[serde(default)]
    expires: Option<String>,
    /// Bool, number or string depending on the publisher.
    #[serde(default)]
    expired: Option<Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

pub struct CodeFeed {
    client: Client,
}

enum Location {
    Remote(Url),
    Local(PathBuf),
}

fn locate(source: &str) -> Location {
    match Url::parse(source) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Location::Remote(url),
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map(Location::Local)
            .unwrap_or_else(|_| Location::Local(PathBuf::from(source))),
        _ => Location::Local(PathBuf::from(source)),
    }
}

impl CodeFeed {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("shift-redeemer/1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    async fn read(&self, source: &str) -> Result<String> {
        match locate(source) {
            Location::Remote(url) => {
                let response = self.client.get(url).send().await?;
                if !response.status().is_success() {
                    return Err(RedeemError::Feed(format!(
                        "{} answered HTTP {}",
                        source,
                        response.status()
                    )));
                }
                Ok(response.text().await?)
            }
            Location::Local(path) => tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| RedeemError::Feed(format!("cannot read {}: {}", path.display(), e))),
        }
    }

    /// Load the codes published by one source, in feed order.
    pub async fn load_codes(&self, source: &str) -> Result<Vec<NewCode>> {
        let body = self.read(source).await?;
        let codes = parse_feed(&body, source)?;
        tracing::debug!("Loaded {} codes from {}", codes.len(), source);
        Ok(codes)
    }

    /// Load every source, keeping source order. A failing source is logged
    /// and skipped; the first source to publish a code wins.
    pub async fn load_all(&self, sources: &[String]) -> Result<Vec<NewCode>> {
        let results: Vec<(String, Result<Vec<NewCode>>)> = stream::iter(sources.iter().cloned())
            .map(|source| async move {
                let result = self.load_codes(&source).await;
                (source, result)
            })
            .buffered(4)
            .collect()
            .await;

        let mut seen = HashSet::new();
        let mut codes = Vec::new();
        let mut failures = Vec::new();
        for (source, result) in results {
            match result {
                Ok(loaded) => codes.extend(loaded.into_iter().filter(|c| seen.insert(c.code.clone()))),
                Err(e) => {
                    tracing::warn!("Skipping feed {}: {}", source, e);
                    failures.push(e);
                }
            }
        }

        if !sources.is_empty() && failures.len() == sources.len() {
            return Err(failures.remove(0));
        }
        Ok(codes)
    }
}

/// Parse a feed document.
///
/// Accepts a list of `{"codes": [...]}` blocks, a single such block, or a
/// bare list of entries. Entries that do not parse or whose code is not a
/// valid SHiFT code are logged and dropped.
pub fn parse_feed(body: &str, source: &str) -> Result<Vec<NewCode>> {
    let document: Value = serde_json::from_str(body)
        .map_err(|e| RedeemError::Feed(format!("{} is not valid JSON: {}", source, e)))?;

    let entries: Vec<Value> = match document {
        Value::Array(items) => items
            .into_iter()
            .flat_map(|item| match item {
                Value::Object(mut block) if block.contains_key("codes") => match block.remove("codes") {
                    Some(Value::Array(codes)) => codes,
                    _ => Vec::new(),
                },
                other => vec![other],
            })
            .collect(),
        Value::Object(mut block) => match block.remove("codes") {
            Some(Value::Array(codes)) => codes,
            _ => {
                return Err(RedeemError::Feed(format!(
                    "{} has no \"codes\" list",
                    source
                )))
            }
        },
        _ => return Err(RedeemError::Feed(format!("{} has an unexpected layout", source))),
    };

    let mut codes = Vec::new();
    for (index, value) in entries.into_iter().enumerate() {
        let entry: FeedEntry = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping malformed entry #{} in {}: {}", index, source, e);
                continue;
            }
        };
        if let Some(new) = entry_to_code(entry, source) {
            codes.push(new);
        }
    }
    Ok(codes)
}

fn entry_to_code(entry: FeedEntry, source: &str) -> Option<NewCode> {
    if entry
        .kind
        .as_deref()
        .is_some_and(|k| !k.eq_ignore_ascii_case("shift"))
    {
        tracing::debug!("Ignoring non-SHiFT entry {}", entry.code);
        return None;
    }

    let Some(code) = normalize_code(&entry.code) else {
        tracing::warn!("Skipping malformed code {:?} in {}", entry.code, source);
        return None;
    };

    // An explicit expired flag wins over a missing or future expiry date.
    let mut expires_at = entry.expires.as_deref().and_then(parse_expiry);
    if entry.expired.as_ref().is_some_and(flag_is_set) {
        let now = Utc::now();
        if !expires_at.is_some_and(|at| at <= now) {
            expires_at = Some(now);
        }
    }

    let reward = entry
        .reward
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    Some(NewCode {
        code,
        game: entry.game.as_deref().and_then(catalog::canonical_game),
        platforms: entry
            .platform
            .as_deref()
            .map(catalog::parse_platform_list)
            .unwrap_or_default(),
        category: RewardCategory::from_reward(&reward),
        title: entry.title.or_else(|| Some(reward.clone())),
        description: entry.description.or(entry.link),
        reward,
        source: Some(source.to_string()),
        expires_at,
    })
}

fn flag_is_set(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "y"),
        _ => false,
    }
}

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{RedeemError, Result};
use crate::models::{
    catalog, CategoryFilter, CodeRecord, NewCode, OutcomeKind, OutcomeWrite, RedemptionRecord,
    RedemptionStatus, RewardCategory,
};

use super::migrations;

const CODE_COLUMNS: &str = "id, code, game, platforms, reward, category, title, description, source, expires_at, created_at";
const REDEMPTION_COLUMNS: &str =
    "code, game, platform, status, last_outcome, detail, attempts, last_attempt_at";

/// Which pairs `pending_pairs` should yield.
#[derive(Debug, Clone, Copy)]
pub struct PairFilter {
    pub categories: CategoryFilter,
    pub bypass_fail: bool,
    pub max_unknown_attempts: u32,
}

impl Default for PairFilter {
    fn default() -> Self {
        Self {
            categories: CategoryFilter::all(),
            bypass_fail: false,
            max_unknown_attempts: 5,
        }
    }
}

/// A (code, platform) combination that still needs a submission.
#[derive(Debug, Clone)]
pub struct PendingPair {
    pub code: CodeRecord,
    pub platform: String,
}

/// Persistent record of known codes and per-platform redemption state.
///
/// One store per profile. Every write is a single SQLite transaction.
pub struct TrackingStore {
    conn: Connection,
}

impl TrackingStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                RedeemError::StoreIo(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(&path)
            .await
            .map_err(|e| RedeemError::StoreIo(format!("cannot open {}: {}", path.display(), e)))?;
        Self::init(conn).await
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        let version = conn
            .call(|conn| migrations::run_pending(conn).map_err(tokio_rusqlite::Error::from))
            .await?;
        tracing::debug!("Store ready at schema version {}", version);
        Ok(Self { conn })
    }

    // Code operations

    /// Insert a code or refresh its metadata. Returns `true` when the code is new.
    ///
    /// `created_at` is only ever set on insert.
    pub async fn upsert_code(&self, code: NewCode) -> Result<bool> {
        let platforms = serde_json::to_string(&code.platforms)?;
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existed = tx
                    .query_row(
                        "SELECT 1 FROM codes WHERE code = ?1",
                        params![code.code],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                tx.execute(
                    r#"INSERT INTO codes (code, game, platforms, reward, category, title, description, source, expires_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                       ON CONFLICT(code) DO UPDATE SET
                           game = COALESCE(excluded.game, codes.game),
                           platforms = excluded.platforms,
                           reward = excluded.reward,
                           category = excluded.category,
                           title = COALESCE(excluded.title, codes.title),
                           description = COALESCE(excluded.description, codes.description),
                           source = COALESCE(excluded.source, codes.source),
                           expires_at = COALESCE(excluded.expires_at, codes.expires_at),
                           updated_at = datetime('now')"#,
                    params![
                        code.code,
                        code.game,
                        platforms,
                        code.reward,
                        code.category.as_str(),
                        code.title,
                        code.description,
                        code.source,
                        code.expires_at.map(|dt| dt.to_rfc3339()),
                    ],
                )?;
                tx.commit()?;
                Ok(!existed)
            })
            .await?;
        Ok(inserted)
    }

    pub async fn get_code(&self, code: &str) -> Result<Option<CodeRecord>> {
        let code = code.to_string();
        let record = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM codes WHERE code = ?1",
                    CODE_COLUMNS
                ))?;
                let record = stmt.query_row(params![code], code_from_row).optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    // Redemption operations

    pub async fn get_redemption(
        &self,
        code: &str,
        game: &str,
        platform: &str,
    ) -> Result<Option<RedemptionRecord>> {
        let key = (code.to_string(), game.to_string(), platform.to_string());
        let record = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM redemptions WHERE code = ?1 AND game = ?2 AND platform = ?3",
                    REDEMPTION_COLUMNS
                ))?;
                let record = stmt
                    .query_row(params![key.0, key.1, key.2], redemption_from_row)
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    /// Create a pending record for a planned pair if none exists yet.
    pub async fn mark_planned(&self, code: &str, game: &str, platform: &str) -> Result<()> {
        let key = (code.to_string(), game.to_string(), platform.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO redemptions (code, game, platform, status, attempts)
                       VALUES (?1, ?2, ?3, 'pending', 0)
                       ON CONFLICT(code, game, platform) DO NOTHING"#,
                    params![key.0, key.1, key.2],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Record a classified outcome for one pair.
    ///
    /// Terminal records are left untouched; a non-terminal outcome arriving
    /// for one is logged and ignored.
    pub async fn record_outcome(
        &self,
        code: &str,
        game: &str,
        platform: &str,
        outcome: OutcomeKind,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<OutcomeWrite> {
        let key = (code.to_string(), game.to_string(), platform.to_string());
        let write = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT status FROM redemptions WHERE code = ?1 AND game = ?2 AND platform = ?3",
                        params![key.0, key.1, key.2],
                        |row| row.get(0),
                    )
                    .optional()?;

                if let Some(status) = existing.as_deref().and_then(RedemptionStatus::parse) {
                    if status.is_terminal() {
                        if outcome.status().is_terminal() {
                            tracing::debug!(
                                "{} {}:{} already {}, ignoring {}",
                                key.0, key.1, key.2, status.as_str(), outcome
                            );
                        } else {
                            tracing::warn!(
                                "{} {}:{} is {} (terminal), not overwriting with {}",
                                key.0, key.1, key.2, status.as_str(), outcome
                            );
                        }
                        return Ok(OutcomeWrite::IgnoredTerminal);
                    }
                }

                tx.execute(
                    r#"INSERT INTO redemptions (code, game, platform, status, last_outcome, detail, attempts, last_attempt_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
                       ON CONFLICT(code, game, platform) DO UPDATE SET
                           status = excluded.status,
                           last_outcome = excluded.last_outcome,
                           detail = excluded.detail,
                           attempts = redemptions.attempts + 1,
                           last_attempt_at = excluded.last_attempt_at"#,
                    params![
                        key.0,
                        key.1,
                        key.2,
                        outcome.status().as_str(),
                        outcome.as_str(),
                        detail,
                        at.to_rfc3339(),
                    ],
                )?;
                tx.commit()?;
                Ok(OutcomeWrite::Applied)
            })
            .await?;
        Ok(write)
    }

    /// Note a failed submission that never reached classification.
    ///
    /// Keeps the pair pending without counting towards the unknown-outcome cap.
    pub async fn touch_attempt(
        &self,
        code: &str,
        game: &str,
        platform: &str,
        detail: String,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let key = (code.to_string(), game.to_string(), platform.to_string());
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    r#"INSERT INTO redemptions (code, game, platform, status, attempts)
                       VALUES (?1, ?2, ?3, 'pending', 0)
                       ON CONFLICT(code, game, platform) DO NOTHING"#,
                    params![key.0, key.1, key.2],
                )?;
                tx.execute(
                    r#"UPDATE redemptions SET detail = ?4, last_attempt_at = ?5
                       WHERE code = ?1 AND game = ?2 AND platform = ?3
                         AND status NOT IN ('redeemed', 'already_redeemed')"#,
                    params![key.0, key.1, key.2, detail, at.to_rfc3339()],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// All (code, platform) pairs for `game` that still need a submission, in
    /// feed order, then in the order of `platforms`.
    pub async fn pending_pairs(
        &self,
        game: &str,
        platforms: &[String],
        filter: PairFilter,
    ) -> Result<Vec<PendingPair>> {
        let game = game.to_string();
        let (codes, records) = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM codes WHERE game = ?1 ORDER BY id",
                    CODE_COLUMNS
                ))?;
                let codes = stmt
                    .query_map(params![game], code_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM redemptions WHERE game = ?1",
                    REDEMPTION_COLUMNS
                ))?;
                let records = stmt
                    .query_map(params![game], redemption_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok((codes, records))
            })
            .await?;

        let mut by_pair: HashMap<(String, String), RedemptionRecord> = records
            .into_iter()
            .map(|r| ((r.code.clone(), r.platform.clone()), r))
            .collect();

        let mut pairs = Vec::new();
        for code in codes {
            if !filter.categories.allows(code.category) {
                continue;
            }
            for platform in platforms {
                if !code.applies_to(platform) {
                    continue;
                }
                let blocked = by_pair
                    .remove(&(code.code.clone(), platform.clone()))
                    .is_some_and(|r| {
                        r.blocks_planning(filter.bypass_fail, filter.max_unknown_attempts)
                    });
                if blocked {
                    continue;
                }
                pairs.push(PendingPair {
                    code: code.clone(),
                    platform: platform.clone(),
                });
            }
        }
        Ok(pairs)
    }

    /// Number of pairs for `game` on `platforms` that are already settled.
    pub async fn settled_count(
        &self,
        game: &str,
        platforms: &[String],
        filter: PairFilter,
    ) -> Result<u32> {
        let game = game.to_string();
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM redemptions WHERE game = ?1",
                    REDEMPTION_COLUMNS
                ))?;
                let records = stmt
                    .query_map(params![game], redemption_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;
        let count = records
            .iter()
            .filter(|r| platforms.contains(&r.platform))
            .filter(|r| r.blocks_planning(filter.bypass_fail, filter.max_unknown_attempts))
            .count();
        Ok(count as u32)
    }

    // Registry

    /// Games observed in stored codes or redemptions that were never
    /// announced before. They are remembered, so each is returned once.
    pub async fn known_games(&self) -> Result<BTreeSet<String>> {
        let fresh = self
            .conn
            .call(|conn| {
                let tx = conn.transaction()?;
                let observed: BTreeSet<String> = {
                    let mut stmt = tx.prepare(
                        r#"SELECT game FROM codes WHERE game IS NOT NULL
                           UNION SELECT game FROM redemptions"#,
                    )?;
                    let rows = stmt
                        .query_map([], |row| row.get::<_, String>(0))?
                        .collect::<std::result::Result<BTreeSet<_>, _>>()?;
                    rows
                };
                let fresh = register(&tx, "seen_games", observed, |id| {
                    catalog::SUPPORTED_GAMES
                        .iter()
                        .find(|(key, _)| *key == id)
                        .map(|(_, name)| name.to_string())
                })?;
                tx.commit()?;
                Ok(fresh)
            })
            .await?;
        Ok(fresh)
    }

    /// Platforms observed in stored codes or redemptions that were never
    /// announced before.
    pub async fn known_platforms(&self) -> Result<BTreeSet<String>> {
        let fresh = self
            .conn
            .call(|conn| {
                let tx = conn.transaction()?;
                let mut observed: BTreeSet<String> = BTreeSet::new();
                {
                    let mut stmt = tx.prepare("SELECT DISTINCT platform FROM redemptions")?;
                    for platform in stmt.query_map([], |row| row.get::<_, String>(0))? {
                        observed.insert(platform?);
                    }
                    let mut stmt = tx.prepare("SELECT DISTINCT platforms FROM codes")?;
                    for list in stmt.query_map([], |row| row.get::<_, String>(0))? {
                        let list: Vec<String> = serde_json::from_str(&list?).unwrap_or_default();
                        observed.extend(list);
                    }
                }
                let fresh = register(&tx, "seen_platforms", observed, |id| {
                    catalog::SUPPORTED_PLATFORMS
                        .iter()
                        .find(|(key, _)| *key == id)
                        .map(|(_, name)| name.to_string())
                })?;
                tx.commit()?;
                Ok(fresh)
            })
            .await?;
        Ok(fresh)
    }
}

fn register(
    tx: &rusqlite::Transaction,
    table: &str,
    observed: BTreeSet<String>,
    display_name: impl Fn(&str) -> Option<String>,
) -> rusqlite::Result<BTreeSet<String>> {
    let mut fresh = BTreeSet::new();
    for id in observed {
        let inserted = tx.execute(
            &format!(
                "INSERT INTO {} (key, name) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
                table
            ),
            params![id, display_name(&id).unwrap_or_else(|| id.clone())],
        )?;
        if inserted > 0 {
            fresh.insert(id);
        }
    }
    Ok(fresh)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // RFC3339 for values we write, SQLite datetime() for column defaults
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn code_from_row(row: &Row) -> rusqlite::Result<CodeRecord> {
    let platforms: String = row.get(3)?;
    let category: String = row.get(5)?;
    Ok(CodeRecord {
        id: row.get(0)?,
        code: row.get(1)?,
        game: row.get(2)?,
        platforms: serde_json::from_str(&platforms).unwrap_or_default(),
        reward: row.get(4)?,
        category: RewardCategory::parse(&category).unwrap_or(RewardCategory::Other),
        title: row.get(6)?,
        description: row.get(7)?,
        source: row.get(8)?,
        expires_at: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| parse_datetime(&s)),
        created_at: row
            .get::<_, String>(10)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    })
}

fn redemption_from_row(row: &Row) -> rusqlite::Result<RedemptionRecord> {
    let status: String = row.get(3)?;
    Ok(RedemptionRecord {
        code: row.get(0)?,
        game: row.get(1)?,
        platform: row.get(2)?,
        status: RedemptionStatus::parse(&status).unwrap_or_default(),
        last_outcome: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| OutcomeKind::parse(&s)),
        detail: row.get(5)?,
        attempts: row.get(6)?,
        last_attempt_at: row
            .get::<_, Option<String>>(7)?
            .and_then(|s| parse_datetime(&s)),
    })
}

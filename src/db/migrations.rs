//! Versioned schema migrations.
//!
//! Applied versions are recorded in `schema_migrations`. Each migration runs
//! in its own transaction together with the insert of its version row, so a
//! crash leaves the store at the previous version and the migration is
//! simply re-run on the next open.

use std::collections::HashMap;

use rusqlite::{params, Connection, Transaction};

use super::schema::{MIGRATIONS_TABLE, SCHEMA_V1, SCHEMA_VERSION};
use crate::error::{RedeemError, Result};
use crate::models::{catalog, normalize_code, OutcomeKind, RewardCategory};

const LEGACY_DETAIL: &str = "reconstructed from legacy redeemed flag";

pub fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

pub fn current_version(conn: &Connection) -> rusqlite::Result<u32> {
    if !table_exists(conn, "schema_migrations")? {
        return Ok(0);
    }
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
}

/// Bring the store up to `SCHEMA_VERSION`. Returns the resulting version.
pub fn run_pending(conn: &mut Connection) -> Result<u32> {
    let from = current_version(conn)?;
    if from > SCHEMA_VERSION {
        return Err(RedeemError::StoreCorrupt(format!(
            "schema version {} is newer than supported version {}",
            from, SCHEMA_VERSION
        )));
    }

    conn.execute_batch(MIGRATIONS_TABLE)?;

    for version in (from + 1)..=SCHEMA_VERSION {
        let tx = conn.transaction()?;
        apply(&tx, version)?;
        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            params![version],
        )?;
        tx.commit()?;
        tracing::info!("Migrated store to schema version {}", version);
    }

    // A legacy `keys` table next to an up-to-date version marker means the
    // reconciliation never finished (or an old file was copied back in).
    if from >= 2 && table_exists(conn, "keys")? {
        tracing::warn!("Found unreconciled legacy keys table, reprocessing all legacy rows");
        let tx = conn.transaction()?;
        reconcile_legacy(&tx)?;
        tx.commit()?;
    }

    Ok(SCHEMA_VERSION)
}

fn apply(tx: &Transaction, version: u32) -> Result<()> {
    match version {
        1 => {
            tx.execute_batch(SCHEMA_V1)?;
            seed_registry(tx)
        }
        2 => reconcile_legacy(tx).map(|_| ()),
        3 => drop_malformed_codes(tx),
        other => Err(RedeemError::StoreCorrupt(format!(
            "no migration registered for version {}",
            other
        ))),
    }
}

/// Supported games and platforms are known from the start and never
/// announced as new.
fn seed_registry(tx: &Transaction) -> Result<()> {
    for (table, entries) in [
        ("seen_games", catalog::SUPPORTED_GAMES),
        ("seen_platforms", catalog::SUPPORTED_PLATFORMS),
    ] {
        for (key, name) in entries {
            tx.execute(
                &format!(
                    "INSERT INTO {} (key, name) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
                    table
                ),
                params![key, name],
            )?;
        }
    }
    Ok(())
}

struct LegacyCode {
    game: Option<String>,
    platforms: Option<Vec<String>>,
    reward: String,
}

/// Re-key the flat `keys` layout into one row per (code, game, platform).
///
/// Reconstruction rules for the old flag:
/// - `pc` rows stand for both `steam` and `epic` and carry the flag to both.
/// - A flagged row with a concrete platform marks that platform
///   already-redeemed; an unflagged one leaves a pending row.
/// - A flagged `universal` row cannot tell which platforms were used, so no
///   redemption rows are created for it and the code stays pending everywhere.
/// - Rows from a `redeemed_keys (key_id, platform)` side table, when present,
///   mark their platform already-redeemed.
/// - Rows from a `failed_keys (key_id, platform, status, detail)` side table
///   become invalid rows carrying their recorded outcome, unless the platform
///   is already marked redeemed.
///
/// Inserts never overwrite existing rows, so running this again over the same
/// legacy data yields the same row set.
pub fn reconcile_legacy(tx: &Transaction) -> Result<usize> {
    let source = if table_exists(tx, "keys")? {
        "keys"
    } else if table_exists(tx, "legacy_keys")? {
        "legacy_keys"
    } else {
        return Ok(0);
    };

    let cols = columns(tx, source)?;
    let has = |name: &str| cols.iter().any(|c| c == name);
    let code_col = if has("code") { "code" } else { "key" };
    let reward_col = if has("reward") {
        "reward"
    } else if has("description") {
        "description"
    } else {
        "NULL"
    };
    let flag_col = if has("redeemed") { "redeemed" } else { "0" };

    let sql = format!(
        "SELECT id, {}, {}, platform, game, {} FROM {} ORDER BY id",
        code_col, reward_col, flag_col, source
    );
    let rows: Vec<(i64, Option<String>, Option<String>, Option<String>, Option<String>, i64)> = {
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let mut order: Vec<String> = Vec::new();
    let mut codes: HashMap<String, LegacyCode> = HashMap::new();
    let mut by_id: HashMap<i64, (String, Option<String>)> = HashMap::new();
    let mut marks: Vec<(String, String, String, bool)> = Vec::new();
    let mut unknowable = 0usize;

    for (id, raw_code, reward, platform, game, flag) in rows {
        let Some(code) = raw_code.as_deref().and_then(normalize_code) else {
            tracing::debug!("Skipping malformed legacy code {:?}", raw_code);
            continue;
        };
        let game = game.as_deref().and_then(catalog::canonical_game);
        let expanded = match platform.as_deref().map(str::trim) {
            None | Some("") => Vec::new(),
            Some(p) => catalog::expand_platform(p).unwrap_or_else(|| vec![p.to_lowercase()]),
        };

        let entry = codes.entry(code.clone()).or_insert_with(|| {
            order.push(code.clone());
            LegacyCode {
                game: game.clone(),
                platforms: Some(Vec::new()),
                reward: String::new(),
            }
        });
        if entry.game.is_none() {
            entry.game = game.clone();
        }
        if entry.reward.is_empty() {
            entry.reward = reward.unwrap_or_default().trim().to_string();
        }
        if expanded.is_empty() {
            entry.platforms = None;
        } else if let Some(known) = entry.platforms.as_mut() {
            for p in &expanded {
                if !known.contains(p) {
                    known.push(p.clone());
                }
            }
        }
        by_id.insert(id, (code.clone(), game.clone()));

        let Some(game) = game else { continue };
        if expanded.is_empty() {
            if flag != 0 {
                unknowable += 1;
            }
            continue;
        }
        for p in expanded {
            marks.push((code.clone(), game.clone(), p, flag != 0));
        }
    }

    let side_table = if table_exists(tx, "redeemed_keys")? {
        Some("redeemed_keys")
    } else if table_exists(tx, "legacy_redeemed_keys")? {
        Some("legacy_redeemed_keys")
    } else {
        None
    };
    if let Some(side) = side_table {
        let mut stmt = tx.prepare(&format!("SELECT key_id, platform FROM {}", side))?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (key_id, platform) in pairs {
            if let Some((code, Some(game))) = by_id.get(&key_id) {
                for p in catalog::expand_platform(&platform)
                    .filter(|ids| !ids.is_empty())
                    .unwrap_or_else(|| vec![platform.to_lowercase()])
                {
                    marks.push((code.clone(), game.clone(), p, true));
                }
            }
        }
    }

    let failed_table = if table_exists(tx, "failed_keys")? {
        Some("failed_keys")
    } else if table_exists(tx, "legacy_failed_keys")? {
        Some("legacy_failed_keys")
    } else {
        None
    };
    let mut failures: Vec<(String, String, String, OutcomeKind, Option<String>)> = Vec::new();
    if let Some(failed) = failed_table {
        let mut stmt = tx.prepare(&format!(
            "SELECT key_id, platform, status, detail FROM {} ORDER BY key_id",
            failed
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (key_id, platform, status, detail) in rows {
            let Some((code, Some(game))) = by_id.get(&key_id) else {
                continue;
            };
            let outcome = match status
                .as_deref()
                .map(|s| s.trim().to_uppercase())
                .and_then(|s| OutcomeKind::parse(&s))
            {
                Some(OutcomeKind::Expired) => OutcomeKind::Expired,
                _ => OutcomeKind::Invalid,
            };
            for p in catalog::expand_platform(&platform)
                .filter(|ids| !ids.is_empty())
                .unwrap_or_else(|| vec![platform.to_lowercase()])
            {
                failures.push((code.clone(), game.clone(), p, outcome, detail.clone()));
            }
        }
    }

    for code in &order {
        let legacy = &codes[code];
        let reward = if legacy.reward.is_empty() {
            "Unknown".to_string()
        } else {
            legacy.reward.clone()
        };
        let platforms = serde_json::to_string(legacy.platforms.as_deref().unwrap_or(&[]))?;
        tx.execute(
            r#"INSERT INTO codes (code, game, platforms, reward, category, source)
               VALUES (?1, ?2, ?3, ?4, ?5, 'legacy')
               ON CONFLICT(code) DO NOTHING"#,
            params![
                code,
                legacy.game,
                platforms,
                reward,
                RewardCategory::from_reward(&reward).as_str()
            ],
        )?;
    }

    // Redeemed marks first, then recorded failures, then plain pending rows,
    // so the strongest fact about a pair wins.
    for (code, game, platform, _) in marks.iter().filter(|m| m.3) {
        tx.execute(
            r#"INSERT INTO redemptions (code, game, platform, status, last_outcome, detail, attempts)
               VALUES (?1, ?2, ?3, 'already_redeemed', 'ALREADY_REDEEMED', ?4, 0)
               ON CONFLICT(code, game, platform) DO NOTHING"#,
            params![code, game, platform, LEGACY_DETAIL],
        )?;
    }
    for (code, game, platform, outcome, detail) in &failures {
        tx.execute(
            r#"INSERT INTO redemptions (code, game, platform, status, last_outcome, detail, attempts)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
               ON CONFLICT(code, game, platform) DO NOTHING"#,
            params![
                code,
                game,
                platform,
                outcome.status().as_str(),
                outcome.as_str(),
                detail
            ],
        )?;
    }
    for (code, game, platform, _) in marks.iter().filter(|m| !m.3) {
        tx.execute(
            r#"INSERT INTO redemptions (code, game, platform, status, attempts)
               VALUES (?1, ?2, ?3, 'pending', 0)
               ON CONFLICT(code, game, platform) DO NOTHING"#,
            params![code, game, platform],
        )?;
    }

    if unknowable > 0 {
        tracing::info!(
            "{} legacy redeemed codes had no platform recorded, leaving them pending",
            unknowable
        );
    }

    if source == "keys" {
        if table_exists(tx, "legacy_keys")? {
            tx.execute_batch("DROP TABLE legacy_keys")?;
        }
        tx.execute_batch("ALTER TABLE keys RENAME TO legacy_keys")?;
    }
    if side_table == Some("redeemed_keys") {
        if table_exists(tx, "legacy_redeemed_keys")? {
            tx.execute_batch("DROP TABLE legacy_redeemed_keys")?;
        }
        tx.execute_batch("ALTER TABLE redeemed_keys RENAME TO legacy_redeemed_keys")?;
    }
    if failed_table == Some("failed_keys") {
        if table_exists(tx, "legacy_failed_keys")? {
            tx.execute_batch("DROP TABLE legacy_failed_keys")?;
        }
        tx.execute_batch("ALTER TABLE failed_keys RENAME TO legacy_failed_keys")?;
    }

    tracing::info!("Reconciled {} legacy codes", order.len());
    Ok(order.len())
}

/// Remove stored codes that are not in canonical 5x5 form, and backfill
/// registry display names.
fn drop_malformed_codes(tx: &Transaction) -> Result<()> {
    let stored: Vec<String> = {
        let mut stmt = tx.prepare("SELECT code FROM codes")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let mut removed = 0;
    for code in stored {
        if normalize_code(&code).as_deref() == Some(code.as_str()) {
            continue;
        }
        tx.execute("DELETE FROM redemptions WHERE code = ?1", params![code])?;
        tx.execute("DELETE FROM codes WHERE code = ?1", params![code])?;
        tracing::info!("Removed malformed code {:?}", code);
        removed += 1;
    }
    if removed > 0 {
        tracing::info!("Migration removed {} malformed codes", removed);
    }

    tx.execute_batch(
        r#"UPDATE seen_platforms SET name = key WHERE name IS NULL OR TRIM(name) = '';
           UPDATE seen_games SET name = key WHERE name IS NULL OR TRIM(name) = '';"#,
    )?;
    Ok(())
}

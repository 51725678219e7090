/// Highest schema version this build understands.
pub const SCHEMA_VERSION: u32 = 3;

pub const MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Version 1: per-(code, game, platform) tracking.
pub const SCHEMA_V1: &str = r#"
-- codes table (one row per code, never deleted)
CREATE TABLE IF NOT EXISTS codes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    game TEXT,
    platforms TEXT NOT NULL DEFAULT '[]',
    reward TEXT NOT NULL DEFAULT 'Unknown',
    category TEXT NOT NULL DEFAULT 'other',
    title TEXT,
    description TEXT,
    source TEXT,
    expires_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_codes_game ON codes(game);

-- redemptions table (one row per code/game/platform)
CREATE TABLE IF NOT EXISTS redemptions (
    code TEXT NOT NULL,
    game TEXT NOT NULL,
    platform TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    last_outcome TEXT,
    detail TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TEXT,
    PRIMARY KEY (code, game, platform)
);

CREATE INDEX IF NOT EXISTS idx_redemptions_game ON redemptions(game);

-- registries of identifiers already announced to the operator
CREATE TABLE IF NOT EXISTS seen_games (
    key TEXT PRIMARY KEY,
    name TEXT,
    first_seen TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS seen_platforms (
    key TEXT PRIMARY KEY,
    name TEXT,
    first_seen TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Flat layout used before per-platform tracking: one `redeemed` flag per row.
#[cfg(test)]
pub const LEGACY_SCHEMA: &str = r#"
CREATE TABLE keys (
    id INTEGER PRIMARY KEY,
    description TEXT,
    key TEXT,
    platform TEXT,
    game TEXT,
    redeemed INTEGER
);
"#;

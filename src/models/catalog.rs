//! Static game and platform identifiers the redemption service understands.
//!
//! Short ids (`bl3`, `steam`) are what the store keys on; display names are
//! what the code feeds publish.

pub const SUPPORTED_GAMES: &[(&str, &str)] = &[
    ("bl4", "Borderlands 4"),
    ("bl3", "Borderlands 3"),
    ("blps", "Borderlands: The Pre-Sequel"),
    ("bl2", "Borderlands 2"),
    ("bl1", "Borderlands: Game of the Year Edition"),
    ("ttw", "Tiny Tina's Wonderlands"),
    ("gdfll", "Godfall"),
];

pub const SUPPORTED_PLATFORMS: &[(&str, &str)] = &[
    ("epic", "Epic Games"),
    ("steam", "Steam"),
    ("xboxlive", "Xbox Live"),
    ("psn", "PlayStation Network"),
    ("nintendo", "Nintendo"),
    ("stadia", "Stadia"),
];

const GAME_ALIASES: &[(&str, &str)] = &[
    ("borderlands 4", "bl4"),
    ("borderlands 3", "bl3"),
    ("borderlands: the pre-sequel", "blps"),
    ("borderlands the pre-sequel", "blps"),
    ("the pre-sequel", "blps"),
    ("borderlands 2", "bl2"),
    ("borderlands: game of the year edition", "bl1"),
    ("borderlands goty", "bl1"),
    ("borderlands", "bl1"),
    ("bl", "bl1"),
    ("tiny tina's wonderlands", "ttw"),
    ("tiny tinas wonderlands", "ttw"),
    ("wonderlands", "ttw"),
    ("godfall", "gdfll"),
];

const PLATFORM_ALIASES: &[(&str, &[&str])] = &[
    ("universal", &[]),
    ("all", &[]),
    ("pc", &["steam", "epic"]),
    ("epic", &["epic"]),
    ("epic games", &["epic"]),
    ("egs", &["epic"]),
    ("steam", &["steam"]),
    ("xbox", &["xboxlive"]),
    ("xboxlive", &["xboxlive"]),
    ("xbox live", &["xboxlive"]),
    ("playstation", &["psn"]),
    ("playstation network", &["psn"]),
    ("ps", &["psn"]),
    ("psn", &["psn"]),
    ("nintendo", &["nintendo"]),
    ("switch", &["nintendo"]),
    ("stadia", &["stadia"]),
];

pub fn game_ids() -> Vec<String> {
    SUPPORTED_GAMES.iter().map(|(id, _)| id.to_string()).collect()
}

pub fn platform_ids() -> Vec<String> {
    SUPPORTED_PLATFORMS
        .iter()
        .map(|(id, _)| id.to_string())
        .collect()
}

/// Map a feed display name or short id to a game id.
///
/// Unknown titles are kept as their lower-cased name so new games still get
/// tracked and show up in the registry delta.
pub fn canonical_game(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    if SUPPORTED_GAMES.iter().any(|(id, _)| *id == lowered) {
        return Some(lowered);
    }
    if let Some((_, id)) = GAME_ALIASES.iter().find(|(alias, _)| *alias == lowered) {
        return Some(id.to_string());
    }
    Some(lowered)
}

/// Expand one platform token into canonical ids.
///
/// `Some(vec![])` means "every platform"; `None` means the token is unknown.
pub fn expand_platform(raw: &str) -> Option<Vec<String>> {
    let lowered = raw.trim().to_lowercase();
    PLATFORM_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, ids)| ids.iter().map(|id| id.to_string()).collect())
}

/// Parse a feed platform field such as `"Steam, Epic"` or `"Universal"`.
///
/// An empty result means the code applies to every platform.
pub fn parse_platform_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in raw.split([',', '/', '|', ';']) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match expand_platform(token) {
            Some(ids) if ids.is_empty() => return Vec::new(),
            Some(ids) => {
                for id in ids {
                    if !out.contains(&id) {
                        out.push(id);
                    }
                }
            }
            None => {
                tracing::debug!("Unknown platform token '{}' in feed, keeping as-is", token);
                let id = token.to_lowercase();
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_display_names_to_short_ids() {
        assert_eq!(canonical_game("Borderlands 3").as_deref(), Some("bl3"));
        assert_eq!(canonical_game("bl2").as_deref(), Some("bl2"));
        assert_eq!(canonical_game("bl").as_deref(), Some("bl1"));
        assert_eq!(canonical_game("New Tales").as_deref(), Some("new tales"));
        assert_eq!(canonical_game("  "), None);
    }

    #[test]
    fn universal_and_pc_expand() {
        assert!(parse_platform_list("Universal").is_empty());
        assert_eq!(parse_platform_list("PC"), vec!["steam", "epic"]);
        assert_eq!(
            parse_platform_list("Steam, Xbox / PlayStation"),
            vec!["steam", "xboxlive", "psn"]
        );
    }
}

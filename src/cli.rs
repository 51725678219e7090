use std::time::Duration;

use clap::Parser;

use crate::config::{Config, DEFAULT_PROFILE};
use crate::error::{RedeemError, Result};
use crate::models::{catalog, looks_like_code, CategoryFilter};
use crate::redeem::{interval_from_hours, Target};

#[derive(Parser, Debug)]
#[command(name = "shift-redeemer", version, about = "Redeem SHiFT codes and track them per platform")]
pub struct Args {
    /// `game:platform[,platform]` targets, or a single SHiFT code (optionally `CODE:platform`)
    #[arg(long, num_args = 1.., value_name = "TARGET")]
    pub redeem: Option<Vec<String>>,

    /// Golden-key codes (combines with --non-golden and --other)
    #[arg(long)]
    pub golden: bool,

    /// Non-golden key codes (diamond keys and the like)
    #[arg(long)]
    pub non_golden: bool,

    /// Cosmetic and other codes
    #[arg(long)]
    pub other: bool,

    /// Maximum golden keys to redeem per run
    #[arg(long)]
    pub limit: Option<u32>,

    /// Keep running, redeeming every HOURS (minimum applies)
    #[arg(long, num_args = 0..=1, value_name = "HOURS", default_missing_value = "2")]
    pub schedule: Option<f64>,

    /// Superseded by --redeem game:platform
    #[arg(long, num_args = 1.., hide = true)]
    pub games: Option<Vec<String>>,

    /// Superseded by --redeem game:platform
    #[arg(long, num_args = 1.., hide = true)]
    pub platforms: Option<Vec<String>>,

    /// Retry codes that previously failed or expired
    #[arg(long)]
    pub bypass_fail: bool,

    /// Profile name; each profile has its own redemption store
    #[arg(long)]
    pub profile: Option<String>,

    /// Code feed URL or path, replacing the configured feeds
    #[arg(long)]
    pub shift_source: Option<String>,

    /// Debug logging and per-platform summaries
    #[arg(short, long)]
    pub verbose: bool,
}

/// What one invocation should do.
#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    Mapping {
        targets: Vec<Target>,
        categories: CategoryFilter,
        golden_limit: u32,
    },
    Manual {
        code: String,
        platforms: Vec<String>,
    },
}

/// Validated invocation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub mode: RunMode,
    pub schedule: Option<Duration>,
    pub bypass_fail: bool,
    pub profile: String,
    pub sources: Vec<String>,
    pub verbose: bool,
}

impl RunPlan {
    pub fn is_manual(&self) -> bool {
        matches!(self.mode, RunMode::Manual { .. })
    }
}

impl Args {
    /// Check flag combinations and resolve them against config and environment.
    ///
    /// Every conflict is reported here, before the store is opened or any
    /// request is made.
    pub fn into_plan(self, config: &Config, env: impl Fn(&str) -> Option<String>) -> Result<RunPlan> {
        if self.games.is_some() || self.platforms.is_some() {
            return Err(RedeemError::UnsupportedFlag(
                "--games/--platforms were replaced by --redeem game:platform".to_string(),
            ));
        }

        let entries: Vec<String> = self
            .redeem
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if entries.is_empty() {
            return Err(RedeemError::UnsupportedFlag(
                "nothing to redeem: pass --redeem game:platform or --redeem CODE".to_string(),
            ));
        }

        let manual_entries = entries
            .iter()
            .filter(|e| looks_like_code(e.split(':').next().unwrap_or_default()))
            .count();

        let mode = if manual_entries > 0 {
            if manual_entries != entries.len() {
                return Err(RedeemError::UnsupportedFlag(
                    "cannot mix a SHiFT code with game:platform targets in --redeem".to_string(),
                ));
            }
            if entries.len() > 1 {
                return Err(RedeemError::UnsupportedFlag(
                    "manual --redeem takes exactly one SHiFT code".to_string(),
                ));
            }
            self.check_manual_flags()?;
            let (code, platforms) = match entries[0].split_once(':') {
                Some((code, platforms)) => (code.to_string(), parse_platforms(platforms)?),
                None => (entries[0].clone(), Vec::new()),
            };
            RunMode::Manual { code, platforms }
        } else {
            RunMode::Mapping {
                targets: parse_targets(&entries)?,
                categories: self.categories(),
                golden_limit: self.limit.unwrap_or(config.default_golden_limit),
            }
        };

        let profile = self
            .profile
            .clone()
            .or_else(|| env("SHIFT_PROFILE"))
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        if profile.contains(['/', '\\']) || profile == ".." {
            return Err(RedeemError::Config(format!("invalid profile name '{}'", profile)));
        }

        let sources = match self.shift_source.as_deref() {
            Some(source) => vec![source.to_string()],
            None => config.feed_sources.clone(),
        };

        Ok(RunPlan {
            mode,
            schedule: self
                .schedule
                .map(|hours| interval_from_hours(hours, config.min_schedule_hours)),
            bypass_fail: self.bypass_fail,
            profile,
            sources,
            verbose: self.verbose,
        })
    }

    fn check_manual_flags(&self) -> Result<()> {
        let conflicts: Vec<&str> = [
            (self.schedule.is_some(), "--schedule"),
            (self.limit.is_some(), "--limit"),
            (self.golden, "--golden"),
            (self.non_golden, "--non-golden"),
            (self.other, "--other"),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .map(|(_, flag)| flag)
        .collect();

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(RedeemError::UnsupportedFlag(format!(
                "{} cannot be combined with a single-code --redeem",
                conflicts.join(", ")
            )))
        }
    }

    /// Category flags combine; none at all selects every group.
    fn categories(&self) -> CategoryFilter {
        if !(self.golden || self.non_golden || self.other) {
            return CategoryFilter::all();
        }
        CategoryFilter {
            golden: self.golden,
            non_golden: self.non_golden,
            other: self.other,
        }
    }
}

fn parse_platforms(raw: &str) -> Result<Vec<String>> {
    let mut platforms = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match catalog::expand_platform(token) {
            Some(ids) if ids.is_empty() => return Ok(catalog::platform_ids()),
            Some(ids) => {
                for id in ids {
                    if !platforms.contains(&id) {
                        platforms.push(id);
                    }
                }
            }
            None => {
                return Err(RedeemError::UnsupportedFlag(format!(
                    "unknown platform '{}'",
                    token
                )))
            }
        }
    }
    Ok(platforms)
}

/// Parse `game:platform,...` entries, merging repeated games in first-seen order.
fn parse_targets(entries: &[String]) -> Result<Vec<Target>> {
    let mut targets: Vec<Target> = Vec::new();
    for entry in entries {
        let Some((game, platforms)) = entry.split_once(':') else {
            return Err(RedeemError::UnsupportedFlag(format!(
                "'{}' is neither a SHiFT code nor a game:platform target",
                entry
            )));
        };
        let game = catalog::canonical_game(game).ok_or_else(|| {
            RedeemError::UnsupportedFlag(format!("'{}' names no game", entry))
        })?;
        let mut platforms = parse_platforms(platforms)?;
        if platforms.is_empty() {
            platforms = catalog::platform_ids();
        }

        match targets.iter_mut().find(|t| t.game == game) {
            Some(existing) => {
                for p in platforms {
                    if !existing.platforms.contains(&p) {
                        existing.platforms.push(p);
                    }
                }
            }
            None => targets.push(Target { game, platforms }),
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: &str = "ABCDE-12345-XXXXX-YYYYY-ZZZZZ";

    fn plan(args: &[&str]) -> Result<RunPlan> {
        let mut argv = vec!["shift-redeemer"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv)
            .expect("clap accepts the arguments")
            .into_plan(&Config::default(), |_| None)
    }

    fn unsupported(result: Result<RunPlan>) -> bool {
        matches!(result, Err(RedeemError::UnsupportedFlag(_)))
    }

    #[test]
    fn mapping_targets_merge_per_game() {
        let plan = plan(&["--redeem", "bl3:steam", "Borderlands 3:epic,steam", "bl2:pc"]).unwrap();
        let RunMode::Mapping { targets, categories, golden_limit } = plan.mode else {
            panic!("expected mapping mode");
        };
        assert_eq!(
            targets,
            vec![
                Target { game: "bl3".into(), platforms: vec!["steam".into(), "epic".into()] },
                Target { game: "bl2".into(), platforms: vec!["steam".into(), "epic".into()] },
            ]
        );
        assert_eq!(categories, CategoryFilter::all());
        assert_eq!(golden_limit, 200);
        assert_eq!(plan.profile, "default");
    }

    #[test]
    fn manual_code_with_platform_filter() {
        let plan = plan(&["--redeem", "abcde12345xxxxxyyyyyzzzzz:psn,xbox"]).unwrap();
        assert!(plan.is_manual());
        assert_eq!(
            plan.mode,
            RunMode::Manual {
                code: "abcde12345xxxxxyyyyyzzzzz".into(),
                platforms: vec!["psn".into(), "xboxlive".into()],
            }
        );
    }

    #[test]
    fn manual_with_schedule_is_rejected() {
        assert!(unsupported(plan(&["--redeem", CODE, "--schedule"])));
        assert!(unsupported(plan(&["--redeem", CODE, "--schedule", "4"])));
        assert!(unsupported(plan(&["--redeem", CODE, "--limit", "3"])));
        assert!(unsupported(plan(&["--redeem", CODE, "--golden"])));
    }

    #[test]
    fn conflicting_targets_are_rejected() {
        assert!(unsupported(plan(&["--redeem", CODE, "bl3:steam"])));
        assert!(unsupported(plan(&["--redeem", CODE, "FFFFF-12345-XXXXX-YYYYY-ZZZZZ"])));
        assert!(unsupported(plan(&["--redeem", "bl3"])));
        assert!(unsupported(plan(&["--redeem", "bl3:gamecube"])));
        assert!(unsupported(plan(&[])));
        assert!(unsupported(plan(&["--games", "bl3", "--platforms", "steam"])));
    }

    #[test]
    fn category_flags_combine() {
        let categories = |args: &[&str]| match plan(args).unwrap().mode {
            RunMode::Mapping { categories, .. } => categories,
            other => panic!("expected mapping mode, got {:?}", other),
        };

        assert_eq!(
            categories(&["--redeem", "bl3:steam", "--golden", "--other"]),
            CategoryFilter { golden: true, non_golden: false, other: true }
        );
        assert_eq!(
            categories(&["--redeem", "bl3:steam", "--golden", "--non-golden"]),
            CategoryFilter { golden: true, non_golden: true, other: false }
        );
        assert_eq!(
            categories(&["--redeem", "bl3:steam", "--non-golden", "--other", "--golden"]),
            CategoryFilter::all()
        );
        assert_eq!(categories(&["--redeem", "bl3:steam"]), CategoryFilter::all());
    }

    #[test]
    fn schedule_defaults_and_floor() {
        let plan_default = plan(&["--redeem", "bl3:steam", "--schedule"]).unwrap();
        assert_eq!(plan_default.schedule, Some(Duration::from_secs(7200)));

        let raised = plan(&["--redeem", "bl3:steam", "--schedule", "0.5"]).unwrap();
        assert_eq!(raised.schedule, Some(Duration::from_secs(7200)));

        let longer = plan(&["--redeem", "bl3:steam", "--schedule", "6", "--golden", "--limit", "10"]).unwrap();
        assert_eq!(longer.schedule, Some(Duration::from_secs(6 * 3600)));
        assert!(matches!(
            longer.mode,
            RunMode::Mapping { golden_limit: 10, categories, .. } if categories == CategoryFilter::only(crate::models::RewardCategory::GoldenKey)
        ));
    }

    #[test]
    fn cli_profile_beats_environment() {
        let args = Args::try_parse_from(["shift-redeemer", "--redeem", "bl3:steam", "--profile", "alt"]).unwrap();
        let env = |key: &str| (key == "SHIFT_PROFILE").then(|| "fromenv".to_string());
        assert_eq!(args.into_plan(&Config::default(), env).unwrap().profile, "alt");

        let args = Args::try_parse_from(["shift-redeemer", "--redeem", "bl3:steam"]).unwrap();
        assert_eq!(args.into_plan(&Config::default(), env).unwrap().profile, "fromenv");

        let args = Args::try_parse_from(["shift-redeemer", "--redeem", "bl3:steam", "--shift-source", "/tmp/f.json"]).unwrap();
        assert_eq!(args.into_plan(&Config::default(), |_| None).unwrap().sources, vec!["/tmp/f.json"]);
    }
}

// ===============================
// src/config.rs
// ===============================
//
// Env-driven configuration (reads .env via dotenvy) plus the CLI surface.
// Everything has a sensible default so `puckwatch watch` works against the
// public feed with nothing but a webhook URL set.
//
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tracing::warn;

/// Feed tick cadence. The per-tick fetch deadline must stay strictly below
/// this so a slow fetch can never overlap the next scheduled tick.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_TICK_DEADLINE_MS: u64 = 4750;

const DEFAULT_TEAM_ID: u32 = 25;
const DEFAULT_API_BASE: &str = "https://statsapi.web.nhl.com";
const DEFAULT_POST_DELAY_MS: u64 = 20_000;
const DEFAULT_METRICS_PORT: u16 = 9898;

#[derive(Parser, Debug)]
#[command(name = "puckwatch", about = "Watches a live game feed and announces events")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch a game (default). Without --game-id, today's schedule is searched
    /// for the configured team.
    Watch {
        #[arg(long)]
        game_id: Option<String>,
    },
    /// Remove one event id from a game's ledger so it is announced again on
    /// the next tick. The only supported way to shrink a ledger.
    Replay {
        #[arg(long)]
        game_id: String,
        #[arg(long)]
        event_id: i64,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub team_id: u32,
    pub api_base: String,
    pub data_dir: PathBuf,

    pub poll_interval: Duration,
    pub tick_deadline: Duration,

    pub slack_webhook_url: Option<String>,
    pub slack_channel: String,
    pub slack_username: String,
    pub post_delay: Duration,

    pub metrics_port: u16,
}

pub fn load() -> Config {
    // Make sure .env is read before any env::var lookups
    let _ = dotenv();

    let team_id = env_parse("TEAM_ID", DEFAULT_TEAM_ID);
    let api_base = env::var("NHL_API_URL")
        .unwrap_or_else(|_| DEFAULT_API_BASE.to_string())
        .trim_end_matches('/')
        .to_string();
    let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()));

    let poll_interval_ms = env_parse("POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS);
    let mut tick_deadline_ms = env_parse("TICK_DEADLINE_MS", DEFAULT_TICK_DEADLINE_MS);
    if tick_deadline_ms >= poll_interval_ms {
        // Invariant: deadline < interval, otherwise ticks could back up.
        let clamped = poll_interval_ms.saturating_sub(250).max(1);
        warn!(
            tick_deadline_ms,
            poll_interval_ms, clamped, "tick deadline >= poll interval, clamping"
        );
        tick_deadline_ms = clamped;
    }

    let slack_webhook_url = env::var("SLACK_WEBHOOK_URL").ok().filter(|s| !s.is_empty());
    let slack_channel = env::var("SLACK_CHANNEL").unwrap_or_else(|_| "#gameday".to_string());
    let slack_username = env::var("SLACK_USERNAME").unwrap_or_else(|_| "puckwatch".to_string());
    let post_delay_ms = env_parse("SLACK_POST_DELAY_MS", DEFAULT_POST_DELAY_MS);

    let metrics_port = env_parse("METRICS_PORT", DEFAULT_METRICS_PORT);

    Config {
        team_id,
        api_base,
        data_dir,
        poll_interval: Duration::from_millis(poll_interval_ms),
        tick_deadline: Duration::from_millis(tick_deadline_ms),
        slack_webhook_url,
        slack_channel,
        slack_username,
        post_delay: Duration::from_millis(post_delay_ms),
        metrics_port,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

// ===============================
// src/main.rs
// ===============================
//
// puckwatch: polls a live game feed on a fixed cadence, detects events the
// feed has not announced before (period starts/ends, goals, penalties,
// shootout attempts, game start/end), and announces each exactly once to
// Slack. A per-game ledger of known event ids makes re-announcement
// impossible even though the feed re-sends the full history every poll.
//
// Quick checks while running:
//   curl -s localhost:9898/metrics | grep '^ticks_total'
//   curl -s localhost:9898/metrics | grep '^events_dispatched_total'
//
mod classify;
mod config;
mod dispatch;
mod domain;
mod feed;
mod ledger;
mod message;
mod metrics;
mod slack;
mod watcher;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use crate::config::{Cli, Command, Config};
use crate::dispatch::Dispatcher;
use crate::feed::NhlClient;
use crate::ledger::GameStore;
use crate::slack::SlackHandler;
use crate::watcher::Watcher;

const SCHEDULE_ATTEMPTS: u32 = 3;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();
    let cfg = config::load();

    let code = match cli.command {
        Some(Command::Replay { game_id, event_id }) => replay(&cfg, &game_id, event_id).await,
        Some(Command::Watch { game_id }) => watch(&cfg, game_id).await,
        None => watch(&cfg, None).await,
    };
    std::process::exit(code);
}

async fn watch(cfg: &Config, cli_game_id: Option<String>) -> i32 {
    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(cfg.metrics_port));

    let client = NhlClient::new(&cfg.api_base);

    // ---- Which game? CLI override, else today's schedule ----
    let game_id = match cli_game_id {
        Some(id) => id,
        None => {
            let sched = match client.fetch_schedule_retrying(SCHEDULE_ATTEMPTS).await {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "schedule fetch failed");
                    return 1;
                }
            };
            match sched.game_for_team(cfg.team_id) {
                Some(id) => id,
                None => {
                    info!(team_id = cfg.team_id, "the watched team does not play today");
                    return 0;
                }
            }
        }
    };

    info!(
        %game_id,
        team_id = cfg.team_id,
        api = %cfg.api_base,
        interval_ms = cfg.poll_interval.as_millis() as u64,
        deadline_ms = cfg.tick_deadline.as_millis() as u64,
        data_dir = %cfg.data_dir.display(),
        dry_run = cfg.slack_webhook_url.is_none(),
        "startup config"
    );
    metrics::CONFIG_WATCHED_GAME.with_label_values(&[&game_id]).set(1);

    // ---- Observers ----
    let slack = Arc::new(SlackHandler::new(
        cfg.slack_webhook_url.clone(),
        cfg.slack_channel.clone(),
        cfg.slack_username.clone(),
        cfg.post_delay,
    ));
    let dispatcher = Arc::new(announcers(&slack));

    // ---- Watch loop ----
    let store = GameStore::new(cfg.data_dir.clone(), &game_id);
    let handle = Watcher::new(
        Arc::new(client),
        store,
        dispatcher,
        cfg.poll_interval,
        cfg.tick_deadline,
    )
    .start();

    // ctrl-c asks the loop to stop; the in-flight tick still persists.
    let stop = handle.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping watch");
            stop.stop();
        }
    });

    match handle.join().await {
        Ok(()) => {
            info!("done");
            0
        }
        Err(e) => {
            error!(error = %e, "watch ended with error");
            1
        }
    }
}

/// Wire one announcing observer per event variant. Formatters that resolve to
/// nothing (missing participants) suppress the post; the raw event was already
/// dumped by the tick processor in that case.
fn announcers(slack: &Arc<SlackHandler>) -> Dispatcher {
    let mut d = Dispatcher::new();

    {
        let slack = Arc::clone(slack);
        d.on_game_scheduled(move |ev| {
            slack.post(&message::game_scheduled(ev));
            Ok(())
        });
    }
    {
        let slack = Arc::clone(slack);
        d.on_game_started(move |ev| {
            slack.post(&message::game_started(ev));
            Ok(())
        });
    }
    {
        let slack = Arc::clone(slack);
        d.on_period_started(move |ev| {
            slack.post(&message::period_started(ev));
            Ok(())
        });
    }
    {
        let slack = Arc::clone(slack);
        d.on_period_ended(move |ev| {
            slack.post(&message::period_ended(ev));
            Ok(())
        });
    }
    {
        let slack = Arc::clone(slack);
        d.on_penalty(move |ev| {
            if let Some(msg) = message::penalty(ev) {
                slack.post(&msg);
            }
            Ok(())
        });
    }
    {
        let slack = Arc::clone(slack);
        d.on_goal(move |ev| {
            if let Some(msg) = message::goal(ev) {
                slack.post(&msg);
            }
            Ok(())
        });
    }
    {
        let slack = Arc::clone(slack);
        d.on_shootout_attempt(move |ev| {
            if let Some(msg) = message::shootout_attempt(ev) {
                slack.post(&msg);
            }
            Ok(())
        });
    }
    {
        let slack = Arc::clone(slack);
        d.on_game_ended(move |ev| {
            slack.post(&message::game_ended(ev));
            Ok(())
        });
    }
    d.on_no_data(|game_id| {
        error!(%game_id, "feed returned no data, is the game id valid?");
        Ok(())
    });

    d
}

/// Ledger correction path: forget one event id so it replays on the next tick.
async fn replay(cfg: &Config, game_id: &str, event_id: i64) -> i32 {
    let store = GameStore::new(cfg.data_dir.clone(), game_id);
    let mut ledger = match store.load().await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "ledger load failed");
            return 1;
        }
    };
    if !ledger.forget(event_id) {
        info!(%game_id, event_id, "event id not in the ledger, nothing to do");
        return 0;
    }
    if let Err(e) = store.save(&ledger).await {
        error!(error = %e, "ledger save failed");
        return 1;
    }
    info!(%game_id, event_id, "event forgotten; it will replay on the next watch tick");
    0
}

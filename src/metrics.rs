// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Watch loop --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "watch loop ticks started").unwrap());

pub static TICK_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("tick_timeouts_total", "ticks abandoned at the fetch deadline").unwrap()
});

pub static FETCH_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fetch_errors_total", "failed snapshot fetches (label: kind)"),
        &["kind"],
    )
    .unwrap()
});

// -------- Dispatch --------
pub static EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("events_dispatched_total", "domain events fanned out (label: kind)"),
        &["kind"],
    )
    .unwrap()
});

pub static OBSERVER_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("observer_errors_total", "isolated observer failures (label: kind)"),
        &["kind"],
    )
    .unwrap()
});

// -------- Ledger --------
pub static KNOWN_EVENTS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("ledger_known_events", "event ids in the current game's ledger").unwrap()
});

// -------- Outbound --------
pub static SLACK_POSTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("slack_posts_total", "webhook posts (label: outcome)"),
        &["outcome"],
    )
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_WATCHED_GAME: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_watched_game", "game id under watch (label: game_id)"),
        &["game_id"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(TICK_TIMEOUTS.clone())),
        REGISTRY.register(Box::new(FETCH_ERRORS.clone())),
        REGISTRY.register(Box::new(EVENTS.clone())),
        REGISTRY.register(Box::new(OBSERVER_ERRORS.clone())),
        REGISTRY.register(Box::new(KNOWN_EVENTS.clone())),
        REGISTRY.register(Box::new(SLACK_POSTS.clone())),
        REGISTRY.register(Box::new(CONFIG_WATCHED_GAME.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                eprintln!("metrics bind {addr} failed: {e}");
                return;
            }
        };
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {e}"),
            }
        }
    });
}

// ===============================
// src/watcher.rs
// ===============================
//
// The poll-diff-dispatch loop. One tick = fetch (bounded by a deadline that is
// strictly shorter than the poll interval) -> diff against the ledger ->
// classify -> dispatch -> persist. At most one tick is ever in flight: the
// next interval tick is not awaited until the current one has returned.
//
// Failure rules:
// - timeout / transport / decode on fetch: warn, skip the tick, ledger untouched
// - feed says the game id does not exist: NoData observers, watch ends
// - store read/write failure: surfaced as the loop's terminal error; carrying
//   on with stale state would re-announce the whole game next tick
//

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::classify::classify;
use crate::dispatch::Dispatcher;
use crate::domain::{DomainEvent, GameSnapshot, RawEvent};
use crate::feed::GameFeed;
use crate::ledger::{GameStore, StoreError};
use crate::metrics::{FETCH_ERRORS, KNOWN_EVENTS, TICKS, TICK_TIMEOUTS};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("watch task aborted: {0}")]
    Aborted(tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickFlow {
    Continue,
    Finished,
}

pub struct Watcher<F> {
    feed: Arc<F>,
    store: GameStore,
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    tick_deadline: Duration,
}

/// Control surface of a started watch. `stop()` may be called from any task;
/// an in-flight tick finishes its persistence before the loop exits.
pub struct WatcherHandle {
    stop: Arc<watch::Sender<bool>>,
    task: JoinHandle<Result<(), WatchError>>,
}

impl WatcherHandle {
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn stop_signal(&self) -> StopSignal {
        StopSignal(Arc::clone(&self.stop))
    }

    pub async fn join(self) -> Result<(), WatchError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(WatchError::Aborted(e)),
        }
    }
}

/// Cloneable stop trigger for signal handlers.
#[derive(Clone)]
pub struct StopSignal(Arc<watch::Sender<bool>>);

impl StopSignal {
    pub fn stop(&self) {
        let _ = self.0.send(true);
    }
}

impl<F: GameFeed> Watcher<F> {
    pub fn new(
        feed: Arc<F>,
        store: GameStore,
        dispatcher: Arc<Dispatcher>,
        poll_interval: Duration,
        tick_deadline: Duration,
    ) -> Self {
        debug_assert!(tick_deadline < poll_interval);
        Self { feed, store, dispatcher, poll_interval, tick_deadline }
    }

    /// Spawn the loop task and hand back its control surface.
    pub fn start(self) -> WatcherHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        WatcherHandle { stop: Arc::new(stop_tx), task }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) -> Result<(), WatchError> {
        info!(game_id = %self.store.game_id(), "watch started");

        let mut timer = interval(self.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = timer.tick() => {}
                changed = stop_rx.changed() => {
                    // A dropped sender means nobody can stop us anymore; treat
                    // it like a stop rather than spinning.
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
            if *stop_rx.borrow() {
                info!(game_id = %self.store.game_id(), "stop requested, watch ending");
                return Ok(());
            }

            match self.tick().await? {
                TickFlow::Continue => {}
                TickFlow::Finished => {
                    info!(game_id = %self.store.game_id(), "watch finished");
                    return Ok(());
                }
            }
        }
    }

    async fn tick(&self) -> Result<TickFlow, WatchError> {
        TICKS.inc();
        let started = Instant::now();

        let snapshot = match self.feed.fetch_game(self.store.game_id(), self.tick_deadline).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_timeout() => {
                TICK_TIMEOUTS.inc();
                FETCH_ERRORS.with_label_values(&[e.kind()]).inc();
                warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tick fetch hit the deadline, skipping"
                );
                return Ok(TickFlow::Continue);
            }
            Err(e) => {
                FETCH_ERRORS.with_label_values(&[e.kind()]).inc();
                warn!(
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tick fetch failed, skipping"
                );
                return Ok(TickFlow::Continue);
            }
        };

        match snapshot {
            None => {
                // A bad game id will not self-correct; do not retry.
                warn!(game_id = %self.store.game_id(), "feed has no data for this game id");
                self.dispatcher.no_data(self.store.game_id());
                Ok(TickFlow::Finished)
            }
            Some(snapshot) => self.process(snapshot).await,
        }
    }

    async fn process(&self, snapshot: GameSnapshot) -> Result<TickFlow, WatchError> {
        // Pre-game: nothing to announce, nothing to persist.
        if snapshot.is_pregame() {
            return Ok(TickFlow::Continue);
        }

        let mut ledger = self.store.load().await?;
        let mut flow = TickFlow::Continue;

        let unknown: Vec<RawEvent> =
            ledger.unknown_events(&snapshot.events).into_iter().cloned().collect();

        if !unknown.is_empty() {
            for play in &unknown {
                if let Some(event) = classify(play, &snapshot) {
                    if event.is_degraded() {
                        self.store.dump_event(play).await;
                    }
                    if matches!(event, DomainEvent::GameEnded(_)) {
                        flow = TickFlow::Finished;
                    }
                    self.dispatcher.dispatch(&event);
                }
                // Known even without a classification, so it is never revisited.
                ledger.mark_known(play.id);
            }
        } else if snapshot.has_ended() {
            // The GAME_END id is already in the ledger, which is the only
            // already-announced guard there is: end the watch without
            // re-dispatching.
            info!(game_id = %self.store.game_id(), "game over and already announced, watch ending");
            flow = TickFlow::Finished;
        }

        ledger.last_snapshot = Some(snapshot);
        self.store.save(&ledger).await?;
        KNOWN_EVENTS.set(ledger.len() as i64);

        if flow == TickFlow::Finished {
            if let Err(e) = self.store.archive().await {
                warn!(error = %e, "ledger archive failed");
            }
        }
        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventDetail, Participant, Player, Score, Team};
    use crate::feed::FeedError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::sleep;

    fn team(id: u32, name: &str, tricode: &str) -> Team {
        Team { id, name: name.to_string(), tricode: tricode.to_string() }
    }

    fn play(id: i64, tag: &str, period: u32) -> RawEvent {
        RawEvent {
            id,
            type_tag: tag.to_string(),
            period,
            ordinal: "1st".to_string(),
            time_remaining: Some("10:00".to_string()),
            occurred_at: None,
            score: Score::default(),
            team: Some("DAL".to_string()),
            participants: vec![Participant {
                id: 8474000,
                name: "Jamie Benn".to_string(),
                role: "Scorer".to_string(),
                season_total: Some(30),
            }],
            detail: EventDetail::default(),
        }
    }

    fn snapshot(period: u32, events: Vec<RawEvent>) -> GameSnapshot {
        let mut players = HashMap::new();
        players.insert(
            8474000,
            Player {
                id: 8474000,
                full_name: "Jamie Benn".to_string(),
                number: Some("14".to_string()),
                tricode: Some("DAL".to_string()),
            },
        );
        GameSnapshot {
            away: team(25, "Dallas Stars", "DAL"),
            home: team(16, "Chicago Blackhawks", "CHI"),
            venue: None,
            scheduled_start: None,
            players,
            current_period: period,
            score: Score { away: 2, home: 1 },
            events,
        }
    }

    /// Feed stub: pops scripted responses, repeats the last one when drained.
    struct StubFeed {
        script: Mutex<Vec<StubResponse>>,
        fetches: AtomicUsize,
    }

    #[derive(Clone)]
    enum StubResponse {
        Snapshot(GameSnapshot),
        NotFound,
        SlowBy(Duration),
        Transport,
    }

    impl StubFeed {
        fn new(script: Vec<StubResponse>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script), fetches: AtomicUsize::new(0) })
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GameFeed for StubFeed {
        async fn fetch_game(
            &self,
            _game_id: &str,
            deadline: Duration,
        ) -> Result<Option<GameSnapshot>, FeedError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.remove(0)
                } else {
                    script[0].clone()
                }
            };
            match next {
                StubResponse::Snapshot(s) => Ok(Some(s)),
                StubResponse::NotFound => Ok(None),
                StubResponse::SlowBy(extra) => {
                    sleep(deadline + extra).await;
                    Err(FeedError::DeadlineExceeded {
                        deadline_ms: deadline.as_millis() as u64,
                    })
                }
                StubResponse::Transport => {
                    Err(FeedError::Status(reqwest::StatusCode::BAD_GATEWAY))
                }
            }
        }
    }

    struct Recorded {
        kinds: Arc<Mutex<Vec<String>>>,
        dispatcher: Arc<Dispatcher>,
    }

    fn recording_dispatcher() -> Recorded {
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let mut d = Dispatcher::new();

        macro_rules! record {
            ($register:ident, $label:expr) => {{
                let kinds = Arc::clone(&kinds);
                d.$register(move |_| {
                    kinds.lock().unwrap().push($label.to_string());
                    Ok(())
                });
            }};
        }
        record!(on_game_scheduled, "game_scheduled");
        record!(on_game_started, "game_started");
        record!(on_period_started, "period_started");
        record!(on_period_ended, "period_ended");
        record!(on_penalty, "penalty");
        record!(on_goal, "goal");
        record!(on_shootout_attempt, "shootout_attempt");
        record!(on_game_ended, "game_ended");
        record!(on_no_data, "no_data");

        Recorded { kinds, dispatcher: Arc::new(d) }
    }

    fn watcher(
        feed: Arc<StubFeed>,
        dir: &std::path::Path,
        dispatcher: Arc<Dispatcher>,
    ) -> Watcher<StubFeed> {
        Watcher::new(
            feed,
            GameStore::new(dir.to_path_buf(), "2017021207"),
            dispatcher,
            Duration::from_millis(5000),
            Duration::from_millis(4750),
        )
    }

    #[tokio::test]
    async fn dispatches_in_feed_order_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::NotFound]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let snap = snapshot(
            1,
            vec![play(1, "GOAL", 1), play(2, "PENALTY", 1), play(3, "GOAL", 1)],
        );
        let flow = w.process(snap).await.unwrap();

        assert_eq!(flow, TickFlow::Continue);
        assert_eq!(*rec.kinds.lock().unwrap(), vec!["goal", "penalty", "goal"]);

        let ledger = w.store.load().await.unwrap();
        assert!(ledger.contains(1) && ledger.contains(2) && ledger.contains(3));
        assert_eq!(ledger.len(), 3);
        assert!(ledger.last_snapshot.is_some());
    }

    #[tokio::test]
    async fn same_snapshot_twice_dispatches_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::NotFound]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let snap = snapshot(1, vec![play(1, "GOAL", 1), play(2, "PENALTY", 1)]);
        w.process(snap.clone()).await.unwrap();
        let before = rec.kinds.lock().unwrap().len();

        w.process(snap).await.unwrap();
        assert_eq!(rec.kinds.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn known_ids_resume_partially() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::NotFound]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let seeded = crate::ledger::Ledger::from_ids(vec![1, 2], None);
        w.store.save(&seeded).await.unwrap();

        let snap = snapshot(
            1,
            vec![play(1, "GOAL", 1), play(2, "PENALTY", 1), play(3, "GOAL", 1)],
        );
        w.process(snap).await.unwrap();

        assert_eq!(*rec.kinds.lock().unwrap(), vec!["goal"]);
        let ledger = w.store.load().await.unwrap();
        assert_eq!(ledger.len(), 3);
    }

    #[tokio::test]
    async fn pregame_snapshot_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::NotFound]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let flow = w.process(snapshot(0, Vec::new())).await.unwrap();

        assert_eq!(flow, TickFlow::Continue);
        assert!(rec.kinds.lock().unwrap().is_empty());
        // no persistence mutation at all
        assert!(!dir.path().join("2017021207.json").exists());
    }

    #[tokio::test]
    async fn unclassified_events_are_still_marked_known() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::NotFound]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        w.process(snapshot(1, vec![play(11, "FACEOFF", 1)])).await.unwrap();

        assert!(rec.kinds.lock().unwrap().is_empty());
        assert!(w.store.load().await.unwrap().contains(11));
    }

    #[tokio::test]
    async fn shootout_penalty_is_marked_known_without_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::NotFound]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let snap = snapshot(
            5,
            vec![play(80, "GOAL", 5), play(81, "SHOT", 5), play(82, "PENALTY", 5)],
        );
        w.process(snap).await.unwrap();

        assert_eq!(
            *rec.kinds.lock().unwrap(),
            vec!["shootout_attempt", "shootout_attempt"]
        );
        let ledger = w.store.load().await.unwrap();
        assert!(ledger.contains(80) && ledger.contains(81) && ledger.contains(82));
    }

    #[tokio::test]
    async fn goal_without_scorer_still_dispatches_and_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::NotFound]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let mut bare = play(21, "GOAL", 2);
        bare.participants.clear();
        w.process(snapshot(2, vec![bare])).await.unwrap();

        assert_eq!(*rec.kinds.lock().unwrap(), vec!["goal"]);
        assert!(dir.path().join("2017021207.events").join("21.json").exists());
    }

    #[tokio::test]
    async fn game_end_event_finishes_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::NotFound]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let snap = snapshot(3, vec![play(1, "GOAL", 1), play(2, "GAME_END", 3)]);
        let flow = w.process(snap).await.unwrap();

        assert_eq!(flow, TickFlow::Finished);
        assert_eq!(*rec.kinds.lock().unwrap(), vec!["goal", "game_ended"]);
        assert!(dir.path().join("2017021207.final.json").exists());
        assert!(!dir.path().join("2017021207.json").exists());
    }

    #[tokio::test]
    async fn already_known_game_end_finishes_without_redispatch() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::NotFound]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let snap = snapshot(3, vec![play(1, "GOAL", 1), play(2, "GAME_END", 3)]);
        w.process(snap.clone()).await.unwrap();
        rec.kinds.lock().unwrap().clear();

        // Same terminal snapshot again (e.g. the process restarted after the
        // announcement): finish quietly.
        let flow = w.process(snap).await.unwrap();
        assert_eq!(flow, TickFlow::Finished);
        assert!(rec.kinds.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_fetch_skips_tick_and_leaves_ledger_alone() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::SlowBy(Duration::from_millis(500))]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let flow = w.tick().await.unwrap();

        assert_eq!(flow, TickFlow::Continue);
        assert!(rec.kinds.lock().unwrap().is_empty());
        assert!(!dir.path().join("2017021207.json").exists());
    }

    #[tokio::test]
    async fn transport_error_skips_tick() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::Transport]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let flow = w.tick().await.unwrap();

        assert_eq!(flow, TickFlow::Continue);
        assert!(rec.kinds.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn null_snapshot_fires_no_data_and_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::NotFound]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let flow = w.tick().await.unwrap();

        assert_eq!(flow, TickFlow::Finished);
        assert_eq!(*rec.kinds.lock().unwrap(), vec!["no_data"]);
    }

    #[tokio::test]
    async fn corrupt_ledger_surfaces_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let feed = StubFeed::new(vec![StubResponse::NotFound]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));
        std::fs::write(dir.path().join("2017021207.json"), "{definitely not json").unwrap();

        match w.process(snapshot(1, vec![play(1, "GOAL", 1)])).await {
            Err(WatchError::Store(StoreError::Corrupt { .. })) => {}
            other => panic!("expected corrupt store error, got {other:?}"),
        }
        assert!(rec.kinds.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_finishes_itself_after_game_end() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        let snap = snapshot(3, vec![play(1, "GAME_END", 3)]);
        let feed = StubFeed::new(vec![StubResponse::Snapshot(snap)]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let handle = w.start();
        handle.join().await.unwrap();

        assert_eq!(*rec.kinds.lock().unwrap(), vec!["game_ended"]);
        assert_eq!(feed.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recording_dispatcher();
        // Pre-game forever: the loop would tick until stopped.
        let feed = StubFeed::new(vec![StubResponse::Snapshot(snapshot(0, Vec::new()))]);
        let w = watcher(Arc::clone(&feed), dir.path(), Arc::clone(&rec.dispatcher));

        let handle = w.start();
        // Let the first tick run, then ask for a graceful stop.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let fetched = feed.fetch_count();
        assert!(fetched >= 1);

        handle.stop();
        handle.join().await.unwrap();
        let after_stop = feed.fetch_count();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(feed.fetch_count(), after_stop);
    }
}

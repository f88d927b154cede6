// ===============================
// src/ledger.rs
// ===============================
//
// Per-game durable state:
// - Ledger   : event ids already dispatched, kept in append order with a fast
//              membership index; the diff engine lives here too.
// - GameStore: one JSON document per game id, loaded fully at the start of a
//              tick and overwritten fully at the end. No incremental writes.
//
// A missing document is a fresh game (empty ledger). A document that exists
// but cannot be read or parsed is surfaced as an error: silently discarding
// history would re-announce every event of the game.
//

use std::path::PathBuf;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::domain::{GameSnapshot, RawEvent};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ledger io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger corrupt at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Set of already-dispatched event ids for one game, plus the cached last
/// snapshot. Owned exclusively by the watcher for the game's lifetime.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    ids: Vec<i64>,
    index: AHashSet<i64>,
    pub last_snapshot: Option<GameSnapshot>,
}

impl Ledger {
    pub fn from_ids(ids: Vec<i64>, last_snapshot: Option<GameSnapshot>) -> Self {
        let index = ids.iter().copied().collect();
        Self { ids, index, last_snapshot }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.index.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Diff engine: the subset of `events` not seen yet, preserving feed order.
    pub fn unknown_events<'a>(&self, events: &'a [RawEvent]) -> Vec<&'a RawEvent> {
        events.iter().filter(|e| !self.contains(e.id)).collect()
    }

    /// Append an id to the known set. Idempotent.
    pub fn mark_known(&mut self, id: i64) {
        if self.index.insert(id) {
            self.ids.push(id);
        }
    }

    /// Explicit correction path: drop one id so its event replays on the next
    /// tick. Returns whether the id was present.
    pub fn forget(&mut self, id: i64) -> bool {
        if self.index.remove(&id) {
            self.ids.retain(|&x| x != id);
            true
        } else {
            false
        }
    }
}

/// Persisted shape: the id order is append history, not a semantic ordering.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerDoc {
    known_event_ids: Vec<i64>,
    #[serde(default)]
    last_snapshot: Option<GameSnapshot>,
}

/// Filesystem home of one game's ledger document and diagnostic dumps.
#[derive(Debug, Clone)]
pub struct GameStore {
    game_id: String,
    dir: PathBuf,
}

impl GameStore {
    pub fn new(dir: PathBuf, game_id: &str) -> Self {
        Self { game_id: game_id.to_string(), dir }
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    fn ledger_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.game_id))
    }

    fn archive_path(&self) -> PathBuf {
        self.dir.join(format!("{}.final.json", self.game_id))
    }

    fn diag_dir(&self) -> PathBuf {
        self.dir.join(format!("{}.events", self.game_id))
    }

    /// Loads the live document, falling back to the archived one so a restart
    /// on an already-finished game still knows what was announced.
    pub async fn load(&self) -> Result<Ledger, StoreError> {
        if let Some(ledger) = self.read_doc(self.ledger_path()).await? {
            return Ok(ledger);
        }
        if let Some(ledger) = self.read_doc(self.archive_path()).await? {
            info!(game_id = %self.game_id, "resuming from archived ledger");
            return Ok(ledger);
        }
        info!(game_id = %self.game_id, "no ledger yet, starting empty");
        Ok(Ledger::default())
    }

    async fn read_doc(&self, path: PathBuf) -> Result<Option<Ledger>, StoreError> {
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let doc: LedgerDoc =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt { path, source })?;
        Ok(Some(Ledger::from_ids(doc.known_event_ids, doc.last_snapshot)))
    }

    /// Full overwrite of the game's document.
    pub async fn save(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let path = self.ledger_path();
        if let Err(source) = fs::create_dir_all(&self.dir).await {
            return Err(StoreError::Io { path, source });
        }
        let doc = LedgerDoc {
            known_event_ids: ledger.ids.clone(),
            last_snapshot: ledger.last_snapshot.clone(),
        };
        let body = serde_json::to_string_pretty(&doc)
            .map_err(|source| StoreError::Corrupt { path: path.clone(), source })?;
        fs::write(&path, body).await.map_err(|source| StoreError::Io { path, source })
    }

    /// Rename the document once the game is over; the watch is done with it.
    pub async fn archive(&self) -> Result<(), StoreError> {
        let from = self.ledger_path();
        match fs::rename(&from, self.archive_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path: from, source }),
        }
    }

    /// Keep a malformed raw event for offline inspection, keyed by event id.
    /// Best effort: a failed dump is logged and never fails the tick.
    pub async fn dump_event(&self, event: &RawEvent) {
        let dir = self.diag_dir();
        if let Err(e) = fs::create_dir_all(&dir).await {
            warn!(error = %e, dir = %dir.display(), "diagnostic dir create failed");
            return;
        }
        let path = dir.join(format!("{}.json", event.id));
        let body = match serde_json::to_string_pretty(event) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, event_id = event.id, "diagnostic serialize failed");
                return;
            }
        };
        if let Err(e) = fs::write(&path, body).await {
            warn!(error = %e, path = %path.display(), "diagnostic write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventDetail, Score};

    fn event(id: i64, tag: &str) -> RawEvent {
        RawEvent {
            id,
            type_tag: tag.to_string(),
            period: 1,
            ordinal: "1st".to_string(),
            time_remaining: None,
            occurred_at: None,
            score: Score::default(),
            team: None,
            participants: Vec::new(),
            detail: EventDetail::default(),
        }
    }

    #[test]
    fn diff_preserves_feed_order() {
        let ledger = Ledger::default();
        let events = vec![event(1, "GOAL"), event(2, "PENALTY"), event(3, "GOAL")];
        let unknown: Vec<i64> = ledger.unknown_events(&events).iter().map(|e| e.id).collect();
        assert_eq!(unknown, vec![1, 2, 3]);
    }

    #[test]
    fn diff_skips_known_ids() {
        let ledger = Ledger::from_ids(vec![1, 2], None);
        let events = vec![event(1, "GOAL"), event(2, "PENALTY"), event(3, "GOAL")];
        let unknown: Vec<i64> = ledger.unknown_events(&events).iter().map(|e| e.id).collect();
        assert_eq!(unknown, vec![3]);
    }

    #[test]
    fn mark_known_is_idempotent() {
        let mut ledger = Ledger::default();
        ledger.mark_known(7);
        ledger.mark_known(7);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains(7));
    }

    #[test]
    fn forget_removes_exactly_one_id() {
        let mut ledger = Ledger::from_ids(vec![1, 2, 3], None);
        assert!(ledger.forget(2));
        assert!(!ledger.forget(2));
        assert!(!ledger.contains(2));
        assert!(ledger.contains(1) && ledger.contains(3));
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn load_missing_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let store = GameStore::new(dir.path().to_path_buf(), "2017021207");
        let ledger = store.load().await.unwrap();
        assert!(ledger.is_empty());
        assert!(ledger.last_snapshot.is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = GameStore::new(dir.path().to_path_buf(), "2017021207");

        let mut ledger = Ledger::default();
        ledger.mark_known(3);
        ledger.mark_known(9);
        store.save(&ledger).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(3) && loaded.contains(9));
    }

    #[tokio::test]
    async fn corrupt_document_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = GameStore::new(dir.path().to_path_buf(), "2017021207");
        std::fs::write(dir.path().join("2017021207.json"), "{not json").unwrap();

        match store.load().await {
            Err(StoreError::Corrupt { .. }) => {}
            other => panic!("expected corrupt error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn archive_renames_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = GameStore::new(dir.path().to_path_buf(), "2017021207");
        store.save(&Ledger::default()).await.unwrap();

        store.archive().await.unwrap();
        assert!(!dir.path().join("2017021207.json").exists());
        assert!(dir.path().join("2017021207.final.json").exists());
    }

    #[tokio::test]
    async fn archived_ledger_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = GameStore::new(dir.path().to_path_buf(), "2017021207");

        let mut ledger = Ledger::default();
        ledger.mark_known(5);
        store.save(&ledger).await.unwrap();
        store.archive().await.unwrap();

        let loaded = store.load().await.unwrap();
        assert!(loaded.contains(5));
    }

    #[tokio::test]
    async fn dump_event_writes_diagnostic_keyed_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = GameStore::new(dir.path().to_path_buf(), "2017021207");
        store.dump_event(&event(42, "GOAL")).await;
        assert!(dir.path().join("2017021207.events").join("42.json").exists());
    }
}

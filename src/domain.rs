// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Feed period number reserved for the shootout.
pub const SHOOTOUT_PERIOD: u32 = 5;

/// Type tag of the terminal feed event.
pub const GAME_END_TAG: &str = "GAME_END";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub away: u32,
    pub home: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: u32,
    pub name: String,
    pub tricode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub name: String,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub full_name: String,
    pub number: Option<String>,
    pub tricode: Option<String>,
}

/// A player reference attached to a raw feed event ("Scorer", "Assist", ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub name: String,
    pub role: String,
    pub season_total: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDetail {
    pub strength: Option<String>,
    pub penalty_minutes: Option<u32>,
    pub penalty_severity: Option<String>,
    pub infraction: Option<String>,
}

/// One entry of the feed's full event history. Immutable once observed;
/// `id` is unique and non-decreasing within a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: i64,
    pub type_tag: String,
    pub period: u32,
    pub ordinal: String,
    pub time_remaining: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub score: Score,
    pub team: Option<String>,
    pub participants: Vec<Participant>,
    pub detail: EventDetail,
}

impl RawEvent {
    pub fn participant(&self, role: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.role == role)
    }

    pub fn participants_with<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a Participant> {
        self.participants.iter().filter(move |p| p.role == role)
    }
}

/// Full self-contained view of game state from one fetch. Read-only for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub away: Team,
    pub home: Team,
    pub venue: Option<Venue>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub players: HashMap<i64, Player>,
    pub current_period: u32,
    pub score: Score,
    pub events: Vec<RawEvent>,
}

impl GameSnapshot {
    /// The feed appends in order, so the latest event is the tail of the history.
    pub fn latest_event(&self) -> Option<&RawEvent> {
        self.events.last()
    }

    pub fn has_ended(&self) -> bool {
        self.latest_event().is_some_and(|e| e.type_tag == GAME_END_TAG)
    }

    /// No elapsed period and no recorded events: the game has not begun.
    pub fn is_pregame(&self) -> bool {
        self.current_period == 0 && self.events.is_empty()
    }

    pub fn player(&self, id: i64) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn matchup(&self) -> Matchup {
        Matchup {
            away: TeamRef { name: self.away.name.clone(), tricode: self.away.tricode.clone() },
            home: TeamRef { name: self.home.name.clone(), tricode: self.home.tricode.clone() },
        }
    }
}

// ---- Classified domain events ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRef {
    pub name: String,
    pub tricode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matchup {
    pub away: TeamRef,
    pub home: TeamRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRef {
    pub name: String,
    pub number: Option<String>,
    pub season_total: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameScheduled {
    pub matchup: Matchup,
    pub venue: Option<Venue>,
    pub scheduled_for: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStarted {
    pub matchup: Matchup,
    pub started_at: Option<DateTime<Local>>,
}

/// Shared payload for period boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodUpdate {
    pub matchup: Matchup,
    pub ordinal: String,
    pub score: Score,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Penalty {
    pub matchup: Matchup,
    pub team: Option<String>,
    pub penalized: Option<PlayerRef>,
    pub drawn_by: Option<PlayerRef>,
    pub minutes: Option<u32>,
    pub severity: Option<String>,
    pub infraction: Option<String>,
    pub score: Score,
    pub ordinal: String,
    pub time_remaining: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalScored {
    pub matchup: Matchup,
    pub team: Option<String>,
    pub scorer: Option<PlayerRef>,
    pub assists: Vec<PlayerRef>,
    pub strength: Option<String>,
    pub score: Score,
    pub ordinal: String,
    pub time_remaining: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShotOutcome {
    Made,
    Missed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShootoutAttempt {
    pub matchup: Matchup,
    pub outcome: ShotOutcome,
    pub team: Option<String>,
    pub shooter: Option<PlayerRef>,
    pub goalie: Option<PlayerRef>,
    pub score: Score,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEnded {
    pub matchup: Matchup,
    pub final_score: Score,
    pub final_ordinal: String,
    pub past_regulation: bool,
}

/// Application-meaningful occurrence derived from a raw feed event.
/// `NoData` is not here: it is a fetch outcome, not a feed event, and has its
/// own dispatcher slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    GameScheduled(GameScheduled),
    GameStarted(GameStarted),
    PeriodStarted(PeriodUpdate),
    PeriodEnded(PeriodUpdate),
    Penalty(Penalty),
    GoalScored(GoalScored),
    ShootoutAttempt(ShootoutAttempt),
    GameEnded(GameEnded),
}

impl DomainEvent {
    /// Stable label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::GameScheduled(_) => "game_scheduled",
            DomainEvent::GameStarted(_) => "game_started",
            DomainEvent::PeriodStarted(_) => "period_started",
            DomainEvent::PeriodEnded(_) => "period_ended",
            DomainEvent::Penalty(_) => "penalty",
            DomainEvent::GoalScored(_) => "goal_scored",
            DomainEvent::ShootoutAttempt(_) => "shootout_attempt",
            DomainEvent::GameEnded(_) => "game_ended",
        }
    }

    /// True when a participant the message needs could not be resolved; such
    /// events still dispatch, but the raw event is worth keeping for inspection.
    pub fn is_degraded(&self) -> bool {
        match self {
            DomainEvent::GoalScored(g) => g.scorer.is_none(),
            DomainEvent::Penalty(p) => p.penalized.is_none() || p.drawn_by.is_none(),
            DomainEvent::ShootoutAttempt(s) => s.shooter.is_none(),
            _ => false,
        }
    }
}

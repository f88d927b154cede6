// ===============================
// src/feed.rs
// ===============================
//
// Feed adapters:
// - NhlClient::fetch_game     : one full game snapshot, bounded by a deadline
// - NhlClient::fetch_schedule : today's slate, used once at startup to find
//                               the configured team's game id
//
// Notes:
// - The deadline is applied inside fetch_game so the tick loop has exactly one
//   cancellation source. A fetch that overruns is abandoned, not awaited.
// - "Not found" (404) resolves to Ok(None); transport and decode problems are
//   distinct error variants so the loop can tell a bad game id from a bad wire.
//

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::domain::{
    EventDetail, GameSnapshot, Participant, Player, RawEvent, Score, Team, Venue,
};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("fetch exceeded {deadline_ms}ms deadline")]
    DeadlineExceeded { deadline_ms: u64 },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("malformed feed payload: {0}")]
    Decode(#[source] serde_json::Error),
}

impl FeedError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FeedError::DeadlineExceeded { .. })
    }

    /// Metric/log label for the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::DeadlineExceeded { .. } => "timeout",
            FeedError::Transport(_) => "transport",
            FeedError::Status(_) => "status",
            FeedError::Decode(_) => "decode",
        }
    }
}

/// The fetch seam the poll loop depends on; production uses `NhlClient`,
/// tests substitute stubs.
#[async_trait]
pub trait GameFeed: Send + Sync + 'static {
    async fn fetch_game(
        &self,
        game_id: &str,
        deadline: Duration,
    ) -> Result<Option<GameSnapshot>, FeedError>;
}

#[derive(Clone)]
pub struct NhlClient {
    http: reqwest::Client,
    base: String,
}

impl NhlClient {
    pub fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<Option<T>, FeedError> {
        let rsp = self.http.get(&url).send().await?;
        match rsp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body = rsp.text().await?;
                serde_json::from_str(&body).map(Some).map_err(FeedError::Decode)
            }
            s => Err(FeedError::Status(s)),
        }
    }

    pub async fn fetch_schedule(&self) -> Result<ScheduleData, FeedError> {
        let url = format!("{}/api/v1/schedule", self.base);
        self.get_json::<ScheduleData>(url)
            .await?
            .ok_or(FeedError::Status(StatusCode::NOT_FOUND))
    }

    /// Startup helper: transient schedule failures retry with capped
    /// exponential backoff plus jitter.
    pub async fn fetch_schedule_retrying(&self, max_attempts: u32) -> Result<ScheduleData, FeedError> {
        let mut attempt: u32 = 0;
        loop {
            match self.fetch_schedule().await {
                Ok(sched) => return Ok(sched),
                Err(e) if attempt + 1 < max_attempts => {
                    attempt = attempt.saturating_add(1);
                    let shift = attempt.min(6);
                    let base_ms = 500u64.saturating_mul(1u64 << shift);
                    let jitter = rand::thread_rng().gen_range(0..=250);
                    warn!(error = %e, attempt, "schedule fetch failed, retrying");
                    sleep(Duration::from_millis(base_ms + jitter)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl GameFeed for NhlClient {
    async fn fetch_game(
        &self,
        game_id: &str,
        deadline: Duration,
    ) -> Result<Option<GameSnapshot>, FeedError> {
        let url = format!("{}/api/v1/game/{}/feed/live", self.base, game_id);
        let fetch = async {
            Ok(self
                .get_json::<LiveFeedWire>(url)
                .await?
                .map(LiveFeedWire::into_snapshot))
        };
        match timeout(deadline, fetch).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::DeadlineExceeded {
                deadline_ms: deadline.as_millis() as u64,
            }),
        }
    }
}

// ---- Schedule wire ----

#[derive(Debug, Deserialize)]
pub struct ScheduleData {
    #[serde(default)]
    pub dates: Vec<ScheduleDate>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleDate {
    #[serde(default)]
    pub games: Vec<ScheduledGame>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledGame {
    pub game_pk: i64,
    pub teams: ScheduledTeams,
}

#[derive(Debug, Deserialize)]
pub struct ScheduledTeams {
    pub away: ScheduledSide,
    pub home: ScheduledSide,
}

#[derive(Debug, Deserialize)]
pub struct ScheduledSide {
    pub team: ScheduledTeamInfo,
}

#[derive(Debug, Deserialize)]
pub struct ScheduledTeamInfo {
    pub id: u32,
}

impl ScheduledGame {
    pub fn has_team(&self, team_id: u32) -> bool {
        self.teams.away.team.id == team_id || self.teams.home.team.id == team_id
    }
}

impl ScheduleData {
    /// First game on the slate involving the team, as a feed game id.
    pub fn game_for_team(&self, team_id: u32) -> Option<String> {
        self.dates
            .iter()
            .flat_map(|d| d.games.iter())
            .find(|g| g.has_team(team_id))
            .map(|g| g.game_pk.to_string())
    }
}

// ---- Live feed wire ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveFeedWire {
    game_data: GameDataWire,
    live_data: LiveDataWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameDataWire {
    teams: TeamsWire,
    venue: Option<VenueWire>,
    datetime: Option<DatetimeWire>,
    #[serde(default)]
    players: HashMap<String, PlayerWire>,
}

#[derive(Debug, Deserialize)]
struct TeamsWire {
    away: TeamWire,
    home: TeamWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamWire {
    id: u32,
    name: String,
    tri_code: String,
}

#[derive(Debug, Deserialize)]
struct VenueWire {
    name: Option<String>,
    city: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatetimeWire {
    date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerWire {
    id: i64,
    full_name: String,
    primary_number: Option<String>,
    current_team: Option<CurrentTeamWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentTeamWire {
    tri_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveDataWire {
    linescore: LinescoreWire,
    plays: PlaysWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinescoreWire {
    #[serde(default)]
    current_period: u32,
    teams: LinescoreTeamsWire,
}

#[derive(Debug, Deserialize)]
struct LinescoreTeamsWire {
    away: LinescoreSideWire,
    home: LinescoreSideWire,
}

#[derive(Debug, Deserialize)]
struct LinescoreSideWire {
    #[serde(default)]
    goals: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaysWire {
    #[serde(default)]
    all_plays: Vec<PlayWire>,
}

#[derive(Debug, Deserialize)]
struct PlayWire {
    about: AboutWire,
    result: ResultWire,
    #[serde(default)]
    players: Vec<PlayParticipantWire>,
    team: Option<PlayTeamWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AboutWire {
    event_idx: i64,
    period: u32,
    ordinal_num: String,
    period_time_remaining: Option<String>,
    date_time: Option<String>,
    #[serde(default)]
    goals: GoalsWire,
}

#[derive(Debug, Default, Deserialize)]
struct GoalsWire {
    #[serde(default)]
    away: u32,
    #[serde(default)]
    home: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultWire {
    event_type_id: String,
    strength: Option<StrengthWire>,
    penalty_minutes: Option<u32>,
    penalty_severity: Option<String>,
    secondary_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StrengthWire {
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayParticipantWire {
    player: ParticipantPlayerWire,
    player_type: String,
    season_total: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantPlayerWire {
    id: i64,
    full_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayTeamWire {
    tri_code: Option<String>,
}

fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc))
}

impl LiveFeedWire {
    fn into_snapshot(self) -> GameSnapshot {
        let game = self.game_data;
        let live = self.live_data;

        let players = game
            .players
            .into_values()
            .map(|p| {
                (
                    p.id,
                    Player {
                        id: p.id,
                        full_name: p.full_name,
                        number: p.primary_number,
                        tricode: p.current_team.and_then(|t| t.tri_code),
                    },
                )
            })
            .collect();

        let events = live.plays.all_plays.into_iter().map(PlayWire::into_event).collect();

        GameSnapshot {
            away: game.teams.away.into_team(),
            home: game.teams.home.into_team(),
            venue: game.venue.and_then(|v| {
                v.name.map(|name| Venue { name, city: v.city })
            }),
            scheduled_start: game
                .datetime
                .and_then(|d| d.date_time)
                .and_then(|s| parse_utc(&s)),
            players,
            current_period: live.linescore.current_period,
            score: Score {
                away: live.linescore.teams.away.goals,
                home: live.linescore.teams.home.goals,
            },
            events,
        }
    }
}

impl TeamWire {
    fn into_team(self) -> Team {
        Team { id: self.id, name: self.name, tricode: self.tri_code }
    }
}

impl PlayWire {
    fn into_event(self) -> RawEvent {
        RawEvent {
            id: self.about.event_idx,
            type_tag: self.result.event_type_id,
            period: self.about.period,
            ordinal: self.about.ordinal_num,
            time_remaining: self.about.period_time_remaining,
            occurred_at: self.about.date_time.as_deref().and_then(parse_utc),
            score: Score { away: self.about.goals.away, home: self.about.goals.home },
            team: self.team.and_then(|t| t.tri_code),
            participants: self
                .players
                .into_iter()
                .map(|p| Participant {
                    id: p.player.id,
                    name: p.player.full_name,
                    role: p.player_type,
                    season_total: p.season_total,
                })
                .collect(),
            detail: EventDetail {
                strength: self.result.strength.and_then(|s| s.code),
                penalty_minutes: self.result.penalty_minutes,
                penalty_severity: self.result.penalty_severity,
                infraction: self.result.secondary_type,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED_FIXTURE: &str = r#"{
        "gameData": {
            "teams": {
                "away": {"id": 25, "name": "Dallas Stars", "triCode": "DAL"},
                "home": {"id": 16, "name": "Chicago Blackhawks", "triCode": "CHI"}
            },
            "venue": {"name": "United Center", "city": "Chicago"},
            "datetime": {"dateTime": "2018-04-05T00:30:00Z"},
            "players": {
                "ID8474000": {
                    "id": 8474000,
                    "fullName": "Jamie Benn",
                    "primaryNumber": "14",
                    "currentTeam": {"triCode": "DAL"}
                }
            }
        },
        "liveData": {
            "linescore": {
                "currentPeriod": 2,
                "teams": {"away": {"goals": 1}, "home": {"goals": 0}}
            },
            "plays": {
                "allPlays": [
                    {
                        "about": {
                            "eventIdx": 3,
                            "period": 1,
                            "ordinalNum": "1st",
                            "periodTimeRemaining": "12:45",
                            "dateTime": "2018-04-05T00:48:10Z",
                            "goals": {"away": 1, "home": 0}
                        },
                        "result": {
                            "eventTypeId": "GOAL",
                            "strength": {"code": "EVEN"}
                        },
                        "players": [
                            {
                                "player": {"id": 8474000, "fullName": "Jamie Benn"},
                                "playerType": "Scorer",
                                "seasonTotal": 30
                            }
                        ],
                        "team": {"triCode": "DAL"}
                    }
                ]
            }
        }
    }"#;

    #[test]
    fn decodes_live_feed_into_snapshot() {
        let wire: LiveFeedWire = serde_json::from_str(FEED_FIXTURE).unwrap();
        let snap = wire.into_snapshot();

        assert_eq!(snap.away.tricode, "DAL");
        assert_eq!(snap.home.name, "Chicago Blackhawks");
        assert_eq!(snap.venue.as_ref().unwrap().name, "United Center");
        assert_eq!(snap.current_period, 2);
        assert_eq!(snap.score, Score { away: 1, home: 0 });
        assert_eq!(snap.events.len(), 1);

        let goal = &snap.events[0];
        assert_eq!(goal.id, 3);
        assert_eq!(goal.type_tag, "GOAL");
        assert_eq!(goal.ordinal, "1st");
        assert_eq!(goal.participants[0].role, "Scorer");
        assert_eq!(goal.participants[0].season_total, Some(30));
        assert_eq!(snap.player(8474000).unwrap().number.as_deref(), Some("14"));
        assert!(goal.occurred_at.is_some());
    }

    #[test]
    fn decodes_feed_with_missing_optionals() {
        let wire: LiveFeedWire = serde_json::from_str(
            r#"{
                "gameData": {
                    "teams": {
                        "away": {"id": 25, "name": "Dallas Stars", "triCode": "DAL"},
                        "home": {"id": 16, "name": "Chicago Blackhawks", "triCode": "CHI"}
                    },
                    "players": {}
                },
                "liveData": {
                    "linescore": {"teams": {"away": {}, "home": {}}},
                    "plays": {}
                }
            }"#,
        )
        .unwrap();
        let snap = wire.into_snapshot();

        assert!(snap.is_pregame());
        assert!(snap.venue.is_none());
        assert!(snap.scheduled_start.is_none());
        assert!(snap.latest_event().is_none());
    }

    #[test]
    fn schedule_finds_game_for_team() {
        let sched: ScheduleData = serde_json::from_str(
            r#"{
                "dates": [
                    {"games": [
                        {"gamePk": 2017021205, "teams": {
                            "away": {"team": {"id": 10}},
                            "home": {"team": {"id": 12}}
                        }},
                        {"gamePk": 2017021207, "teams": {
                            "away": {"team": {"id": 25}},
                            "home": {"team": {"id": 16}}
                        }}
                    ]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(sched.game_for_team(25).as_deref(), Some("2017021207"));
        assert_eq!(sched.game_for_team(16).as_deref(), Some("2017021207"));
        assert_eq!(sched.game_for_team(99), None);
    }
}

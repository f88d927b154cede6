// ===============================
// src/classify.rs
// ===============================
//
// Pure mapping RawEvent x GameSnapshot -> Option<DomainEvent>.
//
// The shootout period is checked first: during period 5 the feed reuses GOAL
// and SHOT for attempts, so the regular rules must not see them. Tags that map
// to nothing are not errors; the caller marks them known so they are never
// reconsidered. Classification never fails on missing participants: it yields
// the variant with the hole left open and lets formatting decide.
//

use chrono::Local;

use crate::domain::{
    DomainEvent, GameEnded, GameScheduled, GameSnapshot, GameStarted, GoalScored, Participant,
    Penalty, PeriodUpdate, PlayerRef, RawEvent, ShootoutAttempt, ShotOutcome, SHOOTOUT_PERIOD,
};

pub fn classify(play: &RawEvent, snap: &GameSnapshot) -> Option<DomainEvent> {
    if play.period == SHOOTOUT_PERIOD {
        let outcome = match play.type_tag.as_str() {
            "GOAL" => ShotOutcome::Made,
            "SHOT" => ShotOutcome::Missed,
            _ => return None,
        };
        return Some(DomainEvent::ShootoutAttempt(shootout_attempt(play, snap, outcome)));
    }

    match play.type_tag.as_str() {
        "GAME_SCHEDULED" => Some(DomainEvent::GameScheduled(GameScheduled {
            matchup: snap.matchup(),
            venue: snap.venue.clone(),
            scheduled_for: snap.scheduled_start.map(|t| t.with_timezone(&Local)),
        })),
        "PERIOD_START" if play.period == 1 => Some(DomainEvent::GameStarted(GameStarted {
            matchup: snap.matchup(),
            started_at: play.occurred_at.map(|t| t.with_timezone(&Local)),
        })),
        "PERIOD_START" => Some(DomainEvent::PeriodStarted(period_update(play, snap))),
        "PERIOD_END" => Some(DomainEvent::PeriodEnded(period_update(play, snap))),
        "GOAL" => Some(DomainEvent::GoalScored(goal(play, snap))),
        "GAME_END" => Some(DomainEvent::GameEnded(game_ended(play, snap))),
        "PENALTY" => Some(DomainEvent::Penalty(penalty(play, snap))),
        _ => None,
    }
}

/// Roster lookup with a fallback to the participant's own name; jersey number
/// and team only come from the roster.
fn resolve(snap: &GameSnapshot, participant: &Participant) -> PlayerRef {
    match snap.player(participant.id) {
        Some(p) => PlayerRef {
            name: p.full_name.clone(),
            number: p.number.clone(),
            season_total: participant.season_total,
        },
        None => PlayerRef {
            name: participant.name.clone(),
            number: None,
            season_total: participant.season_total,
        },
    }
}

fn resolve_role(snap: &GameSnapshot, play: &RawEvent, role: &str) -> Option<PlayerRef> {
    play.participant(role).map(|p| resolve(snap, p))
}

fn period_update(play: &RawEvent, snap: &GameSnapshot) -> PeriodUpdate {
    PeriodUpdate {
        matchup: snap.matchup(),
        ordinal: play.ordinal.clone(),
        score: play.score,
    }
}

fn goal(play: &RawEvent, snap: &GameSnapshot) -> GoalScored {
    GoalScored {
        matchup: snap.matchup(),
        team: play.team.clone(),
        scorer: resolve_role(snap, play, "Scorer"),
        assists: play.participants_with("Assist").map(|p| resolve(snap, p)).collect(),
        strength: play.detail.strength.clone(),
        score: play.score,
        ordinal: play.ordinal.clone(),
        time_remaining: play.time_remaining.clone(),
    }
}

fn penalty(play: &RawEvent, snap: &GameSnapshot) -> Penalty {
    Penalty {
        matchup: snap.matchup(),
        team: play.team.clone(),
        penalized: resolve_role(snap, play, "PenaltyOn"),
        drawn_by: resolve_role(snap, play, "DrewBy"),
        minutes: play.detail.penalty_minutes,
        severity: play.detail.penalty_severity.clone(),
        infraction: play.detail.infraction.clone(),
        score: play.score,
        ordinal: play.ordinal.clone(),
        time_remaining: play.time_remaining.clone(),
    }
}

fn shootout_attempt(play: &RawEvent, snap: &GameSnapshot, outcome: ShotOutcome) -> ShootoutAttempt {
    // The feed tags a converted attempt's shooter as "Scorer", a stopped one
    // as "Shooter".
    let shooter = resolve_role(snap, play, "Scorer").or_else(|| resolve_role(snap, play, "Shooter"));
    ShootoutAttempt {
        matchup: snap.matchup(),
        outcome,
        team: play.team.clone(),
        shooter,
        goalie: resolve_role(snap, play, "Goalie"),
        score: play.score,
    }
}

fn game_ended(play: &RawEvent, snap: &GameSnapshot) -> GameEnded {
    GameEnded {
        matchup: snap.matchup(),
        final_score: snap.score,
        final_ordinal: play.ordinal.clone(),
        past_regulation: play.period > 3,
    }
}

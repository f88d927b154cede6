// ===============================
// src/message.rs
// ===============================
//
// Human-readable announcement text. Pure functions of a domain event.
//
// Formatters that need a participant the classifier could not resolve return
// None: a half-empty announcement is worse than none, and the raw event has
// already been dumped for inspection by then.
//

use crate::domain::{
    GameEnded, GameScheduled, GameStarted, GoalScored, Matchup, Penalty, PeriodUpdate, PlayerRef,
    Score, ShootoutAttempt, ShotOutcome,
};

fn score_line(matchup: &Matchup, score: Score) -> String {
    format!(
        "{} {} - {} {}",
        matchup.away.tricode, score.away, matchup.home.tricode, score.home
    )
}

fn clock_suffix(time_remaining: Option<&str>, ordinal: &str) -> String {
    match time_remaining {
        Some(t) => format!(", {t} left in {ordinal}."),
        None => ".".to_string(),
    }
}

fn player_tag(p: &PlayerRef) -> String {
    match &p.number {
        Some(n) => format!("#{n} {}", p.name),
        None => p.name.clone(),
    }
}

fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [rest @ .., last] => format!("{} and {last}", rest.join(", ")),
    }
}

pub fn game_scheduled(ev: &GameScheduled) -> String {
    let mut msg = format!(
        "Game watch is on! Updates coming for {} at {}",
        ev.matchup.away.name, ev.matchup.home.name
    );
    match &ev.venue {
        Some(v) => {
            msg.push_str(&format!(", live from {}", v.name));
            match &v.city {
                Some(city) => msg.push_str(&format!(" in {city}.")),
                None => msg.push('.'),
            }
        }
        None => msg.push('.'),
    }
    msg
}

pub fn game_started(ev: &GameStarted) -> String {
    let mut msg = format!(
        "{} at {} has started.",
        ev.matchup.away.name, ev.matchup.home.name
    );
    if let Some(t) = ev.started_at {
        msg.push_str(&format!(" Puck drop: {} local time.", t.format("%-I:%M %p")));
    }
    msg
}

pub fn period_started(ev: &PeriodUpdate) -> String {
    format!(
        "The {} period has started. {}",
        ev.ordinal,
        score_line(&ev.matchup, ev.score)
    )
}

pub fn period_ended(ev: &PeriodUpdate) -> String {
    format!(
        "The {} period has ended. {}",
        ev.ordinal,
        score_line(&ev.matchup, ev.score)
    )
}

pub fn penalty(ev: &Penalty) -> Option<String> {
    let penalized = ev.penalized.as_ref()?;
    let drawn_by = ev.drawn_by.as_ref()?;

    let mut msg = match &ev.team {
        Some(team) => format!("{team} penalty ({})", penalized.name),
        None => format!("Penalty ({})", penalized.name),
    };
    if let Some(minutes) = ev.minutes {
        msg.push_str(&format!(", {minutes}-minute"));
        if let Some(severity) = &ev.severity {
            msg.push_str(&format!(" {}", severity.to_lowercase()));
        }
    }
    if let Some(infraction) = &ev.infraction {
        msg.push_str(&format!(" for {}", infraction.to_lowercase()));
    }
    msg.push_str(&format!(" (drawn by {})", drawn_by.name));
    msg.push_str(&format!(". {}", score_line(&ev.matchup, ev.score)));
    msg.push_str(&clock_suffix(ev.time_remaining.as_deref(), &ev.ordinal));
    Some(msg)
}

pub fn goal(ev: &GoalScored) -> Option<String> {
    let scorer = ev.scorer.as_ref()?;

    // "EVEN" is the unremarkable case; anything else (PPG, SHG) is worth naming.
    let label = match ev.strength.as_deref() {
        None | Some("EVEN") => "goal".to_string(),
        Some(code) => code.to_string(),
    };

    let mut msg = match &ev.team {
        Some(team) => format!("{team} {label} scored by {}", player_tag(scorer)),
        None => format!("{} scored by {}", capitalize(&label), player_tag(scorer)),
    };
    if let Some(total) = scorer.season_total {
        msg.push_str(&format!(" ({total})"));
    }

    let assists: Vec<String> = ev.assists.iter().map(|a| a.name.clone()).collect();
    if !assists.is_empty() {
        msg.push_str(&format!(", assisted by {}", join_names(&assists)));
    }

    msg.push_str(&format!(". {}", score_line(&ev.matchup, ev.score)));
    msg.push_str(&clock_suffix(ev.time_remaining.as_deref(), &ev.ordinal));
    Some(msg)
}

pub fn shootout_attempt(ev: &ShootoutAttempt) -> Option<String> {
    let shooter = ev.shooter.as_ref()?;

    let outcome = match ev.outcome {
        ShotOutcome::Made => "GOOD",
        ShotOutcome::Missed => "MISS",
    };
    let mut msg = match &ev.team {
        Some(team) => format!("SO: {team} attempt {outcome} by {}", player_tag(shooter)),
        None => format!("SO: attempt {outcome} by {}", player_tag(shooter)),
    };
    if ev.outcome == ShotOutcome::Missed {
        if let Some(goalie) = &ev.goalie {
            msg.push_str(&format!(" (saved by {})", goalie.name));
        }
    }
    msg.push_str(&format!(
        ". {} in the shootout.",
        score_line(&ev.matchup, ev.score)
    ));
    Some(msg)
}

pub fn game_ended(ev: &GameEnded) -> String {
    let final_tag = if ev.past_regulation {
        format!("Final/{}", ev.final_ordinal)
    } else {
        "Final".to_string()
    };
    format!(
        "{} at {} has ended. {}: {}",
        ev.matchup.away.name,
        ev.matchup.home.name,
        final_tag,
        score_line(&ev.matchup, ev.final_score)
    )
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

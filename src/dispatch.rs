// ===============================
// src/dispatch.rs
// ===============================
//
// Typed observer table: one list of callbacks per domain-event variant plus a
// NoData slot, invoked synchronously in registration order on the watch loop's
// own task. Exact payload types per slot, no dynamically-typed bus.
//
// An observer returning Err is logged and counted; it never affects the other
// observers, the ledger persistence step, or the loop.
//

use tracing::error;

use crate::domain::{
    DomainEvent, GameEnded, GameScheduled, GameStarted, GoalScored, Penalty, PeriodUpdate,
    ShootoutAttempt,
};
use crate::metrics::{EVENTS, OBSERVER_ERRORS};

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

type Slot<T> = Vec<Box<dyn Fn(&T) -> Result<(), ObserverError> + Send + Sync>>;

#[derive(Default)]
pub struct Dispatcher {
    game_scheduled: Slot<GameScheduled>,
    game_started: Slot<GameStarted>,
    period_started: Slot<PeriodUpdate>,
    period_ended: Slot<PeriodUpdate>,
    penalty: Slot<Penalty>,
    goal: Slot<GoalScored>,
    shootout: Slot<ShootoutAttempt>,
    game_ended: Slot<GameEnded>,
    no_data: Slot<str>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_game_scheduled<F>(&mut self, f: F)
    where
        F: Fn(&GameScheduled) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.game_scheduled.push(Box::new(f));
    }

    pub fn on_game_started<F>(&mut self, f: F)
    where
        F: Fn(&GameStarted) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.game_started.push(Box::new(f));
    }

    pub fn on_period_started<F>(&mut self, f: F)
    where
        F: Fn(&PeriodUpdate) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.period_started.push(Box::new(f));
    }

    pub fn on_period_ended<F>(&mut self, f: F)
    where
        F: Fn(&PeriodUpdate) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.period_ended.push(Box::new(f));
    }

    pub fn on_penalty<F>(&mut self, f: F)
    where
        F: Fn(&Penalty) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.penalty.push(Box::new(f));
    }

    pub fn on_goal<F>(&mut self, f: F)
    where
        F: Fn(&GoalScored) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.goal.push(Box::new(f));
    }

    pub fn on_shootout_attempt<F>(&mut self, f: F)
    where
        F: Fn(&ShootoutAttempt) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.shootout.push(Box::new(f));
    }

    pub fn on_game_ended<F>(&mut self, f: F)
    where
        F: Fn(&GameEnded) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.game_ended.push(Box::new(f));
    }

    pub fn on_no_data<F>(&mut self, f: F)
    where
        F: Fn(&str) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.no_data.push(Box::new(f));
    }

    pub fn dispatch(&self, event: &DomainEvent) {
        let kind = event.kind();
        match event {
            DomainEvent::GameScheduled(e) => fan_out(kind, &self.game_scheduled, e),
            DomainEvent::GameStarted(e) => fan_out(kind, &self.game_started, e),
            DomainEvent::PeriodStarted(e) => fan_out(kind, &self.period_started, e),
            DomainEvent::PeriodEnded(e) => fan_out(kind, &self.period_ended, e),
            DomainEvent::Penalty(e) => fan_out(kind, &self.penalty, e),
            DomainEvent::GoalScored(e) => fan_out(kind, &self.goal, e),
            DomainEvent::ShootoutAttempt(e) => fan_out(kind, &self.shootout, e),
            DomainEvent::GameEnded(e) => fan_out(kind, &self.game_ended, e),
        }
    }

    /// Terminal fetch outcome, not a feed event; carries only the game id.
    pub fn no_data(&self, game_id: &str) {
        fan_out("no_data", &self.no_data, game_id);
    }
}

fn fan_out<T: ?Sized>(
    kind: &'static str,
    slot: &[Box<dyn Fn(&T) -> Result<(), ObserverError> + Send + Sync>],
    payload: &T,
) {
    for (idx, observer) in slot.iter().enumerate() {
        if let Err(e) = observer(payload) {
            OBSERVER_ERRORS.with_label_values(&[kind]).inc();
            error!(kind, observer = idx, error = %e, "observer failed");
        }
    }
    EVENTS.with_label_values(&[kind]).inc();
}

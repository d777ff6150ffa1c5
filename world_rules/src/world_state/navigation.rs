//! Travel across the world map: destinations, in-flight paths and arrival.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

use super::{Coords, WorldMap};
use crate::mechanics::plan;

/// Errors raised while planning travel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("no route from {from} to {to}")]
    UnreachableDestination { from: Coords, to: Coords },
}

/// A freshly stored travel plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelPlan {
    pub from: Coords,
    pub destination: Coords,
    /// Cells still to enter, next step first. Empty when already at the destination.
    pub steps: Vec<Coords>,
}

impl TravelPlan {
    /// Check if no travel is needed.
    pub fn is_already_there(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Outcome of advancing along an in-flight path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TravelEvent {
    /// Moved one cell, destination not yet reached.
    StepTaken(Coords),
    /// Entered the destination; travel state has been cleared.
    Arrived(Coords),
}

impl TravelEvent {
    pub fn location(&self) -> Coords {
        match self {
            TravelEvent::StepTaken(c) | TravelEvent::Arrived(c) => *c,
        }
    }

    pub fn is_arrival(&self) -> bool {
        matches!(self, TravelEvent::Arrived(_))
    }
}

/// The travel-related part of a world map, without location content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationSnapshot {
    pub current: Coords,
    pub destination: Option<Coords>,
    pub path: VecDeque<Coords>,
}

impl WorldMap {
    /// Plan a route to `goal` and make it the in-flight travel, replacing any previous one.
    ///
    /// Choosing the current position succeeds and leaves nothing in flight.
    pub fn set_destination(&mut self, goal: Coords) -> Result<TravelPlan, NavigationError> {
        let from = self.current;
        let planned = plan(&*self, from, goal);
        if planned.is_empty() {
            return Err(NavigationError::UnreachableDestination { from, to: goal });
        }

        // The planner includes the start cell; the stored path does not.
        let steps: VecDeque<Coords> = planned.into_iter().skip(1).collect();
        if steps.is_empty() {
            self.destination = None;
            self.path.clear();
        } else {
            self.destination = Some(goal);
            self.path = steps;
        }

        tracing::debug!(%from, to = %goal, steps = self.path.len(), "Travel planned");

        Ok(TravelPlan {
            from,
            destination: goal,
            steps: self.path.iter().copied().collect(),
        })
    }

    /// Move one cell along the in-flight path. Returns `None` when nothing is in flight.
    pub fn advance_one_step(&mut self) -> Option<TravelEvent> {
        let next = self.path.pop_front()?;
        self.current = next;

        if self.destination == Some(next) || self.path.is_empty() {
            self.destination = None;
            self.path.clear();
            tracing::debug!(at = %next, "Arrived");
            Some(TravelEvent::Arrived(next))
        } else {
            Some(TravelEvent::StepTaken(next))
        }
    }

    /// Abandon in-flight travel without moving.
    pub fn cancel_travel(&mut self) {
        self.destination = None;
        self.path.clear();
    }

    /// Move directly to a cell, bypassing travel. In-flight travel is re-planned from the
    /// new position, or dropped if it can no longer be completed.
    pub fn teleport(&mut self, to: Coords) -> Result<(), NavigationError> {
        if !self.locations.iter().any(|l| l.coords == to) {
            return Err(NavigationError::UnreachableDestination {
                from: self.current,
                to,
            });
        }
        self.current = to;
        if let Some(goal) = self.destination {
            if self.set_destination(goal).is_err() {
                self.cancel_travel();
            }
        }
        Ok(())
    }

    pub fn navigation_snapshot(&self) -> NavigationSnapshot {
        NavigationSnapshot {
            current: self.current,
            destination: self.destination,
            path: self.path.clone(),
        }
    }

    pub fn restore_navigation(&mut self, snapshot: NavigationSnapshot) {
        self.current = snapshot.current;
        self.destination = snapshot.destination;
        self.path = snapshot.path;
    }
}

/// Undo log for navigation, keyed by the turn each change happened on.
///
/// Each entry holds the state from *before* the change, so restoring the oldest entry
/// newer than a turn puts the map back where it was at the end of that turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationJournal {
    entries: Vec<(u64, NavigationSnapshot)>,
}

impl NavigationJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the state of `map` before it is changed on `turn`.
    pub fn record(&mut self, turn: u64, map: &WorldMap) {
        self.record_snapshot(turn, map.navigation_snapshot());
    }

    /// Remember a state taken before a change whose turn was only known afterwards.
    pub fn record_snapshot(&mut self, turn: u64, snapshot: NavigationSnapshot) {
        self.entries.push((turn, snapshot));
    }

    /// Drop every entry, making all past changes permanent.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Undo every change made after `turn`. Returns true if the map was changed.
    pub fn rollback_after(&mut self, turn: u64, map: &mut WorldMap) -> bool {
        let Some(first_newer) = self.entries.iter().position(|(t, _)| *t > turn) else {
            return false;
        };
        let mut undone = self.entries.split_off(first_newer);
        let (_, snapshot) = undone.swap_remove(0);
        map.restore_navigation(snapshot);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

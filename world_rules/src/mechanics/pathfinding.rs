//! Grid path planning (A* over a 4-connected lattice).
//!
//! The open set is a binary heap keyed on `f = g + h`. Ties on `f` go to the node closer
//! to the goal (lower `h`), then to the node that was pushed first. Neighbours are pushed
//! in [`Direction::ALL`] order, so the same request always yields the same path.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::{Direction, Grid};
use crate::world_state::Coords;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenNode {
    f: u32,
    h: u32,
    seq: u64,
    coords: Coords,
}

// Reversed so that `BinaryHeap` pops the smallest (f, h, seq) first.
impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.h.cmp(&self.h))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Plan the shortest path from `start` to `goal`.
///
/// The returned path includes both endpoints, so `start == goal` yields `[start]`.
/// An empty path means `start` or `goal` is not on the grid, or `goal` cannot be reached.
pub fn plan<G: Grid + ?Sized>(grid: &G, start: Coords, goal: Coords) -> Vec<Coords> {
    if !grid.contains(start) || !grid.contains(goal) {
        return Vec::new();
    }

    let mut open = BinaryHeap::new();
    let mut closed: HashSet<Coords> = HashSet::new();
    let mut g_scores: HashMap<Coords, u32> = HashMap::new();
    let mut came_from: HashMap<Coords, Coords> = HashMap::new();
    let mut seq = 0u64;

    let h = start.manhattan(goal);
    g_scores.insert(start, 0);
    open.push(OpenNode {
        f: h,
        h,
        seq,
        coords: start,
    });

    while let Some(node) = open.pop() {
        if node.coords == goal {
            return reconstruct(&came_from, goal);
        }

        // Stale heap entry for a node that was already expanded.
        if !closed.insert(node.coords) {
            continue;
        }

        let g = g_scores.get(&node.coords).copied().unwrap_or(u32::MAX);

        for direction in Direction::ALL {
            let next = node.coords.step(direction);
            if !grid.contains(next) || closed.contains(&next) {
                continue;
            }

            let tentative = g + 1;
            if tentative < g_scores.get(&next).copied().unwrap_or(u32::MAX) {
                came_from.insert(next, node.coords);
                g_scores.insert(next, tentative);

                seq += 1;
                let h = next.manhattan(goal);
                open.push(OpenNode {
                    f: tentative + h,
                    h,
                    seq,
                    coords: next,
                });
            }
        }
    }

    Vec::new()
}

fn reconstruct(came_from: &HashMap<Coords, Coords>, goal: Coords) -> Vec<Coords> {
    let mut path = vec![goal];
    let mut current = goal;
    while let Some(previous) = came_from.get(&current) {
        path.push(*previous);
        current = *previous;
    }
    path.reverse();
    path
}

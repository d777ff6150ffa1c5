//! World mechanics: grid topology and travel planning.

mod pathfinding;

pub use pathfinding::*;

use serde::{Deserialize, Serialize};

use crate::world_state::Coords;

/// The four travel directions on the grid. Diagonal movement is not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// All directions in the order neighbours are explored.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Offset applied to a coordinate when stepping in this direction.
    ///
    /// `y` grows southwards, matching row-major grid storage.
    pub fn offset(&self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }
}

/// Anything travel can be planned across.
pub trait Grid {
    /// Check whether a cell exists on this grid.
    fn contains(&self, coords: Coords) -> bool;
}

/// A fully open rectangular lattice with cells `0..width` by `0..height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenGrid {
    pub width: i32,
    pub height: i32,
}

impl OpenGrid {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

impl Grid for OpenGrid {
    fn contains(&self, coords: Coords) -> bool {
        (0..self.width).contains(&coords.x) && (0..self.height).contains(&coords.y)
    }
}

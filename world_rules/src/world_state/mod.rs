//! World state management - the per-narrative world map and its locations.

mod navigation;

pub use navigation::*;

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::entities::StaticEntryId;
use crate::mechanics::{Direction, Grid};

/// Width and height of every world map.
pub const GRID_SIZE: i32 = 8;

/// Where a freshly created narrative starts (0-based, one cell up-left of true centre).
pub const DEFAULT_POSITION: Coords = Coords { x: 3, y: 3 };

/// A cell position on the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coords {
    pub x: i32,
    pub y: i32,
}

impl Coords {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to another cell.
    pub fn manhattan(&self, other: Coords) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// The neighbouring cell in the given direction (may be off-grid).
    pub fn step(&self, direction: Direction) -> Coords {
        let (dx, dy) = direction.offset();
        Coords::new(self.x + dx, self.y + dy)
    }
}

impl std::fmt::Display for Coords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Always-in-context lore, attached to a narrative or to a single location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticEntry {
    pub id: StaticEntryId,
    pub title: String,
    pub content: String,
}

impl StaticEntry {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: StaticEntryId::new(),
            title: title.into(),
            content: content.into(),
        }
    }
}

/// A location in the game world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub coords: Coords,
    pub name: String,
    pub description: String,
    /// Long-form prompt used to generate art or prose for this place.
    pub prompt: String,
    pub image_url: Option<String>,
    /// Lore only visible while the narrative is at this location.
    pub local_static_entries: Vec<StaticEntry>,
}

impl Location {
    /// Create an empty, unnamed location.
    pub fn empty(coords: Coords) -> Self {
        Self {
            coords,
            name: String::new(),
            description: String::new(),
            prompt: String::new(),
            image_url: None,
            local_static_entries: Vec::new(),
        }
    }

    /// Name for display, falling back to the coordinates for unnamed cells.
    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            self.coords.to_string()
        } else {
            self.name.clone()
        }
    }

    /// Apply a content update.
    pub fn apply(&mut self, patch: LocationPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(prompt) = patch.prompt {
            self.prompt = prompt;
        }
        if let Some(image_url) = patch.image_url {
            self.image_url = Some(image_url).filter(|url| !url.is_empty());
        }
    }
}

/// Partial update for a location's generated content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub prompt: Option<String>,
    /// An empty string clears the image.
    pub image_url: Option<String>,
}

/// The per-narrative 8x8 world map plus travel state.
///
/// Invariant: when `destination` is set, `path` is non-empty and ends at `destination`.
/// The path never includes the current position; its front is the next cell to enter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMap {
    locations: Vec<Location>,
    current: Coords,
    destination: Option<Coords>,
    path: VecDeque<Coords>,
}

impl Default for WorldMap {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldMap {
    /// Create a map of 64 empty locations, positioned at [`DEFAULT_POSITION`].
    pub fn new() -> Self {
        let locations = (0..GRID_SIZE)
            .flat_map(|y| (0..GRID_SIZE).map(move |x| Location::empty(Coords::new(x, y))))
            .collect();

        Self {
            locations,
            current: DEFAULT_POSITION,
            destination: None,
            path: VecDeque::new(),
        }
    }

    /// Build a map from externally supplied locations (e.g. a generated grid).
    ///
    /// Cells that are missing are simply absent; travel routes around them.
    pub fn from_locations(locations: Vec<Location>, current: Coords) -> Self {
        Self {
            locations,
            current,
            destination: None,
            path: VecDeque::new(),
        }
    }

    pub fn current(&self) -> Coords {
        self.current
    }

    pub fn destination(&self) -> Option<Coords> {
        self.destination
    }

    /// Remaining cells to travel through, next step first.
    pub fn path(&self) -> impl Iterator<Item = &Coords> {
        self.path.iter()
    }

    pub fn path_len(&self) -> usize {
        self.path.len()
    }

    /// Check if travel is in flight.
    pub fn is_travelling(&self) -> bool {
        self.destination.is_some()
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// Get the location at the given coordinates.
    pub fn location_at(&self, coords: Coords) -> Option<&Location> {
        self.index_of(coords).and_then(|i| self.locations.get(i))
    }

    /// Get mutable location at the given coordinates.
    pub fn location_at_mut(&mut self, coords: Coords) -> Option<&mut Location> {
        let i = self.index_of(coords)?;
        self.locations.get_mut(i)
    }

    /// The location the narrative is currently at.
    pub fn current_location(&self) -> Option<&Location> {
        self.location_at(self.current)
    }

    /// Find a named location (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Option<&Location> {
        let wanted = name.trim();
        if wanted.is_empty() {
            return None;
        }
        self.locations
            .iter()
            .find(|loc| loc.name.trim().eq_ignore_ascii_case(wanted))
    }

    /// The location at `coords` followed by its named neighbours, including diagonals.
    pub fn neighbourhood(&self, coords: Coords) -> Vec<&Location> {
        let mut found = Vec::new();
        if let Some(centre) = self.location_at(coords) {
            found.push(centre);
        }
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                if let Some(loc) = self.location_at(Coords::new(coords.x + dx, coords.y + dy)) {
                    if !loc.name.trim().is_empty() {
                        found.push(loc);
                    }
                }
            }
        }
        found
    }

    /// Update a location's generated content.
    pub fn update_location(&mut self, coords: Coords, patch: LocationPatch) -> bool {
        match self.location_at_mut(coords) {
            Some(location) => {
                location.apply(patch);
                true
            }
            None => false,
        }
    }

    fn index_of(&self, coords: Coords) -> Option<usize> {
        // Maps built by `new` are row-major; fall back to a scan for anything else.
        if (0..GRID_SIZE).contains(&coords.x) && (0..GRID_SIZE).contains(&coords.y) {
            let i = (coords.y * GRID_SIZE + coords.x) as usize;
            if self.locations.get(i).map(|l| l.coords) == Some(coords) {
                return Some(i);
            }
        }
        self.locations.iter().position(|l| l.coords == coords)
    }
}

impl Grid for WorldMap {
    fn contains(&self, coords: Coords) -> bool {
        self.index_of(coords).is_some()
    }
}

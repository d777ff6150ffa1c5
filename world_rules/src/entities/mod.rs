//! Identifiers and roster entities shared by every narrative.

mod character;

pub use character::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create an identifier from a specific UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Create a nil/empty identifier (useful for defaults).
            pub fn nil() -> Self {
                Self(Uuid::nil())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// One playthrough of a story.
    NarrativeId
);
uuid_id!(
    /// A story: the shared template narratives are started from.
    StoryId
);
uuid_id!(
    /// A character on a story's roster (user, narrator or AI persona).
    CharacterId
);
uuid_id!(
    /// A message on a narrative timeline.
    MessageId
);
uuid_id!(
    /// A story-scoped dynamic lore entry.
    DynamicEntryId
);
uuid_id!(
    /// An always-in-context lore entry, attached to a narrative or a location.
    StaticEntryId
);

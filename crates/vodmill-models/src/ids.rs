//! Newtype identifiers used across the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Create from an existing string.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id! {
    /// Unique identifier for an encode task.
    TaskId
}

string_id! {
    /// Identifier for a source media item.
    MediaId
}

string_id! {
    /// Identity of an executing worker (local slot or remote proxy).
    WorkerId
}

string_id! {
    /// Identifier for a registered remote agent.
    AgentId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
        assert_ne!(MediaId::new(), MediaId::new());
    }

    #[test]
    fn test_id_round_trip() {
        let id = MediaId::from_string("media-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"media-42\"");
        let back: MediaId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

//! Identifiers for triggers, episodes and sessions.
//!
//! All three are random UUIDs. They are written in full to memory files and
//! logged by their first eight hex digits.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// A fresh random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// First eight hex digits, for log lines
            pub fn short(&self) -> String {
                let mut hex = self.0.simple().to_string();
                hex.truncate(8);
                hex
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// One chat message addressed to the agent
    TriggerId
);

uuid_id!(
    /// One line of a namespace's episode log
    EpisodeId
);

uuid_id!(
    /// One connection to a server, from login to shutdown
    SessionId
);

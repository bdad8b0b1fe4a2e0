//! Branded ID newtypes for type safety.
//!
//! Every identity in the weld core has a distinct ID type implemented as a
//! newtype wrapper around `String`. This prevents accidentally passing a
//! channel ID where an event-emitter ID is expected.
//!
//! All IDs are UUID v7 (time-ordered) generated via [`uuid::Uuid::now_v7`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for one end of a message channel.
    ChannelId
}

branded_id! {
    /// Unique identifier for an event-log instance.
    ///
    /// A fresh ID is drawn for every log, so a restarted producer is
    /// distinguishable from the one a consumer is already caught up with.
    EmitterId
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

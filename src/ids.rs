//! Owned identifier types for rooms, users, and events.
//!
//! These mirror the protocol's sigil-prefixed identifier grammar:
//! rooms begin with `!`, users with `@`, and server-issued event ids with `$`.
//! Locally-generated temporary event ids (used for optimistic sends) begin
//! with `~`, a sigil the server never issues, so a temporary id can never
//! collide with a confirmed one.

use std::fmt;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An identifier string did not match the expected sigil or was empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} id: {input:?}")]
pub struct IdParseError {
    kind: &'static str,
    input: String,
}

macro_rules! owned_id {
    ($(#[$doc:meta])* $name:ident, $kind:literal, [$($sigil:literal),+]) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Box<str>);

        impl $name {
            /// Validates and takes ownership of the given identifier string.
            pub fn parse(s: impl AsRef<str>) -> Result<Self, IdParseError> {
                let s = s.as_ref();
                let valid = s.len() > 1 && [$($sigil),+].contains(&s.as_bytes()[0]);
                if valid {
                    Ok(Self(s.into()))
                } else {
                    Err(IdParseError { kind: $kind, input: s.to_owned() })
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
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

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), &self.0)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = IdParseError;
            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }
    };
}

owned_id!(
    /// The identifier of a room, e.g. `!abc123:example.org`.
    OwnedRoomId, "room", [b'!']
);
owned_id!(
    /// The identifier of a user, e.g. `@alice:example.org`.
    OwnedUserId, "user", [b'@']
);
owned_id!(
    /// The identifier of a timeline event.
    ///
    /// Server-confirmed events carry `$`-prefixed ids; optimistic local sends
    /// carry `~`-prefixed temporary ids until the server echo arrives.
    OwnedEventId, "event", [b'$', b'~']
);

impl OwnedEventId {
    /// Generates a fresh temporary id for an optimistic local send.
    pub fn temporary() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Self(format!("~{suffix}").into())
    }

    /// Returns `true` if this is a locally-generated temporary id
    /// that has not (yet) been confirmed by the server.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with('~')
    }
}

//! Typed keys for stored rows.
//!
//! Every table is keyed by a v4 UUID. Wrapping each key in its own type
//! stops a profile id from being handed to a function that deletes
//! identities:
//!
//! ```compile_fail
//! use labsync_core::{IdentityId, ProfileId};
//!
//! fn delete_identity(_id: IdentityId) {}
//! delete_identity(ProfileId::new());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A string that is not a UUID was given where a key was expected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {id_type} {input:?}: {reason}")]
pub struct ParseIdError {
    /// Name of the key type, e.g. `RunId`.
    pub id_type: &'static str,
    pub input: String,
    pub reason: String,
}

macro_rules! uuid_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// A fresh random key.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            #[must_use]
            pub fn into_uuid(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<Uuid>().map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    input: s.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    };
}

uuid_key!(
    /// Key of a local identity row.
    ///
    /// Directory records are matched by external id, never by this value.
    IdentityId
);

uuid_key!(
    /// Key of a PI or student profile row.
    ProfileId
);

uuid_key!(
    /// Key of a pending student create/delete request.
    RequestId
);

uuid_key!(
    /// Key of a sync run row.
    RunId
);

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn test_fresh_keys_differ() {
        assert_ne!(IdentityId::new(), IdentityId::new());
        assert_ne!(RunId::default(), RunId::default());
    }

    #[test]
    fn test_uuid_conversions() {
        let uuid = Uuid::new_v4();
        let id = ProfileId::from(uuid);
        assert_eq!(id.as_uuid(), &uuid);
        assert_eq!(Uuid::from(id), uuid);
        assert_eq!(id.into_uuid(), uuid);
    }

    #[test]
    fn test_display_and_serde_use_the_bare_uuid() {
        let id: RequestId = SAMPLE.parse().unwrap();
        assert_eq!(id.to_string(), SAMPLE);
        assert_eq!(serde_json::to_string(&id).unwrap(), format!("\"{SAMPLE}\""));
    }

    #[test]
    fn test_parse_tolerates_surrounding_whitespace() {
        let id: IdentityId = format!("  {SAMPLE}\n").parse().unwrap();
        assert_eq!(id.to_string(), SAMPLE);
    }

    #[test]
    fn test_parse_error_names_type_and_input() {
        let err = "run-7".parse::<RunId>().unwrap_err();
        assert_eq!(err.id_type, "RunId");
        assert_eq!(err.input, "run-7");
        assert!(err.to_string().starts_with("invalid RunId \"run-7\":"));
    }
}

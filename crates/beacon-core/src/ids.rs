//! Branded ID newtypes.
//!
//! Connection and message IDs are UUID v7 (time-ordered) minted with
//! [`uuid::Uuid::now_v7`]. Principal IDs are opaque strings handed back by the
//! authentication collaborator and never interpreted by the hub.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
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

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

branded_id! {
    /// Identity of one registered connection. Never reused: a reconnecting
    /// peer is issued a fresh one.
    ConnectionId
}

branded_id! {
    /// Identity of one message, used for audit correlation and log fields.
    MessageId
}

branded_id! {
    /// Opaque principal returned by the authentication collaborator.
    PrincipalId
}

impl ConnectionId {
    /// Mint a new, time-ordered connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl MessageId {
    /// Mint a new, time-ordered message ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_is_uuid_v7() {
        let id = ConnectionId::generate();
        let parsed = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn generated_ids_are_unique() {
        let ids: std::collections::HashSet<_> =
            (0..1000).map(|_| ConnectionId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn principal_keeps_opaque_value() {
        let p = PrincipalId::from("user:42");
        assert_eq!(p.as_str(), "user:42");
        assert_eq!(p.to_string(), "user:42");
    }

    #[test]
    fn serde_is_transparent() {
        let id = MessageId::from("m-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"m-1\"");
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

//! Strongly-typed identifiers for Hearth entities
//!
//! Identifiers are chosen by the application at registration time, so they
//! wrap strings rather than UUIDs. Each is a distinct newtype so a check id
//! can never be passed where a service id is expected.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Unique identifier for a registered health check.
    ///
    /// A system failure is keyed by the id of the check that detected it.
    CheckId,
    "check"
);

string_id!(
    /// Unique identifier for a guarded or load-balanced service.
    ServiceId,
    "service"
);

string_id!(
    /// Unique identifier for one instance of a load-balanced service.
    InstanceId,
    "instance"
);

string_id!(
    /// Unique identifier for a recovery action.
    ActionId,
    "action"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert_eq!(CheckId::new("db").to_string(), "check:db");
        assert_eq!(ServiceId::new("payments").to_string(), "service:payments");
        assert_eq!(InstanceId::new("i-1").to_string(), "instance:i-1");
        assert_eq!(ActionId::new("restart").to_string(), "action:restart");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&CheckId::new("db")).unwrap();
        assert_eq!(json, "\"db\"");

        let parsed: ServiceId = serde_json::from_str("\"payments\"").unwrap();
        assert_eq!(parsed.as_str(), "payments");
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut ids = vec![InstanceId::new("b"), InstanceId::new("a"), InstanceId::new("c")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "a");
        assert_eq!(ids[2].as_str(), "c");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(ActionId::generate(), ActionId::generate());
    }
}

//! Strongly-typed document identifiers.
//!
//! Every entity lives in the document store under a string id. The
//! newtypes keep a kid id from being passed where a vehicle id is expected.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of generated document ids (matches Firestore auto-ids).
const DOCUMENT_ID_LENGTH: usize = 20;

macro_rules! document_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        #[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

document_id!(
    /// Id of a kid registered for race events.
    MemberId
);
document_id!(
    /// Id of a race vehicle.
    ResourceId
);
document_id!(
    /// Id of a team.
    GroupId
);
document_id!(
    /// Id of a signed-in user (admin, instructor, host).
    ActorId
);
document_id!(
    /// Id of an assignment history entry.
    HistoryId
);

/// Generate a random alphanumeric document id.
pub fn generate_document_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DOCUMENT_ID_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_document_id_shape() {
        let id = generate_document_id();
        assert_eq!(id.len(), DOCUMENT_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, generate_document_id());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = MemberId::new("kid-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"kid-7\"");
        let back: MemberId = serde_json::from_str("\"kid-7\"").unwrap();
        assert_eq!(back, id);
        assert_eq!(id.to_string(), "kid-7");
    }
}

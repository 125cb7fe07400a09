//! Opaque identifiers
//!
//! Node, send, and grant ids are fixed-length random alphanumeric strings.
//! User ids come from the identity provider and are taken as-is.

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of every minted node/send/grant id
pub const VAULT_ID_LENGTH: usize = 20;

/// Generate a random alphanumeric string of `len` characters.
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Caller identity, supplied already validated by the session layer
    UserId
);
string_id!(
    /// Vault node id (folder or file row)
    NodeId
);
string_id!(SendId);
string_id!(GrantId);

impl NodeId {
    pub fn random() -> Self {
        Self(random_string(VAULT_ID_LENGTH))
    }
}

impl SendId {
    pub fn random() -> Self {
        Self(random_string(VAULT_ID_LENGTH))
    }
}

impl GrantId {
    pub fn random() -> Self {
        Self(random_string(VAULT_ID_LENGTH))
    }
}

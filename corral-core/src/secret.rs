//! Secret value types for desired-state documents.
//!
//! Every credential-shaped field in a kind spec comes as a pair: an inline
//! [`Secret`] value and an [`Existing`] reference to a Secret already present
//! in the cluster. Exactly one of the pair is expected to resolve to a usable
//! value at consumption time. Resolution itself is a collaborator concern;
//! this crate only models the serialized shape.

use serde::{Deserialize, Serialize};

/// An inline secret value as persisted in a desired-state document.
///
/// Non-empty values serialize as the `{encryption, encoding, value}` triple;
/// zero-valued fields are omitted entirely so that an untouched spec
/// round-trips without noise.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Secret {
    /// The encryption scheme of `value`, e.g. `AES256`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encryption: String,
    /// The encoding of the encrypted `value`, e.g. `Base64`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encoding: String,
    /// The secret payload. Decrypted by the secret-reading collaborator
    /// before the operator consumes it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
}

impl Secret {
    /// True if every field is empty.
    pub fn is_zero(&self) -> bool {
        self.encryption.is_empty() && self.encoding.is_empty() && self.value.is_empty()
    }
}

/// A reference to a Secret which already exists in the cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Existing {
    /// The name of the cluster Secret.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// The data key within the cluster Secret holding the value.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    /// The name under which the value is re-exposed to consumers, where the
    /// consuming workload expects a fixed secret name.
    #[serde(default, rename = "internalName", skip_serializing_if = "String::is_empty")]
    pub internal_name: String,
}

impl Existing {
    /// True if every field is empty.
    pub fn is_zero(&self) -> bool {
        self.name.is_empty() && self.key.is_empty() && self.internal_name.is_empty()
    }
}

#[cfg(test)]
#[path = "secret_test.rs"]
mod secret_test;

//! Secret-wrapped configuration values.
//!
//! A [`Secret`] holds a credential string that must never leak through
//! logs or rendered configuration.  `Debug`, `Display` and `Serialize`
//! all produce a fixed mask; the real value is only available through
//! [`Secret::reveal`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Rendered in place of any secret value.
pub const MASK: &str = "********";

/// An opaque credential string.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap `value` as a secret.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Return the underlying value.
    pub fn reveal(&self) -> &str {
        &self.0
    }

    /// An empty secret means "not set".
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Some(value)` when set, `None` when empty.
    pub fn revealed_opt(&self) -> Option<&str> {
        if self.0.is_empty() {
            None
        } else {
            Some(&self.0)
        }
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

impl Serialize for Secret {
    // An unset secret renders empty so that "not set" survives a dump/reload.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_empty() {
            serializer.serialize_str("")
        } else {
            serializer.serialize_str(MASK)
        }
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(Self(value.unwrap_or_default()))
    }
}

// -- Tests --------------------------------------------------------------------

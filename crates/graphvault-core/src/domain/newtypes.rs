//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the identifiers that flow between the
//! transport, the engine, and persisted metadata. Graph-style ids are opaque
//! strings; validation is limited to non-emptiness so that an empty id can
//! never slip into a map key or a persisted file.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::EngineError;

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new id, rejecting the empty string
            ///
            /// # Errors
            /// Returns `EngineError::InvalidId` if the value is empty
            pub fn new(value: impl Into<String>) -> Result<Self, EngineError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(EngineError::InvalidId(concat!(
                        $label,
                        " cannot be empty"
                    )
                    .to_string()));
                }
                Ok(Self(value))
            }

            /// Get the inner string reference
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = EngineError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> Self {
                v.0
            }
        }
    };
}

opaque_id!(
    /// Server-assigned identifier of a single item (file, message, event,
    /// contact, list row)
    ItemId,
    "item id"
);

opaque_id!(
    /// Server-assigned identifier of a logical container (folder, calendar,
    /// list, drive folder)
    ContainerId,
    "container id"
);

opaque_id!(
    /// Server-assigned identifier of a drive or document library
    DriveId,
    "drive id"
);

opaque_id!(
    /// Opaque server cursor representing "all changes since this point"
    ///
    /// Tokens are never inspected, only compared for presence and carried
    /// between runs through the metadata codec.
    DeltaToken,
    "delta token"
);

/// The principal a backup run targets: a user or a site, inside a tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceOwner {
    id: String,
    tenant: String,
}

impl ResourceOwner {
    /// Create a resource owner reference
    ///
    /// # Errors
    /// Returns `EngineError::InvalidId` if either component is empty
    pub fn new(tenant: impl Into<String>, id: impl Into<String>) -> Result<Self, EngineError> {
        let tenant = tenant.into();
        let id = id.into();

        if tenant.is_empty() {
            return Err(EngineError::InvalidId("tenant cannot be empty".to_string()));
        }
        if id.is_empty() {
            return Err(EngineError::InvalidId(
                "resource owner id cannot be empty".to_string(),
            ));
        }

        Ok(Self { id, tenant })
    }

    /// The user or site identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The tenant the owner belongs to
    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }
}

impl Display for ResourceOwner {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.id)
    }
}

//! Typed identifiers
//!
//! Every entity kind gets its own id type so a device id can never be
//! passed where a rollout id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

macro_rules! define_generated_id {
    ($(#[$meta:meta])* $name:ident) => {
        define_id!($(#[$meta])* $name);

        impl $name {
            /// Fresh random id
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }
    };
}

define_id!(
    /// Tenant owning bundles, devices and rollouts
    TenantId
);
define_id!(
    /// Bundle name, unique per tenant
    BundleId
);
define_id!(
    /// Device identity as issued by the identity collaborator
    DeviceId
);
define_generated_id!(RolloutId);
define_generated_id!(PhaseId);
define_generated_id!(AssignmentId);

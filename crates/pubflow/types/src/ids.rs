//! Strongly-typed identifiers for pubflow entities
//!
//! All IDs are UUID-based but wrapped in newtype structs for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a published content item
    ContentItemId,
    "content"
);

uuid_id!(
    /// Unique identifier for a publication request
    PublicationRequestId,
    "publication"
);

uuid_id!(
    /// Unique identifier for a reduction task
    ReductionTaskId,
    "reduction"
);

uuid_id!(
    /// Unique identifier for a selection group (audience segment)
    SelectionGroupId,
    "selgrp"
);

uuid_id!(
    /// Unique identifier for a live hierarchy field
    HierarchyFieldId,
    "field"
);

uuid_id!(
    /// Unique identifier for a live hierarchy field value
    HierarchyValueId,
    "value"
);

uuid_id!(
    /// Per-job GUID keying the exchange directory shared with the reducer
    JobId,
    "job"
);

//! Typed identifiers shared across the Marlin server.
//!
//! Everything in here is small, `Copy` where possible, and value-like: the
//! catalog and storage layers exchange these instead of raw integers so the
//! compiler keeps record ids, timestamps, and collection identities apart.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::fmt::Display;
use std::hash::Hash;
use std::num::ParseIntError;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("failed to parse as integer: {0}")]
pub struct IdParseError(#[from] ParseIntError);

macro_rules! identifier_type {
    ($(#[$docs:meta])* $name:ident, $ty:ty) => {
        $(#[$docs])*
        #[derive(
            Debug, Copy, Clone, Eq, PartialOrd, Ord, PartialEq, Serialize, Deserialize, Hash,
        )]
        pub struct $name($ty);

        impl $name {
            pub const MAX: Self = Self(<$ty>::MAX);

            pub const fn new(id: $ty) -> Self {
                Self(id)
            }

            pub const fn get(&self) -> $ty {
                self.0
            }

            pub fn next(&self) -> Self {
                Self::new(self.0.checked_add(1).expect("incrementing id overflow"))
            }
        }

        impl From<$ty> for $name {
            fn from(int: $ty) -> Self {
                Self::new(int)
            }
        }

        impl Default for $name {
            /// The default for any identifier type is 0
            fn default() -> Self {
                Self::new(0)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self).map_err(Into::into)
            }
        }
    };
}

identifier_type!(
    /// Identifier of a record in the durable catalog. Assigned by the storage
    /// engine; not stable across a drop and re-create of the same namespace.
    RecordId,
    u64
);

identifier_type!(
    /// Monotonically increasing epoch, bumped each time the in-memory catalog
    /// is closed and re-opened.
    CatalogEpoch,
    u64
);

/// Logical commit time handed out by the storage engine.
///
/// Timestamps are totally ordered and strictly increase across commits. The
/// catalog never manufactures one; it only records and compares them.
#[derive(Debug, Default, Copy, Clone, Eq, PartialOrd, Ord, PartialEq, Serialize, Deserialize, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const MAX: Self = Self(u64::MAX);
    pub const MIN: Self = Self(0);

    pub const fn new(ts: u64) -> Self {
        Self(ts)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(ts: u64) -> Self {
        Self::new(ts)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a collection for the lifetime of the process and
/// beyond. Survives rename; never reused, even across drop and re-create.
#[derive(Debug, Copy, Clone, Eq, PartialOrd, Ord, PartialEq, Serialize, Deserialize, Hash)]
pub struct CollectionUuid(Uuid);

impl CollectionUuid {
    /// Generate a fresh identity for a collection being created.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The lowest possible value; used as an iteration lower bound.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CollectionUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CollectionUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<u128> for CollectionUuid {
    fn from(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl Display for CollectionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

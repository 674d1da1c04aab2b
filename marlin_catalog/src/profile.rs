//! Per-database operation profiling configuration.

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::CatalogError;
use crate::Result;

/// Decides whether a finished operation should be written to the profile
/// collection. Implementations live outside the catalog; the catalog only
/// stores and hands them out.
pub trait ProfileFilter: Send + Sync + Debug {
    /// `op_stats` is the summary document of the finished operation.
    fn matches(&self, op_stats: &serde_json::Value) -> bool;

    /// Representation of the filter expression for reporting.
    fn serialize(&self) -> serde_json::Value;
}

/// Validated profiling level: 0 = off, 1 = slow operations, 2 = all.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ProfileLevel(i32);

impl ProfileLevel {
    /// Levels describe a state, not a request to change one; requests use
    /// sentinel values (such as -1 for "leave unchanged") that are invalid
    /// here.
    pub fn new(level: i32) -> Result<Self> {
        if (0..=2).contains(&level) {
            Ok(Self(level))
        } else {
            Err(CatalogError::InvalidProfileLevel(level))
        }
    }

    pub fn get(&self) -> i32 {
        self.0
    }
}

/// Profiling state of one database.
#[derive(Debug, Clone, Default)]
pub struct ProfileSettings {
    pub level: ProfileLevel,
    pub filter: Option<Arc<dyn ProfileFilter>>,
}

impl ProfileSettings {
    pub fn new(level: ProfileLevel, filter: Option<Arc<dyn ProfileFilter>>) -> Self {
        Self { level, filter }
    }
}

impl PartialEq for ProfileSettings {
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level
            && match (&self.filter, &other.filter) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
    }
}

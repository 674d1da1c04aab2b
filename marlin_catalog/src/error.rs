use anyhow::anyhow;
use marlin_id::{CollectionUuid, Timestamp};

use crate::names::NamespaceString;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unable to resolve {0}")]
    NamespaceNotFound(String),

    #[error("namespace {0} already exists")]
    NamespaceExists(NamespaceString),

    #[error("collection {0} not found")]
    CollectionNotFound(CollectionUuid),

    #[error(
        "namespace {nss} was registered by a concurrent operation; \
        retry after the snapshot advances"
    )]
    WriteConflict { nss: NamespaceString },

    #[error("catalog content at timestamp {ts} predates the maintained window")]
    UnknownAtTimestamp { ts: Timestamp },

    #[error("invalid profiling level: {0}")]
    InvalidProfileLevel(i32),

    #[error("operation has no open storage snapshot")]
    NoStorageSnapshot,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CatalogError {
    pub fn namespace_not_found(what: impl ToString) -> Self {
        Self::NamespaceNotFound(what.to_string())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Other(anyhow!(message.into()))
    }
}

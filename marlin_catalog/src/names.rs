//! Naming types for databases and collections.
//!
//! A [`NamespaceString`] is the human-readable identity of a collection:
//! a database name plus a collection name, rendered as `db.coll`. Database
//! names optionally carry a tenant tag for serverless deployments; two
//! databases with the same name under different tenants are distinct.

use std::fmt;
use std::sync::Arc;

use marlin_id::CollectionUuid;
use serde::{Deserialize, Serialize};

/// Tag identifying the tenant a database belongs to.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TenantId(Arc<str>);

impl TenantId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a database, with an optional tenant tag.
///
/// Ordering sorts untagged databases first, then by tenant, then by name,
/// which gives the deterministic per-database iteration order the ordered
/// collection map relies on.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct DatabaseName {
    tenant: Option<TenantId>,
    name: Arc<str>,
}

impl DatabaseName {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            tenant: None,
            name: name.into(),
        }
    }

    pub fn new_for_tenant(tenant: TenantId, name: impl Into<Arc<str>>) -> Self {
        Self {
            tenant: Some(tenant),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    /// Databases the server owns; their collections never count as user
    /// collections in catalog statistics.
    pub fn is_internal(&self) -> bool {
        matches!(self.name.as_ref(), "admin" | "local" | "config")
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tenant {
            Some(tenant) => write!(f, "{}_{}", tenant, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// `(database, collection)` pair identifying a collection or view by name.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NamespaceString {
    db: DatabaseName,
    coll: Arc<str>,
}

impl NamespaceString {
    pub fn new(db: DatabaseName, coll: impl Into<Arc<str>>) -> Self {
        Self {
            db,
            coll: coll.into(),
        }
    }

    /// Parse a `db.coll` string without a tenant tag. Everything up to the
    /// first dot is the database name.
    pub fn parse(ns: &str) -> Option<Self> {
        let (db, coll) = ns.split_once('.')?;
        (!db.is_empty() && !coll.is_empty())
            .then(|| Self::new(DatabaseName::new(db), coll))
    }

    pub fn db(&self) -> &DatabaseName {
        &self.db
    }

    pub fn coll(&self) -> &str {
        &self.coll
    }

    /// The namespace holding durable view definitions for this database.
    pub fn system_views(db: &DatabaseName) -> Self {
        Self::new(db.clone(), "system.views")
    }

    /// System namespaces are owned by the server and excluded from user
    /// collection statistics.
    pub fn is_system(&self) -> bool {
        self.coll.starts_with("system.")
    }
}

impl fmt::Display for NamespaceString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// Caller-supplied disjunction: address a collection either by name or by
/// its stable identity.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum NamespaceStringOrUuid {
    Namespace(NamespaceString),
    /// UUID plus the database the caller expects it to live in. Resolution
    /// fails if the UUID maps into a different database.
    Uuid(DatabaseName, CollectionUuid),
}

impl NamespaceStringOrUuid {
    pub fn db(&self) -> &DatabaseName {
        match self {
            Self::Namespace(nss) => nss.db(),
            Self::Uuid(db, _) => db,
        }
    }

    pub fn nss(&self) -> Option<&NamespaceString> {
        match self {
            Self::Namespace(nss) => Some(nss),
            Self::Uuid(..) => None,
        }
    }

    pub fn uuid(&self) -> Option<CollectionUuid> {
        match self {
            Self::Namespace(_) => None,
            Self::Uuid(_, uuid) => Some(*uuid),
        }
    }
}

impl From<NamespaceString> for NamespaceStringOrUuid {
    fn from(nss: NamespaceString) -> Self {
        Self::Namespace(nss)
    }
}

impl fmt::Display for NamespaceStringOrUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace(nss) => write!(f, "{nss}"),
            Self::Uuid(db, uuid) => write!(f, "{db}:{uuid}"),
        }
    }
}

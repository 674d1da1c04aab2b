//! Per-database view state.
//!
//! Views are name-level aliases over collections (or other views) with an
//! attached aggregation pipeline. The durable source of truth is the
//! database's `system.views` collection; the catalog keeps a value-typed
//! [`ViewsForDatabase`] per database that is reloaded wholesale from
//! storage, never patched in place: writers mutate a copy and swap it into
//! the next catalog version.

use std::sync::Arc;

use observability_deps::tracing::warn;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::names::{DatabaseName, NamespaceString};
use crate::Result;

/// A view definition as stored in `system.views`, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawViewDefinition {
    /// Fully qualified view namespace, e.g. `"app.big_orders"`.
    pub name: String,
    /// Collection or view the pipeline reads from, without the database
    /// prefix.
    pub view_on: String,
    /// Aggregation pipeline; must be a JSON array of stage documents.
    pub pipeline: serde_json::Value,
    pub collation: Option<serde_json::Value>,
}

/// A validated, immutable view definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDefinition {
    nss: NamespaceString,
    view_on: NamespaceString,
    pipeline: serde_json::Value,
    collation: Option<serde_json::Value>,
}

impl ViewDefinition {
    pub fn new(
        nss: NamespaceString,
        view_on: NamespaceString,
        pipeline: serde_json::Value,
        collation: Option<serde_json::Value>,
    ) -> Result<Self> {
        if nss.db() != view_on.db() {
            return Err(CatalogError::unexpected(format!(
                "view {nss} must read from its own database, not {}",
                view_on.db()
            )));
        }
        if !pipeline.is_array() {
            return Err(CatalogError::unexpected(format!(
                "view {nss} pipeline must be an array of stages"
            )));
        }
        Ok(Self {
            nss,
            view_on,
            pipeline,
            collation,
        })
    }

    fn from_raw(db: &DatabaseName, raw: &RawViewDefinition) -> Result<Self> {
        let nss = NamespaceString::parse(&raw.name)
            .filter(|nss| nss.db().name() == db.name())
            .ok_or_else(|| {
                CatalogError::unexpected(format!(
                    "invalid view name {:?} in {db}.system.views",
                    raw.name
                ))
            })?;
        let nss = NamespaceString::new(db.clone(), nss.coll());
        let view_on = NamespaceString::new(db.clone(), raw.view_on.as_str());
        Self::new(nss, view_on, raw.pipeline.clone(), raw.collation.clone())
    }

    pub fn name(&self) -> &NamespaceString {
        &self.nss
    }

    pub fn view_on(&self) -> &NamespaceString {
        &self.view_on
    }

    pub fn pipeline(&self) -> &serde_json::Value {
        &self.pipeline
    }

    pub fn collation(&self) -> Option<&serde_json::Value> {
        self.collation.as_ref()
    }
}

/// Whether a view mutation still needs to be written to `system.views`, or
/// is already reflected there (e.g. during startup reload).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ViewDurability {
    NotYetDurable,
    AlreadyDurable,
}

/// Counts of view kinds in one database.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ViewStats {
    pub user_views: usize,
    pub internal: usize,
}

/// All views of a single database. Value-typed: cloned with the catalog
/// version that carries it and replaced wholesale on mutation or reload.
#[derive(Debug, Clone)]
pub struct ViewsForDatabase {
    views: imbl::HashMap<NamespaceString, Arc<ViewDefinition>>,
    /// Cleared when a reload hits an invalid durable definition; lookups on
    /// an invalid instance keep working with whatever loaded successfully.
    valid: bool,
    stats: ViewStats,
}

impl Default for ViewsForDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewsForDatabase {
    pub fn new() -> Self {
        Self {
            views: imbl::HashMap::new(),
            valid: true,
            stats: ViewStats::default(),
        }
    }

    /// Rebuild the map from the raw contents of `system.views`. Stops at the
    /// first invalid entry, logging and returning the error; the views read
    /// before it remain available but the instance is marked invalid.
    pub fn reload(db: &DatabaseName, raw: &[RawViewDefinition]) -> (Self, Result<()>) {
        let mut out = Self::new();
        for raw_view in raw {
            match ViewDefinition::from_raw(db, raw_view) {
                Ok(view) => {
                    out.insert(Arc::new(view));
                }
                Err(e) => {
                    warn!(db = %db, view = %raw_view.name, error = %e,
                        "invalid durable view definition");
                    out.valid = false;
                    return (out, Err(e));
                }
            }
        }
        (out, Ok(()))
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn lookup(&self, nss: &NamespaceString) -> Option<&Arc<ViewDefinition>> {
        self.views.get(nss)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ViewDefinition>> {
        self.views.values()
    }

    pub fn insert(&mut self, view: Arc<ViewDefinition>) {
        if view.name().is_system() {
            self.stats.internal += 1;
        } else {
            self.stats.user_views += 1;
        }
        self.views.insert(view.name().clone(), view);
    }

    pub fn remove(&mut self, nss: &NamespaceString) -> Option<Arc<ViewDefinition>> {
        let removed = self.views.remove(nss);
        if let Some(view) = &removed {
            if view.name().is_system() {
                self.stats.internal -= 1;
            } else {
                self.stats.user_views -= 1;
            }
        }
        removed
    }

    pub fn stats(&self) -> ViewStats {
        self.stats
    }
}

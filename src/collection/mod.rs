//! Collection pipeline
//!
//! Turns the catalog into the ordered, filtered execution plan. The default
//! order is applied first so that `ModifyItems` callbacks can override it.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};
use crate::hooks::{Extensions, HookRegistry, ModifyItems, ModifyItemsContext, SessionInfo};
use crate::models::{Marker, MarkerKind, TestItem};

use crate::catalog::TestCatalog;

/// One entry of the execution plan
#[derive(Clone, Debug)]
pub struct CollectedItem {
    item: Arc<TestItem>,
    skip_reason: Option<String>,
    added_markers: Vec<Marker>,
}

impl CollectedItem {
    pub fn new(item: Arc<TestItem>) -> Self {
        Self {
            item,
            skip_reason: None,
            added_markers: Vec::new(),
        }
    }

    pub fn item(&self) -> &Arc<TestItem> {
        &self.item
    }

    pub fn id(&self) -> &str {
        self.item.id()
    }

    pub fn included(&self) -> bool {
        self.skip_reason.is_none()
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    /// Exclude the item; the first recorded reason is kept
    pub fn skip(&mut self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "skip of {} requires a reason",
                self.item.id()
            )));
        }
        if self.skip_reason.is_none() {
            debug!("Skipping {}: {}", self.item.id(), reason);
            self.skip_reason = Some(reason);
        }
        Ok(())
    }

    /// Attach a marker for the rest of the run without touching the item
    pub fn add_marker(&mut self, marker: Marker) {
        self.added_markers.push(marker);
    }

    /// Markers added during collection
    pub fn added_markers(&self) -> &[Marker] {
        &self.added_markers
    }

    /// Whether the item or the collection carries the named marker
    pub fn has_marker(&self, name: &str) -> bool {
        self.added_markers.iter().any(|m| m.name() == name) || self.item.has_marker(name)
    }

    /// Closest marker, preferring markers added during collection
    pub fn closest_marker(&self, name: &str) -> Option<&Marker> {
        self.added_markers
            .iter()
            .rev()
            .find(|m| m.name() == name)
            .or_else(|| self.item.closest_marker(name))
    }
}

/// Rank of an item under the default ordering: unit < contract <
/// integration < e2e < unmarked
pub fn order_rank(item: &TestItem) -> u8 {
    item.markers()
        .iter()
        .filter_map(|scoped| scoped.marker.kind.order_rank())
        .min()
        .unwrap_or(u8::MAX)
}

/// Builds the execution plan
#[derive(Clone, Copy, Debug, Default)]
pub struct CollectionPipeline;

impl CollectionPipeline {
    pub fn new() -> Self {
        Self
    }

    /// Produce the ordered plan for `catalog`.
    ///
    /// Plugin data in `extensions` is lent to the `ModifyItems` callbacks
    /// and handed back afterwards, even when a callback fails.
    pub fn collect(
        &self,
        catalog: &TestCatalog,
        registry: &HookRegistry,
        session: &SessionInfo,
        extensions: &mut Extensions,
    ) -> Result<Vec<CollectedItem>> {
        let mut items: Vec<CollectedItem> = catalog
            .all()
            .iter()
            .cloned()
            .map(CollectedItem::new)
            .collect();

        for entry in &mut items {
            let reason = entry
                .item
                .closest_marker(MarkerKind::Skip.name())
                .map(|m| m.reason().unwrap_or("unconditional skip").to_string());
            if let Some(reason) = reason {
                entry.skip(reason)?;
            }
        }

        // Stable: ties keep discovery order
        items.sort_by_key(|entry| order_rank(&entry.item));

        let mut ctx = ModifyItemsContext {
            session: session.clone(),
            items,
            extensions: std::mem::take(extensions),
        };
        let result = registry.invoke::<ModifyItems>(&mut ctx);
        *extensions = ctx.extensions;
        result?;

        let items = ctx.items;
        let excluded = items.iter().filter(|e| !e.included()).count();
        info!(
            "Collected {} items ({} included, {} excluded)",
            items.len(),
            items.len() - excluded,
            excluded
        );
        Ok(items)
    }
}

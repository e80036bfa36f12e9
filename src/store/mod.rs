//! Boundary over the local transactional record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{HouseholdId, InventoryItem, ItemId, NewItem, RecordId};
use crate::AppResult;

mod sqlite;

pub use sqlite::SqliteItemStore;

/// Row selection; every `None`/`false` field leaves that dimension unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub household: Option<HouseholdId>,
    /// Rows written before household tagging existed.
    pub untagged_only: bool,
    pub in_stock: Option<bool>,
    pub location: Option<String>,
    /// Case-insensitive substring match on the name.
    pub name_contains: Option<String>,
    /// Printed expiration date strictly before this instant.
    pub expires_before: Option<DateTime<Utc>>,
    pub has_share_reference: Option<bool>,
}

impl ItemFilter {
    pub fn household(id: HouseholdId) -> Self {
        Self {
            household: Some(id),
            ..Self::default()
        }
    }

    pub fn untagged() -> Self {
        Self {
            untagged_only: true,
            ..Self::default()
        }
    }

    pub fn in_stock(mut self, in_stock: bool) -> Self {
        self.in_stock = Some(in_stock);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemSort {
    #[default]
    Name,
    /// Soonest first; undated items last.
    ExpirationDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemChange {
    Inserted { id: ItemId },
    Updated { id: ItemId },
    Deleted { id: ItemId },
    Retagged { household: HouseholdId, count: u64 },
    ShareReferencesCleared { count: u64 },
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn fetch(&self, filter: &ItemFilter, sort: ItemSort) -> AppResult<Vec<InventoryItem>>;

    async fn get(&self, id: ItemId) -> AppResult<Option<InventoryItem>>;

    /// Persists a new item. The store assigns its id, stamps it and tags it
    /// with the current household.
    async fn insert(&self, item: NewItem) -> AppResult<InventoryItem>;

    /// Writes every mutable field of `item` and returns the stored row with its
    /// fresh `last_modified`. An assigned household tag is never cleared.
    async fn update(&self, item: &InventoryItem) -> AppResult<InventoryItem>;

    async fn delete(&self, id: ItemId) -> AppResult<bool>;

    /// All-or-nothing delete.
    async fn delete_many(&self, ids: &[ItemId]) -> AppResult<u64>;

    async fn count(&self, filter: &ItemFilter) -> AppResult<u64>;

    /// Tags every untagged row with `household`; tagged rows are left alone.
    async fn tag_untagged(&self, household: HouseholdId) -> AppResult<u64>;

    /// Writes only the share back-reference, so a concurrent edit to any other
    /// field survives. Fails with not-found when the row is gone.
    async fn set_share_reference(
        &self,
        id: ItemId,
        share: Option<&RecordId>,
    ) -> AppResult<InventoryItem>;

    async fn clear_share_references(&self) -> AppResult<u64>;

    fn subscribe(&self) -> broadcast::Receiver<ItemChange>;
}

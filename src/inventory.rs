//! Item operations as the app uses them. Every mutation goes to the store
//! first and then brings the item's reminders in line.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::lifecycle::{self, Lifecycle};
use crate::model::{InventoryItem, ItemId, ItemPatch, NewItem};
use crate::notify::{NotificationScheduler, ReconcileReport};
use crate::store::{ItemFilter, ItemSort, ItemStore};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryCounts {
    pub in_stock: u64,
    pub shopping_list: u64,
    pub expiring_soon: u64,
}

pub struct InventoryService {
    store: Arc<dyn ItemStore>,
    notifications: Arc<NotificationScheduler>,
    summary_window_days: i64,
}

impl InventoryService {
    pub fn new(
        store: Arc<dyn ItemStore>,
        notifications: Arc<NotificationScheduler>,
        summary_window_days: i64,
    ) -> Self {
        Self {
            store,
            notifications,
            summary_window_days,
        }
    }

    pub fn evaluate(&self, item: &InventoryItem, now: DateTime<Utc>) -> Lifecycle {
        lifecycle::evaluate(item, now, self.notifications.calendar())
    }

    pub async fn all(&self) -> AppResult<Vec<InventoryItem>> {
        self.store.fetch(&ItemFilter::default(), ItemSort::Name).await
    }

    pub async fn stock(&self) -> AppResult<Vec<InventoryItem>> {
        self.store
            .fetch(&ItemFilter::default().in_stock(true), ItemSort::ExpirationDate)
            .await
    }

    pub async fn shopping_list(&self) -> AppResult<Vec<InventoryItem>> {
        self.store
            .fetch(&ItemFilter::default().in_stock(false), ItemSort::Name)
            .await
    }

    pub async fn by_location(&self, location: &str) -> AppResult<Vec<InventoryItem>> {
        let filter = ItemFilter {
            location: Some(location.to_string()),
            ..ItemFilter::default().in_stock(true)
        };
        self.store.fetch(&filter, ItemSort::ExpirationDate).await
    }

    /// Empty queries return everything.
    pub async fn search(&self, query: &str) -> AppResult<Vec<InventoryItem>> {
        let filter = ItemFilter {
            name_contains: Some(query.to_string()).filter(|q| !q.trim().is_empty()),
            ..ItemFilter::default()
        };
        self.store.fetch(&filter, ItemSort::Name).await
    }

    /// In-stock items whose effective expiry falls within `days`, soonest first.
    pub async fn expiring_within(
        &self,
        days: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<InventoryItem>> {
        let cal = self.notifications.calendar();
        let mut items: Vec<InventoryItem> = self
            .stock()
            .await?
            .into_iter()
            .filter(|item| lifecycle::expires_within(item, days, now, cal))
            .collect();
        items.sort_by_key(|item| lifecycle::effective_expiration(item, cal));
        Ok(items)
    }

    pub async fn counts(&self, now: DateTime<Utc>) -> AppResult<InventoryCounts> {
        Ok(InventoryCounts {
            in_stock: self.store.count(&ItemFilter::default().in_stock(true)).await?,
            shopping_list: self.store.count(&ItemFilter::default().in_stock(false)).await?,
            expiring_soon: self.expiring_within(self.summary_window_days, now).await?.len() as u64,
        })
    }

    async fn require(&self, id: ItemId) -> AppResult<InventoryItem> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found("item", id))
    }

    fn after_write(&self, item: &InventoryItem, now: DateTime<Utc>) -> ReconcileReport {
        if item.in_stock {
            self.notifications.reconcile(item, now)
        } else {
            self.notifications.cancel_for(item.id);
            ReconcileReport::default()
        }
    }

    pub async fn create(&self, item: NewItem, now: DateTime<Utc>) -> AppResult<InventoryItem> {
        let stored = self.store.insert(item).await?;
        self.after_write(&stored, now);
        info!(target: "spichr", event = "item_created", id = %stored.id, in_stock = stored.in_stock);
        Ok(stored)
    }

    pub async fn update(
        &self,
        id: ItemId,
        patch: ItemPatch,
        now: DateTime<Utc>,
    ) -> AppResult<InventoryItem> {
        let mut item = self.require(id).await?;
        patch.apply(&mut item);
        let stored = self.store.update(&item).await?;
        self.after_write(&stored, now);
        Ok(stored)
    }

    pub async fn toggle_stock(&self, id: ItemId, now: DateTime<Utc>) -> AppResult<InventoryItem> {
        let mut item = self.require(id).await?;
        item.in_stock = !item.in_stock;
        let stored = self.store.update(&item).await?;
        self.after_write(&stored, now);
        Ok(stored)
    }

    /// Opens the item now. A zero shelf life keeps the one already recorded.
    pub async fn mark_opened(
        &self,
        id: ItemId,
        shelf_life_days: u32,
        now: DateTime<Utc>,
    ) -> AppResult<InventoryItem> {
        let mut item = self.require(id).await?;
        item.opened_date = Some(now);
        if shelf_life_days > 0 {
            item.shelf_life_after_opening_days = shelf_life_days;
        }
        let stored = self.store.update(&item).await?;
        self.after_write(&stored, now);
        Ok(stored)
    }

    /// Reminders are cancelled only once the row is gone; a rejected delete
    /// leaves the item and its reminders as they were.
    pub async fn delete(&self, id: ItemId) -> AppResult<bool> {
        let removed = self.store.delete(id).await?;
        self.notifications.cancel_for(id);
        Ok(removed)
    }

    pub async fn delete_many(&self, ids: &[ItemId]) -> AppResult<u64> {
        let removed = self.store.delete_many(ids).await?;
        for id in ids {
            self.notifications.cancel_for(*id);
        }
        Ok(removed)
    }

    /// Removes items whose printed date has passed.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let filter = ItemFilter {
            expires_before: Some(now),
            ..ItemFilter::default()
        };
        let expired: Vec<ItemId> = self
            .store
            .fetch(&filter, ItemSort::ExpirationDate)
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();
        let removed = self.delete_many(&expired).await?;
        info!(target: "spichr", event = "items_expired_purged", count = removed);
        Ok(removed)
    }

    /// Rebuilds every reminder, the daily summary and the badge.
    pub async fn reschedule_all(&self, now: DateTime<Utc>) -> AppResult<ReconcileReport> {
        let stock = self.stock().await?;
        let cal = self.notifications.calendar();
        let expiring = stock
            .iter()
            .filter(|item| lifecycle::expires_within(item, self.summary_window_days, now, cal))
            .count() as u64;
        let report = self.notifications.reschedule_all(&stock, expiring, now);
        self.notifications.update_badge(expiring);
        Ok(report)
    }

    pub async fn refresh_badge(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let expiring = self.expiring_within(self.summary_window_days, now).await?.len() as u64;
        self.notifications.update_badge(expiring);
        Ok(expiring)
    }
}

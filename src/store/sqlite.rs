use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{ItemChange, ItemFilter, ItemSort, ItemStore};
use crate::db::run_in_tx;
use crate::household::HouseholdIdentity;
use crate::model::{HouseholdId, InventoryItem, ItemId, NewItem, RecordId};
use crate::time::{now_ms, to_date};
use crate::{AppError, AppResult};

const ITEM_COLUMNS: &str = "id, name, quantity, location, store, barcode, expiration_date, \
     opened_date, shelf_life_after_opening_days, in_stock, household_id, last_modified, \
     share_reference";

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Local store adapter over the `food_items` table.
pub struct SqliteItemStore {
    pool: SqlitePool,
    identity: Arc<HouseholdIdentity>,
    clock: AtomicI64,
    changes: broadcast::Sender<ItemChange>,
}

impl SqliteItemStore {
    /// Expects a migrated pool.
    pub fn new(pool: SqlitePool, identity: Arc<HouseholdIdentity>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            pool,
            identity,
            clock: AtomicI64::new(0),
            changes,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Millisecond stamp greater than every stamp this store handed out before,
    /// even when the wall clock stalls or steps back.
    fn next_stamp(&self) -> i64 {
        let now = now_ms();
        let mut last = self.clock.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self
                .clock
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }

    fn publish(&self, change: ItemChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

fn corrupt(column: &str, value: &str) -> AppError {
    AppError::new("STORE/CORRUPT_ROW", "Stored item could not be decoded")
        .with_context("column", column)
        .with_context("value", value)
}

fn row_to_item(row: &SqliteRow) -> AppResult<InventoryItem> {
    let id: String = row.try_get("id")?;
    let household: Option<String> = row.try_get("household_id")?;
    let household_id = match household.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<HouseholdId>()
                .map_err(|_| corrupt("household_id", raw))?,
        ),
    };
    let shelf_life: i64 = row.try_get("shelf_life_after_opening_days")?;
    let expiration: Option<i64> = row.try_get("expiration_date")?;
    let opened: Option<i64> = row.try_get("opened_date")?;
    let in_stock: i64 = row.try_get("in_stock")?;
    let share_reference: Option<String> = row.try_get("share_reference")?;

    Ok(InventoryItem {
        id: id.parse().map_err(|_| corrupt("id", &id))?,
        name: row.try_get("name")?,
        quantity: row.try_get("quantity")?,
        location: row.try_get("location")?,
        store: row.try_get("store")?,
        barcode: row.try_get("barcode")?,
        expiration_date: expiration.map(to_date),
        opened_date: opened.map(to_date),
        shelf_life_after_opening_days: u32::try_from(shelf_life)
            .map_err(|_| corrupt("shelf_life_after_opening_days", &shelf_life.to_string()))?,
        in_stock: in_stock != 0,
        household_id,
        last_modified: row.try_get("last_modified")?,
        share_reference: share_reference
            .filter(|s| !s.is_empty())
            .map(RecordId::new),
    })
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('%');
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ItemFilter) {
    qb.push(" WHERE 1=1");
    if let Some(household) = filter.household {
        qb.push(" AND household_id = ").push_bind(household.to_string());
    }
    if filter.untagged_only {
        qb.push(" AND (household_id IS NULL OR household_id = '')");
    }
    if let Some(in_stock) = filter.in_stock {
        qb.push(" AND in_stock = ").push_bind(i64::from(in_stock));
    }
    if let Some(location) = &filter.location {
        qb.push(" AND location = ").push_bind(location.clone());
    }
    if let Some(needle) = filter.name_contains.as_deref().map(str::trim) {
        if !needle.is_empty() {
            qb.push(" AND name LIKE ")
                .push_bind(escape_like(needle))
                .push(" ESCAPE '\\'");
        }
    }
    if let Some(before) = filter.expires_before {
        qb.push(" AND expiration_date IS NOT NULL AND expiration_date < ")
            .push_bind(before.timestamp_millis());
    }
    match filter.has_share_reference {
        Some(true) => {
            qb.push(" AND share_reference IS NOT NULL AND share_reference <> ''");
        }
        Some(false) => {
            qb.push(" AND (share_reference IS NULL OR share_reference = '')");
        }
        None => {}
    }
}

fn ensure_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::new("STORE/INVALID_ITEM", "Item name must not be empty"));
    }
    Ok(())
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    async fn fetch(&self, filter: &ItemFilter, sort: ItemSort) -> AppResult<Vec<InventoryItem>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {ITEM_COLUMNS} FROM food_items"));
        push_filter(&mut qb, filter);
        qb.push(match sort {
            ItemSort::Name => " ORDER BY name COLLATE NOCASE, id",
            ItemSort::ExpirationDate => {
                " ORDER BY expiration_date IS NULL, expiration_date, name COLLATE NOCASE, id"
            }
        });
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn get(&self, id: ItemId) -> AppResult<Option<InventoryItem>> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM food_items WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn insert(&self, item: NewItem) -> AppResult<InventoryItem> {
        ensure_name(&item.name)?;
        let household = self.identity.current()?;
        let stored = InventoryItem {
            id: ItemId::new(),
            name: item.name,
            quantity: item.quantity,
            location: item.location,
            store: item.store,
            barcode: item.barcode,
            expiration_date: item.expiration_date,
            opened_date: item.opened_date,
            shelf_life_after_opening_days: item.shelf_life_after_opening_days,
            in_stock: item.in_stock,
            household_id: Some(household),
            last_modified: self.next_stamp(),
            share_reference: None,
        };

        sqlx::query(&format!(
            "INSERT INTO food_items ({ITEM_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(stored.id.to_string())
        .bind(&stored.name)
        .bind(&stored.quantity)
        .bind(&stored.location)
        .bind(&stored.store)
        .bind(&stored.barcode)
        .bind(stored.expiration_date.map(|d| d.timestamp_millis()))
        .bind(stored.opened_date.map(|d| d.timestamp_millis()))
        .bind(i64::from(stored.shelf_life_after_opening_days))
        .bind(i64::from(stored.in_stock))
        .bind(household.to_string())
        .bind(stored.last_modified)
        .bind(Option::<String>::None)
        .execute(&self.pool)
        .await?;

        debug!(target: "spichr", event = "item_inserted", id = %stored.id, household_id = %household);
        self.publish(ItemChange::Inserted { id: stored.id });
        Ok(stored)
    }

    async fn update(&self, item: &InventoryItem) -> AppResult<InventoryItem> {
        ensure_name(&item.name)?;
        let stamp = self.next_stamp();
        let item = item.clone();
        let id = item.id;

        let updated = run_in_tx(&self.pool, move |tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    "UPDATE food_items SET name = ?, quantity = ?, location = ?, store = ?, \
                     barcode = ?, expiration_date = ?, opened_date = ?, \
                     shelf_life_after_opening_days = ?, in_stock = ?, \
                     household_id = COALESCE(NULLIF(household_id, ''), ?), \
                     share_reference = ?, last_modified = MAX(last_modified + 1, ?) \
                     WHERE id = ?",
                )
                .bind(&item.name)
                .bind(&item.quantity)
                .bind(&item.location)
                .bind(&item.store)
                .bind(&item.barcode)
                .bind(item.expiration_date.map(|d| d.timestamp_millis()))
                .bind(item.opened_date.map(|d| d.timestamp_millis()))
                .bind(i64::from(item.shelf_life_after_opening_days))
                .bind(i64::from(item.in_stock))
                .bind(item.household_id.map(|h| h.to_string()))
                .bind(item.share_reference.as_ref().map(|r| r.as_str().to_string()))
                .bind(stamp)
                .bind(item.id.to_string())
                .execute(&mut **tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(AppError::not_found("item", item.id));
                }
                let row = sqlx::query(&format!(
                    "SELECT {ITEM_COLUMNS} FROM food_items WHERE id = ?"
                ))
                .bind(item.id.to_string())
                .fetch_one(&mut **tx)
                .await?;
                row_to_item(&row)
            })
        })
        .await?;

        self.publish(ItemChange::Updated { id });
        Ok(updated)
    }

    async fn delete(&self, id: ItemId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM food_items WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            self.publish(ItemChange::Deleted { id });
        }
        Ok(removed)
    }

    async fn delete_many(&self, ids: &[ItemId]) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = ids.iter().map(ItemId::to_string).collect();
        let deleted = run_in_tx(&self.pool, move |tx| {
            Box::pin(async move {
                let mut removed = Vec::new();
                for key in keys {
                    let result = sqlx::query("DELETE FROM food_items WHERE id = ?")
                        .bind(&key)
                        .execute(&mut **tx)
                        .await?;
                    if result.rows_affected() > 0 {
                        removed.push(key);
                    }
                }
                Ok::<_, AppError>(removed)
            })
        })
        .await?;

        for key in &deleted {
            if let Ok(id) = key.parse() {
                self.publish(ItemChange::Deleted { id });
            }
        }
        Ok(deleted.len() as u64)
    }

    async fn count(&self, filter: &ItemFilter) -> AppResult<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM food_items");
        push_filter(&mut qb, filter);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn tag_untagged(&self, household: HouseholdId) -> AppResult<u64> {
        let stamp = self.next_stamp();
        let result = sqlx::query(
            "UPDATE food_items SET household_id = ?, last_modified = MAX(last_modified + 1, ?) \
             WHERE household_id IS NULL OR household_id = ''",
        )
        .bind(household.to_string())
        .bind(stamp)
        .execute(&self.pool)
        .await?;
        let count = result.rows_affected();
        if count > 0 {
            info!(target: "spichr", event = "items_retagged", household_id = %household, count);
            self.publish(ItemChange::Retagged { household, count });
        }
        Ok(count)
    }

    async fn set_share_reference(
        &self,
        id: ItemId,
        share: Option<&RecordId>,
    ) -> AppResult<InventoryItem> {
        let stamp = self.next_stamp();
        let reference = share.map(|r| r.as_str().to_string());

        let updated = run_in_tx(&self.pool, move |tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    "UPDATE food_items SET share_reference = ?, \
                     last_modified = MAX(last_modified + 1, ?) WHERE id = ?",
                )
                .bind(reference)
                .bind(stamp)
                .bind(id.to_string())
                .execute(&mut **tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(AppError::not_found("item", id));
                }
                let row = sqlx::query(&format!(
                    "SELECT {ITEM_COLUMNS} FROM food_items WHERE id = ?"
                ))
                .bind(id.to_string())
                .fetch_one(&mut **tx)
                .await?;
                row_to_item(&row)
            })
        })
        .await?;

        debug!(target: "spichr", event = "share_reference_set", id = %id, shared = share.is_some());
        self.publish(ItemChange::Updated { id });
        Ok(updated)
    }

    async fn clear_share_references(&self) -> AppResult<u64> {
        let stamp = self.next_stamp();
        let result = sqlx::query(
            "UPDATE food_items SET share_reference = NULL, \
             last_modified = MAX(last_modified + 1, ?) \
             WHERE share_reference IS NOT NULL",
        )
        .bind(stamp)
        .execute(&self.pool)
        .await?;
        let count = result.rows_affected();
        if count > 0 {
            self.publish(ItemChange::ShareReferencesCleared { count });
        }
        Ok(count)
    }

    fn subscribe(&self) -> broadcast::Receiver<ItemChange> {
        self.changes.subscribe()
    }
}

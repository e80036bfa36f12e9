#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use spichr_lib::config::AppConfig;
use spichr_lib::model::{InventoryItem, ItemId};
use spichr_lib::notify::RecordingHost;
use spichr_lib::remote::InMemoryRemote;
use spichr_lib::AppContext;

pub struct Harness {
    pub ctx: AppContext,
    pub remote: Arc<InMemoryRemote>,
    pub host: Arc<RecordingHost>,
}

pub fn utc_config() -> AppConfig {
    AppConfig {
        timezone: Some("UTC".into()),
        ..AppConfig::default()
    }
}

pub async fn harness() -> Harness {
    harness_with(InMemoryRemote::new()).await
}

pub async fn harness_with(remote: InMemoryRemote) -> Harness {
    let remote = Arc::new(remote);
    let host = Arc::new(RecordingHost::new());
    let ctx = AppContext::in_memory(utc_config(), remote.clone(), host.clone())
        .await
        .expect("in-memory context");
    Harness { ctx, remote, host }
}

pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap()
}

pub fn bare_item(name: &str) -> InventoryItem {
    InventoryItem {
        id: ItemId::new(),
        name: name.into(),
        quantity: None,
        location: None,
        store: None,
        barcode: None,
        expiration_date: None,
        opened_date: None,
        shelf_life_after_opening_days: 0,
        in_stock: true,
        household_id: None,
        last_modified: 0,
        share_reference: None,
    }
}

//! Expiry reminders derived from lifecycle state.
//!
//! Trigger identifiers are a pure function of `(item, kind)`, so reconciling an
//! item is always "cancel the five ids, then schedule what the plan says".
//! Running it twice leaves exactly the same pending set.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{NotificationSettings, TimeOfDay};
use crate::lifecycle::effective_expiration;
use crate::model::{InventoryItem, ItemId};
use crate::time::LocalCalendar;

pub const DAILY_SUMMARY_ID: &str = "daily-summary";

pub const CATEGORY_EXPIRING: &str = "FOOD_ITEM_EXPIRING";
pub const CATEGORY_OPENED: &str = "OPENED_ITEM";
pub const CATEGORY_SUMMARY: &str = "DAILY_SUMMARY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    ThirtyDays,
    SevenDays,
    OneDay,
    DueToday,
    OpenedExpiry,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 5] = [
        TriggerKind::ThirtyDays,
        TriggerKind::SevenDays,
        TriggerKind::OneDay,
        TriggerKind::DueToday,
        TriggerKind::OpenedExpiry,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            TriggerKind::ThirtyDays => "30days",
            TriggerKind::SevenDays => "7days",
            TriggerKind::OneDay => "1day",
            TriggerKind::DueToday => "today",
            TriggerKind::OpenedExpiry => "opened",
        }
    }

    fn enabled(self, settings: &NotificationSettings) -> bool {
        match self {
            TriggerKind::ThirtyDays => settings.expiring_in_30_days_enabled,
            TriggerKind::SevenDays => settings.expiring_in_7_days_enabled,
            TriggerKind::OneDay => settings.expiring_in_1_day_enabled,
            TriggerKind::DueToday => settings.expiring_today_enabled,
            TriggerKind::OpenedExpiry => settings.opened_items_enabled,
        }
    }

    fn copy(self, subject: &str) -> (&'static str, String) {
        match self {
            TriggerKind::ThirtyDays => ("Item expiring soon", format!("{subject} expires in 30 days")),
            TriggerKind::SevenDays => ("Item expiring soon", format!("{subject} expires in 7 days")),
            TriggerKind::OneDay => ("Item expiring soon", format!("{subject} expires tomorrow!")),
            TriggerKind::DueToday => ("Item expires today!", format!("{subject} expires today")),
            TriggerKind::OpenedExpiry => (
                "Opened item expiring",
                format!("{subject} was opened and expires soon"),
            ),
        }
    }
}

pub fn trigger_id(item: ItemId, kind: TriggerKind) -> String {
    format!("{item}-{}", kind.suffix())
}

/// Every identifier an item can own.
pub fn trigger_ids(item: ItemId) -> Vec<String> {
    TriggerKind::ALL.iter().map(|kind| trigger_id(item, *kind)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationTrigger {
    pub item_id: ItemId,
    pub kind: TriggerKind,
    pub fire_at: DateTime<Utc>,
    pub identifier: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    At { instant: DateTime<Utc> },
    /// Repeats every day at this local time.
    Daily { time: TimeOfDay },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerRequest {
    pub identifier: String,
    pub title: String,
    pub body: String,
    pub category: &'static str,
    pub item_id: Option<ItemId>,
    pub schedule: Schedule,
}

impl From<&NotificationTrigger> for TriggerRequest {
    fn from(trigger: &NotificationTrigger) -> Self {
        TriggerRequest {
            identifier: trigger.identifier.clone(),
            title: trigger.title.clone(),
            body: trigger.body.clone(),
            category: match trigger.kind {
                TriggerKind::OpenedExpiry => CATEGORY_OPENED,
                _ => CATEGORY_EXPIRING,
            },
            item_id: Some(trigger.item_id),
            schedule: Schedule::At {
                instant: trigger.fire_at,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("notifications are not authorized")]
    NotAuthorized,
    #[error("notification host rejected {identifier}: {reason}")]
    Rejected { identifier: String, reason: String },
}

/// The platform's local notification center.
pub trait NotificationHost: Send + Sync {
    fn is_authorized(&self) -> bool;
    /// Adds or replaces the request with the same identifier.
    fn schedule(&self, request: TriggerRequest) -> Result<(), HostError>;
    fn cancel(&self, identifiers: &[String]);
    fn cancel_all(&self);
    fn set_badge(&self, count: u64);
}

/// Future reminders for one item, in firing order.
pub fn plan_triggers(
    item: &InventoryItem,
    settings: &NotificationSettings,
    now: DateTime<Utc>,
    cal: &LocalCalendar,
) -> Vec<NotificationTrigger> {
    let mut plan = Vec::new();
    if !item.in_stock {
        return plan;
    }
    let subject = item.notification_text();
    let mut push = |kind: TriggerKind, fire_at: Option<DateTime<Utc>>| {
        if let Some(fire_at) = fire_at.filter(|at| *at > now) {
            if kind.enabled(settings) {
                let (title, body) = kind.copy(&subject);
                plan.push(NotificationTrigger {
                    item_id: item.id,
                    kind,
                    fire_at,
                    identifier: trigger_id(item.id, kind),
                    title: title.to_string(),
                    body,
                });
            }
        }
    };

    if let Some(due) = effective_expiration(item, cal).filter(|due| *due > now) {
        push(TriggerKind::ThirtyDays, cal.add_days(due, -30));
        push(TriggerKind::SevenDays, cal.add_days(due, -7));
        push(TriggerKind::OneDay, cal.add_days(due, -1));
        push(
            TriggerKind::DueToday,
            Some(cal.at_local_time(cal.date_of(due), settings.due_today_time.to_naive())),
        );
    }

    if let (Some(opened), days) = (item.opened_date, item.shelf_life_after_opening_days) {
        if days > 0 {
            let fire_at = cal
                .add_days(opened, i64::from(days))
                .and_then(|expiry| cal.add_days(expiry, -1));
            push(TriggerKind::OpenedExpiry, fire_at);
        }
    }

    plan.sort_by_key(|t| t.fire_at);
    plan
}

pub fn daily_summary_body(expiring: u64) -> String {
    if expiring > 0 {
        format!("You have {expiring} items expiring soon")
    } else {
        "All items are fresh!".to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scheduled: Vec<String>,
    pub failed: Vec<String>,
    pub unauthorized: bool,
}

/// Keeps the host's pending set in step with item state. Every write to the
/// host goes through `writer`, so two reconciles of one item never interleave.
pub struct NotificationScheduler {
    host: Arc<dyn NotificationHost>,
    calendar: LocalCalendar,
    settings: RwLock<NotificationSettings>,
    writer: Mutex<()>,
}

impl NotificationScheduler {
    pub fn new(
        host: Arc<dyn NotificationHost>,
        calendar: LocalCalendar,
        settings: NotificationSettings,
    ) -> Self {
        Self {
            host,
            calendar,
            settings: RwLock::new(settings),
            writer: Mutex::new(()),
        }
    }

    pub fn calendar(&self) -> &LocalCalendar {
        &self.calendar
    }

    pub fn settings(&self) -> NotificationSettings {
        self.settings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update_settings(&self, settings: NotificationSettings) {
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
    }

    pub fn is_authorized(&self) -> bool {
        self.host.is_authorized()
    }

    pub fn plan(&self, item: &InventoryItem, now: DateTime<Utc>) -> Vec<NotificationTrigger> {
        plan_triggers(item, &self.settings(), now, &self.calendar)
    }

    /// Full replace of the item's reminders. Individual scheduling failures are
    /// logged and reported, never raised.
    pub fn reconcile(&self, item: &InventoryItem, now: DateTime<Utc>) -> ReconcileReport {
        let plan = self.plan(item, now);
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.host.cancel(&trigger_ids(item.id));

        let mut report = ReconcileReport::default();
        if !self.host.is_authorized() {
            report.unauthorized = true;
            debug!(target: "spichr", event = "notify_skip_unauthorized", item_id = %item.id);
            return report;
        }
        for trigger in &plan {
            match self.host.schedule(TriggerRequest::from(trigger)) {
                Ok(()) => report.scheduled.push(trigger.identifier.clone()),
                Err(err) => {
                    warn!(
                        target: "spichr",
                        event = "notify_schedule_failed",
                        item_id = %item.id,
                        identifier = %trigger.identifier,
                        error = %err
                    );
                    report.failed.push(trigger.identifier.clone());
                }
            }
        }
        debug!(
            target: "spichr",
            event = "notify_reconciled",
            item_id = %item.id,
            scheduled = report.scheduled.len(),
            failed = report.failed.len()
        );
        report
    }

    pub fn cancel_for(&self, item: ItemId) {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.host.cancel(&trigger_ids(item));
    }

    /// Drops everything pending and rebuilds it from `items`.
    pub fn reschedule_all(
        &self,
        items: &[InventoryItem],
        expiring: u64,
        now: DateTime<Utc>,
    ) -> ReconcileReport {
        {
            let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
            self.host.cancel_all();
        }
        let mut total = ReconcileReport::default();
        for item in items.iter().filter(|item| item.in_stock) {
            let report = self.reconcile(item, now);
            total.scheduled.extend(report.scheduled);
            total.failed.extend(report.failed);
            total.unauthorized |= report.unauthorized;
        }
        self.schedule_daily_summary(expiring);
        info!(
            target: "spichr",
            event = "notify_rescheduled_all",
            items = items.len(),
            scheduled = total.scheduled.len(),
            failed = total.failed.len()
        );
        total
    }

    /// Replaces the repeating summary; returns whether one is now pending.
    pub fn schedule_daily_summary(&self, expiring: u64) -> bool {
        let settings = self.settings();
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.host.cancel(&[DAILY_SUMMARY_ID.to_string()]);
        if !settings.daily_summary_enabled || !self.host.is_authorized() {
            return false;
        }
        let request = TriggerRequest {
            identifier: DAILY_SUMMARY_ID.to_string(),
            title: "Your Inventory".to_string(),
            body: daily_summary_body(expiring),
            category: CATEGORY_SUMMARY,
            item_id: None,
            schedule: Schedule::Daily {
                time: settings.daily_summary_time,
            },
        };
        match self.host.schedule(request) {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "spichr", event = "notify_summary_failed", error = %err);
                false
            }
        }
    }

    pub fn update_badge(&self, expiring: u64) {
        self.host.set_badge(expiring);
    }
}

/// Notification host that keeps requests in memory. Used by tests and by the
/// CLI to show what a device would have pending.
#[derive(Default)]
pub struct RecordingHost {
    pending: Mutex<BTreeMap<String, TriggerRequest>>,
    denied: AtomicBool,
    failing: Mutex<HashSet<String>>,
    badge: AtomicU64,
    schedule_calls: AtomicU64,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.denied.store(!authorized, Ordering::SeqCst);
    }

    /// Scheduling `identifier` fails until the host is dropped.
    pub fn fail_identifier(&self, identifier: impl Into<String>) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identifier.into());
    }

    pub fn pending(&self) -> Vec<TriggerRequest> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn badge(&self) -> u64 {
        self.badge.load(Ordering::SeqCst)
    }

    pub fn schedule_calls(&self) -> u64 {
        self.schedule_calls.load(Ordering::SeqCst)
    }
}

impl NotificationHost for RecordingHost {
    fn is_authorized(&self) -> bool {
        !self.denied.load(Ordering::SeqCst)
    }

    fn schedule(&self, request: TriggerRequest) -> Result<(), HostError> {
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_authorized() {
            return Err(HostError::NotAuthorized);
        }
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&request.identifier);
        if failing {
            return Err(HostError::Rejected {
                identifier: request.identifier,
                reason: "injected".into(),
            });
        }
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request.identifier.clone(), request);
        Ok(())
    }

    fn cancel(&self, identifiers: &[String]) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for id in identifiers {
            pending.remove(id);
        }
    }

    fn cancel_all(&self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn set_badge(&self, count: u64) {
        self.badge.store(count, Ordering::SeqCst);
    }
}

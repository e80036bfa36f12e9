//! Expiry arithmetic for inventory items.
//!
//! Everything here is pure: callers pass `now` and the local calendar, so the
//! same inputs always classify the same way regardless of thread or wall clock.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::InventoryItem;
use crate::time::LocalCalendar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationStatus {
    Expired,
    ExpiringToday,
    /// 1–2 days left.
    Critical,
    /// 3–7 days left.
    Warning,
    /// 8–30 days left.
    Approaching,
    Fresh,
    /// No date to go by.
    Unknown,
}

impl ExpirationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpirationStatus::Expired => "expired",
            ExpirationStatus::ExpiringToday => "expiring_today",
            ExpirationStatus::Critical => "critical",
            ExpirationStatus::Warning => "warning",
            ExpirationStatus::Approaching => "approaching",
            ExpirationStatus::Fresh => "fresh",
            ExpirationStatus::Unknown => "unknown",
        }
    }
}

/// The date used for status and reminders.
///
/// Opening an item can only shorten its life: with both an opened-based date
/// and a printed date, the earlier one wins.
pub fn effective_expiration(item: &InventoryItem, cal: &LocalCalendar) -> Option<DateTime<Utc>> {
    match (item.opened_date, item.shelf_life_after_opening_days) {
        (Some(opened), days) if days > 0 => {
            let after_opening = cal.add_days(opened, i64::from(days));
            match (after_opening, item.expiration_date) {
                (Some(computed), Some(printed)) => Some(computed.min(printed)),
                (Some(computed), None) => Some(computed),
                (None, printed) => printed,
            }
        }
        _ => item.expiration_date,
    }
}

/// Calendar days from today to `date`; negative once it has passed.
pub fn days_until(date: DateTime<Utc>, now: DateTime<Utc>, cal: &LocalCalendar) -> i64 {
    cal.days_between(now, date)
}

pub fn classify(days: Option<i64>) -> ExpirationStatus {
    match days {
        None => ExpirationStatus::Unknown,
        Some(d) if d < 0 => ExpirationStatus::Expired,
        Some(0) => ExpirationStatus::ExpiringToday,
        Some(1..=2) => ExpirationStatus::Critical,
        Some(3..=7) => ExpirationStatus::Warning,
        Some(8..=30) => ExpirationStatus::Approaching,
        Some(_) => ExpirationStatus::Fresh,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Lifecycle {
    pub effective_expiration: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub status: ExpirationStatus,
}

pub fn evaluate(item: &InventoryItem, now: DateTime<Utc>, cal: &LocalCalendar) -> Lifecycle {
    let effective = effective_expiration(item, cal);
    let days = effective.map(|date| days_until(date, now, cal));
    Lifecycle {
        effective_expiration: effective,
        days_remaining: days,
        status: classify(days),
    }
}

pub fn days_since_opened(
    item: &InventoryItem,
    now: DateTime<Utc>,
    cal: &LocalCalendar,
) -> Option<i64> {
    item.opened_date.map(|opened| cal.days_between(opened, now))
}

/// Shelf-life days left since opening; `None` when no opened shelf life applies.
pub fn remaining_days_after_opening(
    item: &InventoryItem,
    now: DateTime<Utc>,
    cal: &LocalCalendar,
) -> Option<i64> {
    if item.shelf_life_after_opening_days == 0 {
        return None;
    }
    days_since_opened(item, now, cal)
        .map(|elapsed| i64::from(item.shelf_life_after_opening_days) - elapsed)
}

/// In stock and due within `days` from now, already-expired items included.
pub fn expires_within(
    item: &InventoryItem,
    days: i64,
    now: DateTime<Utc>,
    cal: &LocalCalendar,
) -> bool {
    if !item.in_stock {
        return false;
    }
    match (effective_expiration(item, cal), cal.add_days(now, days)) {
        (Some(due), Some(horizon)) => due <= horizon,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HouseholdId, ItemId};
    use chrono::TimeZone;

    fn item() -> InventoryItem {
        InventoryItem {
            id: ItemId::new(),
            name: "Milk".into(),
            quantity: None,
            location: None,
            store: None,
            barcode: None,
            expiration_date: None,
            opened_date: None,
            shelf_life_after_opening_days: 0,
            in_stock: true,
            household_id: Some(HouseholdId::generate()),
            last_modified: 0,
            share_reference: None,
        }
    }

    fn noon(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn classify_matches_boundary_table() {
        let table = [
            (-1, ExpirationStatus::Expired),
            (0, ExpirationStatus::ExpiringToday),
            (1, ExpirationStatus::Critical),
            (2, ExpirationStatus::Critical),
            (3, ExpirationStatus::Warning),
            (7, ExpirationStatus::Warning),
            (8, ExpirationStatus::Approaching),
            (30, ExpirationStatus::Approaching),
            (31, ExpirationStatus::Fresh),
        ];
        for (days, expected) in table {
            assert_eq!(classify(Some(days)), expected, "days = {days}");
        }
        assert_eq!(classify(None), ExpirationStatus::Unknown);
    }

    #[test]
    fn printed_date_is_used_when_not_opened() {
        let cal = LocalCalendar::utc();
        let mut milk = item();
        milk.expiration_date = Some(noon(2025, 6, 20));
        milk.shelf_life_after_opening_days = 3;
        assert_eq!(effective_expiration(&milk, &cal), milk.expiration_date);
    }

    #[test]
    fn opening_shortens_but_never_extends() {
        let cal = LocalCalendar::utc();
        let mut jam = item();
        jam.opened_date = Some(noon(2025, 6, 1));
        jam.shelf_life_after_opening_days = 30;
        jam.expiration_date = Some(noon(2025, 6, 10));
        assert_eq!(effective_expiration(&jam, &cal), Some(noon(2025, 6, 10)));

        jam.expiration_date = Some(noon(2025, 12, 1));
        assert_eq!(effective_expiration(&jam, &cal), Some(noon(2025, 7, 1)));

        jam.expiration_date = None;
        assert_eq!(effective_expiration(&jam, &cal), Some(noon(2025, 7, 1)));
    }

    #[test]
    fn opened_without_shelf_life_falls_back_to_printed_date() {
        let cal = LocalCalendar::utc();
        let mut bread = item();
        bread.opened_date = Some(noon(2025, 6, 1));
        assert_eq!(effective_expiration(&bread, &cal), None);
        assert_eq!(evaluate(&bread, noon(2025, 6, 1), &cal).status, ExpirationStatus::Unknown);
    }

    #[test]
    fn milk_opened_today_moves_from_fresh_to_warning() {
        let cal = LocalCalendar::utc();
        let today = noon(2025, 6, 1);
        let mut milk = item();
        milk.expiration_date = cal.add_days(today, 45);
        assert_eq!(evaluate(&milk, today, &cal).status, ExpirationStatus::Fresh);

        milk.opened_date = Some(today);
        milk.shelf_life_after_opening_days = 3;
        let lifecycle = evaluate(&milk, today, &cal);
        assert_eq!(lifecycle.effective_expiration, cal.add_days(today, 3));
        assert_eq!(lifecycle.days_remaining, Some(3));
        assert_eq!(lifecycle.status, ExpirationStatus::Warning);
    }

    #[test]
    fn opened_shelf_life_ending_in_a_dst_gap_still_applies() {
        let cal = LocalCalendar::new(chrono_tz::Europe::Berlin);
        // Opened 02:30 CET; three days on, 02:30 falls in the spring-forward gap.
        let opened = Utc.with_ymd_and_hms(2025, 3, 27, 1, 30, 0).unwrap();
        let mut cream = item();
        cream.opened_date = Some(opened);
        cream.shelf_life_after_opening_days = 3;
        cream.expiration_date = Some(Utc.with_ymd_and_hms(2025, 5, 10, 10, 0, 0).unwrap());

        let lifecycle = evaluate(&cream, opened, &cal);
        let effective = lifecycle.effective_expiration.unwrap();
        assert_eq!(
            cal.date_of(effective),
            chrono::NaiveDate::from_ymd_opt(2025, 3, 30).unwrap()
        );
        assert_eq!(lifecycle.days_remaining, Some(3));
        assert_eq!(lifecycle.status, ExpirationStatus::Warning);
    }

    #[test]
    fn days_until_uses_calendar_days_not_hours() {
        let cal = LocalCalendar::new(chrono_tz::America::New_York);
        // 23:50 local tonight vs 00:10 local tomorrow: 20 minutes, one calendar day.
        let now = Utc.with_ymd_and_hms(2025, 1, 16, 4, 50, 0).unwrap();
        let due = Utc.with_ymd_and_hms(2025, 1, 16, 5, 10, 0).unwrap();
        assert_eq!(days_until(due, now, &cal), 1);
        assert_eq!(days_until(now, now, &cal), 0);
    }

    #[test]
    fn expiring_window_counts_expired_and_skips_shopping_list() {
        let cal = LocalCalendar::utc();
        let now = noon(2025, 6, 1);
        let mut cheese = item();
        cheese.expiration_date = Some(noon(2025, 5, 20));
        assert!(expires_within(&cheese, 7, now, &cal));
        cheese.expiration_date = Some(noon(2025, 6, 8));
        assert!(expires_within(&cheese, 7, now, &cal));
        cheese.expiration_date = Some(noon(2025, 6, 9));
        assert!(!expires_within(&cheese, 7, now, &cal));
        cheese.expiration_date = Some(noon(2025, 6, 2));
        cheese.in_stock = false;
        assert!(!expires_within(&cheese, 7, now, &cal));
    }

    #[test]
    fn opened_counters() {
        let cal = LocalCalendar::utc();
        let mut yogurt = item();
        assert_eq!(days_since_opened(&yogurt, noon(2025, 6, 5), &cal), None);
        yogurt.opened_date = Some(noon(2025, 6, 1));
        assert_eq!(days_since_opened(&yogurt, noon(2025, 6, 5), &cal), Some(4));
        assert_eq!(remaining_days_after_opening(&yogurt, noon(2025, 6, 5), &cal), None);
        yogurt.shelf_life_after_opening_days = 5;
        assert_eq!(remaining_days_after_opening(&yogurt, noon(2025, 6, 5), &cal), Some(1));
    }
}

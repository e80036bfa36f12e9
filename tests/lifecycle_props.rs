#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Duration;
use proptest::prelude::*;
use spichr_lib::lifecycle::{classify, effective_expiration, evaluate, ExpirationStatus};
use spichr_lib::time::LocalCalendar;

#[path = "util.rs"]
mod util;

fn rank(status: ExpirationStatus) -> u8 {
    match status {
        ExpirationStatus::Expired => 0,
        ExpirationStatus::ExpiringToday => 1,
        ExpirationStatus::Critical => 2,
        ExpirationStatus::Warning => 3,
        ExpirationStatus::Approaching => 4,
        ExpirationStatus::Fresh => 5,
        ExpirationStatus::Unknown => 6,
    }
}

proptest! {
    #[test]
    fn opening_never_extends_printed_date(
        printed_in in -60i64..400,
        opened_ago in 0i64..60,
        shelf_life in 1u32..120,
    ) {
        let cal = LocalCalendar::utc();
        let now = util::at(2026, 3, 1, 12);
        let mut item = util::bare_item("Yoghurt");
        item.expiration_date = Some(now + Duration::days(printed_in));
        item.opened_date = Some(now - Duration::days(opened_ago));
        item.shelf_life_after_opening_days = shelf_life;

        let effective = effective_expiration(&item, &cal).unwrap();
        prop_assert!(effective <= item.expiration_date.unwrap());
    }

    #[test]
    fn status_is_monotonic_in_days_left(a in -400i64..400, b in -400i64..400) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(rank(classify(Some(lo))) <= rank(classify(Some(hi))));
    }

    #[test]
    fn evaluation_agrees_with_classification(days in -45i64..45) {
        let cal = LocalCalendar::utc();
        let now = util::at(2026, 6, 15, 9);
        let mut item = util::bare_item("Cheese");
        item.expiration_date = Some(now + Duration::days(days));
        let state = evaluate(&item, now, &cal);
        prop_assert_eq!(state.days_remaining, Some(days));
        prop_assert_eq!(state.status, classify(Some(days)));
    }
}

#[test]
fn status_boundaries() {
    assert_eq!(classify(None), ExpirationStatus::Unknown);
    assert_eq!(classify(Some(-1)), ExpirationStatus::Expired);
    assert_eq!(classify(Some(0)), ExpirationStatus::ExpiringToday);
    assert_eq!(classify(Some(2)), ExpirationStatus::Critical);
    assert_eq!(classify(Some(3)), ExpirationStatus::Warning);
    assert_eq!(classify(Some(7)), ExpirationStatus::Warning);
    assert_eq!(classify(Some(8)), ExpirationStatus::Approaching);
    assert_eq!(classify(Some(30)), ExpirationStatus::Approaching);
    assert_eq!(classify(Some(31)), ExpirationStatus::Fresh);
}

#[test]
fn milk_opened_yesterday_with_three_day_shelf_life() {
    let cal = LocalCalendar::utc();
    let now = util::at(2026, 3, 10, 8);
    let mut milk = util::bare_item("Milk");
    milk.expiration_date = Some(now + Duration::days(10));
    milk.opened_date = Some(now - Duration::days(1));
    milk.shelf_life_after_opening_days = 3;

    let state = evaluate(&milk, now, &cal);
    assert_eq!(state.days_remaining, Some(2));
    assert_eq!(state.status, ExpirationStatus::Critical);
}

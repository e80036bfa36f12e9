#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use chrono::Duration;
use spichr_lib::model::{ItemPatch, NewItem};
use spichr_lib::notify::{trigger_id, Schedule, TriggerKind, DAILY_SUMMARY_ID};

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn reconcile_twice_leaves_the_same_pending_set() -> Result<()> {
    let h = util::harness().await;
    let now = util::at(2026, 4, 1, 10);
    let inventory = h.ctx.inventory();
    let item = inventory
        .create(NewItem::named("Ham").expires(now + Duration::days(10)), now)
        .await?;

    let first = h.host.pending_ids();
    let report = h.ctx.notifications.reconcile(&item, now);
    assert!(report.failed.is_empty());
    assert_eq!(h.host.pending_ids(), first);

    // 30-day reminder is already in the past.
    let mut expected = vec![
        trigger_id(item.id, TriggerKind::SevenDays),
        trigger_id(item.id, TriggerKind::OneDay),
        trigger_id(item.id, TriggerKind::DueToday),
    ];
    expected.sort();
    assert_eq!(first, expected);
    Ok(())
}

#[tokio::test]
async fn moving_to_shopping_list_cancels_reminders() -> Result<()> {
    let h = util::harness().await;
    let now = util::at(2026, 4, 1, 10);
    let inventory = h.ctx.inventory();
    let item = inventory
        .create(NewItem::named("Salmon").expires(now + Duration::days(40)), now)
        .await?;
    assert_eq!(h.host.pending_ids().len(), 4);

    let moved = inventory.toggle_stock(item.id, now).await?;
    assert!(!moved.in_stock);
    assert!(h.host.pending_ids().is_empty());

    inventory.toggle_stock(item.id, now).await?;
    assert_eq!(h.host.pending_ids().len(), 4);
    Ok(())
}

#[tokio::test]
async fn changing_the_date_replaces_reminders() -> Result<()> {
    let h = util::harness().await;
    let now = util::at(2026, 4, 1, 10);
    let inventory = h.ctx.inventory();
    let item = inventory
        .create(NewItem::named("Soup").expires(now + Duration::days(40)), now)
        .await?;

    let patch = ItemPatch {
        expiration_date: Some(now + Duration::days(3)),
        ..ItemPatch::default()
    };
    inventory.update(item.id, patch, now).await?;
    let ids = h.host.pending_ids();
    assert!(!ids.contains(&trigger_id(item.id, TriggerKind::ThirtyDays)));
    assert!(!ids.contains(&trigger_id(item.id, TriggerKind::SevenDays)));
    assert!(ids.contains(&trigger_id(item.id, TriggerKind::OneDay)));
    assert!(ids.contains(&trigger_id(item.id, TriggerKind::DueToday)));
    Ok(())
}

#[tokio::test]
async fn unauthorized_host_gets_nothing_scheduled() -> Result<()> {
    let h = util::harness().await;
    h.host.set_authorized(false);
    let now = util::at(2026, 4, 1, 10);
    let item = h
        .ctx
        .inventory()
        .create(NewItem::named("Tofu").expires(now + Duration::days(10)), now)
        .await?;

    let report = h.ctx.notifications.reconcile(&item, now);
    assert!(report.unauthorized);
    assert!(report.scheduled.is_empty());
    assert!(h.host.pending_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn one_failing_identifier_does_not_block_the_rest() -> Result<()> {
    let h = util::harness().await;
    let now = util::at(2026, 4, 1, 10);
    let mut item = util::bare_item("Pesto");
    item.expiration_date = Some(now + Duration::days(10));
    h.host
        .fail_identifier(trigger_id(item.id, TriggerKind::SevenDays));

    let report = h.ctx.notifications.reconcile(&item, now);
    assert_eq!(report.failed, vec![trigger_id(item.id, TriggerKind::SevenDays)]);
    assert_eq!(report.scheduled.len(), 2);
    Ok(())
}

#[tokio::test]
async fn reschedule_all_sets_summary_and_badge() -> Result<()> {
    let h = util::harness().await;
    let now = util::at(2026, 4, 1, 10);
    let inventory = h.ctx.inventory();
    inventory
        .create(NewItem::named("Cream").expires(now + Duration::days(2)), now)
        .await?;
    inventory
        .create(NewItem::named("Rice").expires(now + Duration::days(300)), now)
        .await?;
    inventory
        .create(NewItem::named("Old bread").expires(now - Duration::days(1)), now)
        .await?;

    inventory.reschedule_all(now).await?;
    assert_eq!(h.host.badge(), 2);
    let summary = h
        .host
        .pending()
        .into_iter()
        .find(|r| r.identifier == DAILY_SUMMARY_ID)
        .expect("daily summary pending");
    assert_eq!(summary.body, "You have 2 items expiring soon");
    assert!(matches!(summary.schedule, Schedule::Daily { .. }));

    let mut settings = h.ctx.notifications.settings();
    settings.daily_summary_enabled = false;
    h.ctx.notifications.update_settings(settings);
    assert!(!h.ctx.notifications.schedule_daily_summary(0));
    assert!(!h.host.pending_ids().contains(&DAILY_SUMMARY_ID.to_string()));
    Ok(())
}

#[tokio::test]
async fn opened_items_get_a_reminder_the_day_before() -> Result<()> {
    let h = util::harness().await;
    let now = util::at(2026, 4, 1, 10);
    let mut item = util::bare_item("Milk");
    item.opened_date = Some(now);
    item.shelf_life_after_opening_days = 5;

    let plan = h.ctx.notifications.plan(&item, now);
    let opened = plan
        .iter()
        .find(|t| t.kind == TriggerKind::OpenedExpiry)
        .expect("opened reminder");
    assert_eq!(opened.fire_at, now + Duration::days(4));
    assert_eq!(opened.body, "Milk was opened and expires soon");
    Ok(())
}

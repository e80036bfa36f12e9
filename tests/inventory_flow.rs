#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use chrono::Duration;
use spichr_lib::lifecycle::ExpirationStatus;
use spichr_lib::model::NewItem;
use spichr_lib::notify::{trigger_id, TriggerKind};

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn opening_milk_moves_it_from_fresh_to_warning() -> Result<()> {
    let h = util::harness().await;
    let now = util::at(2026, 5, 4, 8);
    let inventory = h.ctx.inventory();
    let milk = inventory
        .create(NewItem::named("Milk").expires(now + Duration::days(45)), now)
        .await?;
    assert_eq!(inventory.evaluate(&milk, now).status, ExpirationStatus::Fresh);

    let opened = inventory.mark_opened(milk.id, 3, now).await?;
    let state = inventory.evaluate(&opened, now);
    assert_eq!(state.days_remaining, Some(3));
    assert_eq!(state.status, ExpirationStatus::Warning);

    // Reminders now follow the opened date rather than the printed one.
    let pending = h.host.pending_ids();
    assert!(pending.contains(&trigger_id(milk.id, TriggerKind::OpenedExpiry)));
    assert!(!pending.contains(&trigger_id(milk.id, TriggerKind::ThirtyDays)));
    assert!(!pending.contains(&trigger_id(milk.id, TriggerKind::SevenDays)));
    Ok(())
}

#[tokio::test]
async fn counts_and_expiring_window() -> Result<()> {
    let h = util::harness().await;
    let now = util::at(2026, 5, 4, 8);
    let inventory = h.ctx.inventory();
    inventory
        .create(NewItem::named("Spinach").expires(now + Duration::days(1)), now)
        .await?;
    inventory
        .create(NewItem::named("Pickles").expires(now + Duration::days(200)), now)
        .await?;
    inventory
        .create(
            NewItem::named("Stale chips").expires(now - Duration::days(3)),
            now,
        )
        .await?;
    inventory
        .create(
            NewItem::named("Limes")
                .expires(now + Duration::days(1))
                .in_stock(false),
            now,
        )
        .await?;

    let counts = inventory.counts(now).await?;
    assert_eq!(counts.in_stock, 3);
    assert_eq!(counts.shopping_list, 1);
    assert_eq!(counts.expiring_soon, 2);

    let expiring: Vec<String> = inventory
        .expiring_within(7, now)
        .await?
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(expiring, vec!["Stale chips", "Spinach"]);

    assert_eq!(inventory.refresh_badge(now).await?, 2);
    assert_eq!(h.host.badge(), 2);
    Ok(())
}

#[tokio::test]
async fn purging_expired_items_cancels_their_reminders() -> Result<()> {
    let h = util::harness().await;
    let now = util::at(2026, 5, 4, 8);
    let inventory = h.ctx.inventory();
    let gone = inventory
        .create(NewItem::named("Old yoghurt").expires(now - Duration::days(2)), now)
        .await?;
    let kept = inventory
        .create(NewItem::named("Fresh yoghurt").expires(now + Duration::days(12)), now)
        .await?;

    assert_eq!(inventory.delete_expired(now).await?, 1);
    assert!(h.ctx.item_store().get(gone.id).await?.is_none());
    assert!(h.ctx.item_store().get(kept.id).await?.is_some());
    assert!(h
        .host
        .pending_ids()
        .iter()
        .all(|id| !id.starts_with(&gone.id.to_string())));
    Ok(())
}

#[tokio::test]
async fn search_and_locations() -> Result<()> {
    let h = util::harness().await;
    let now = util::at(2026, 5, 4, 8);
    let inventory = h.ctx.inventory();
    inventory
        .create(NewItem::named("Frozen peas").located("Freezer"), now)
        .await?;
    inventory
        .create(NewItem::named("Peanut butter").located("Pantry"), now)
        .await?;

    assert_eq!(inventory.search("pea").await?.len(), 2);
    assert_eq!(inventory.search("  ").await?.len(), 2);
    let freezer = inventory.by_location("Freezer").await?;
    assert_eq!(freezer.len(), 1);
    assert_eq!(freezer[0].name, "Frozen peas");
    Ok(())
}

#[tokio::test]
async fn rejected_delete_keeps_the_item_and_its_reminders() -> Result<()> {
    let h = util::harness().await;
    let now = util::at(2026, 5, 4, 8);
    let inventory = h.ctx.inventory();
    let butter = inventory
        .create(NewItem::named("Butter").expires(now + Duration::days(45)), now)
        .await?;
    let reminder = trigger_id(butter.id, TriggerKind::ThirtyDays);
    assert!(h.host.pending_ids().contains(&reminder));

    sqlx::query(
        "CREATE TRIGGER refuse_deletes BEFORE DELETE ON food_items \
         BEGIN SELECT RAISE(ABORT, 'read only'); END",
    )
    .execute(h.ctx.store.pool())
    .await?;

    assert!(inventory.delete(butter.id).await.is_err());
    assert!(inventory.delete_many(&[butter.id]).await.is_err());
    assert!(h.ctx.item_store().get(butter.id).await?.is_some());
    assert!(h.host.pending_ids().contains(&reminder));
    Ok(())
}

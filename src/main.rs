use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use serde_json::json;

use spichr_lib::config::AppConfig;
use spichr_lib::lifecycle;
use spichr_lib::model::{InventoryItem, ItemId, NewItem};
use spichr_lib::notify::RecordingHost;
use spichr_lib::remote::InMemoryRemote;
use spichr_lib::time::{now_ms, to_date};
use spichr_lib::{logging, AppContext};

#[derive(Debug, Parser)]
#[command(name = "spichr", about = "Spichr inventory and expiry tracker", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Inventory items.
    #[command(subcommand)]
    Items(ItemsCommand),
    /// Household identity and sharing state.
    #[command(subcommand)]
    Household(HouseholdCommand),
    /// Expiry reminders.
    #[command(subcommand)]
    Notify(NotifyCommand),
    /// Counts of stock, shopping list and items expiring soon.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ItemsCommand {
    /// List items with their expiry status.
    List {
        /// Only items on the shopping list.
        #[arg(long, conflicts_with = "stock")]
        shopping: bool,
        /// Only items in stock.
        #[arg(long)]
        stock: bool,
        #[arg(long)]
        json: bool,
    },
    /// Add an item.
    Add {
        name: String,
        /// Printed expiry date (YYYY-MM-DD), local calendar.
        #[arg(long, value_name = "DATE")]
        expires: Option<NaiveDate>,
        #[arg(long)]
        location: Option<String>,
        /// Put the item on the shopping list instead of in stock.
        #[arg(long)]
        shopping: bool,
    },
    /// Mark an item opened today.
    Open {
        id: ItemId,
        /// Shelf life after opening, in days.
        #[arg(long, default_value_t = 0)]
        days: u32,
    },
    /// Move an item between stock and the shopping list.
    Stock { id: ItemId },
    Delete { id: ItemId },
    /// Delete every item whose printed date has passed.
    PurgeExpired,
}

#[derive(Debug, Subcommand)]
enum HouseholdCommand {
    /// Household id and cached sharing state.
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Tag items created before households existed.
    Migrate,
}

#[derive(Debug, Subcommand)]
enum NotifyCommand {
    /// Reminders an item would get right now.
    Plan { id: ItemId },
}

fn main() {
    let _log_guard = match logging::init(None) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: start runtime: {err}");
            process::exit(1);
        }
    };

    match runtime.block_on(handle_cli(cli.command)) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

async fn open_context() -> Result<AppContext> {
    let config = AppConfig::load()?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("create data directory {}", config.data_dir.display()))?;
    // Without a signed-in remote account the CLI only sees local data.
    let ctx = AppContext::open(
        config,
        Arc::new(InMemoryRemote::new()),
        Arc::new(RecordingHost::new()),
    )
    .await?;
    Ok(ctx)
}

async fn handle_cli(command: Commands) -> Result<i32> {
    let ctx = open_context().await?;
    match command {
        Commands::Items(items) => handle_items(&ctx, items).await,
        Commands::Household(household) => handle_household(&ctx, household).await,
        Commands::Notify(NotifyCommand::Plan { id }) => {
            let item = ctx
                .item_store()
                .get(id)
                .await?
                .with_context(|| format!("item {id} not found"))?;
            let triggers = ctx.notifications.plan(&item, to_date(now_ms()));
            if triggers.is_empty() {
                println!("No reminders for {}.", item.name);
            }
            for trigger in triggers {
                println!(
                    "{}  {}  {}",
                    trigger.fire_at.format("%Y-%m-%d %H:%M"),
                    trigger.identifier,
                    trigger.body
                );
            }
            Ok(0)
        }
        Commands::Status { json } => {
            let counts = ctx.inventory().counts(to_date(now_ms())).await?;
            if json {
                let value = json!({
                    "in_stock": counts.in_stock,
                    "shopping_list": counts.shopping_list,
                    "expiring_soon": counts.expiring_soon,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("In stock:       {}", counts.in_stock);
                println!("Shopping list:  {}", counts.shopping_list);
                println!("Expiring soon:  {}", counts.expiring_soon);
            }
            Ok(0)
        }
    }
}

async fn handle_items(ctx: &AppContext, command: ItemsCommand) -> Result<i32> {
    let inventory = ctx.inventory();
    let now = to_date(now_ms());
    match command {
        ItemsCommand::List {
            shopping,
            stock,
            json,
        } => {
            let items = if shopping {
                inventory.shopping_list().await?
            } else if stock {
                inventory.stock().await?
            } else {
                inventory.all().await?
            };
            if json {
                let rows: Vec<_> = items
                    .iter()
                    .map(|item| json!({ "item": item, "lifecycle": inventory.evaluate(item, now) }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if items.is_empty() {
                println!("No items.");
            } else {
                for item in &items {
                    print_item_row(ctx, item, now);
                }
            }
            Ok(0)
        }
        ItemsCommand::Add {
            name,
            expires,
            location,
            shopping,
        } => {
            let mut new_item = NewItem::named(name).in_stock(!shopping);
            if let Some(date) = expires {
                let at = ctx.notifications.calendar().at_local_time(date, NaiveTime::MIN);
                new_item = new_item.expires(at);
            }
            if let Some(location) = location {
                new_item = new_item.located(location);
            }
            let item = inventory.create(new_item, now).await?;
            println!("{}", item.id);
            Ok(0)
        }
        ItemsCommand::Open { id, days } => {
            let item = inventory.mark_opened(id, days, now).await?;
            print_item_row(ctx, &item, now);
            Ok(0)
        }
        ItemsCommand::Stock { id } => {
            let item = inventory.toggle_stock(id, now).await?;
            print_item_row(ctx, &item, now);
            Ok(0)
        }
        ItemsCommand::Delete { id } => {
            if inventory.delete(id).await? {
                println!("Deleted {id}.");
                Ok(0)
            } else {
                eprintln!("Error: item {id} not found");
                Ok(2)
            }
        }
        ItemsCommand::PurgeExpired => {
            let removed = inventory.delete_expired(now).await?;
            println!("Removed {removed} expired item(s).");
            Ok(0)
        }
    }
}

fn print_item_row(ctx: &AppContext, item: &InventoryItem, now: chrono::DateTime<chrono::Utc>) {
    let state = lifecycle::evaluate(item, now, ctx.notifications.calendar());
    let days = state
        .days_remaining
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".into());
    let place = if item.in_stock { "stock" } else { "shopping" };
    println!(
        "{}  {:<24} {:<8} {:>5}  {}",
        item.id,
        item.name,
        place,
        days,
        state.status.as_str()
    );
}

async fn handle_household(ctx: &AppContext, command: HouseholdCommand) -> Result<i32> {
    match command {
        HouseholdCommand::Show { json } => {
            let household = ctx.household.identity.current()?;
            let sharing = ctx.household.profile.snapshot();
            if json {
                let value = json!({ "household_id": household, "sharing": sharing });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Household:  {household}");
                println!("Name:       {}", sharing.household_name);
                println!("Shared:     {}", sharing.is_shared);
                if let Some(url) = &sharing.share_url {
                    println!("Share URL:  {url}");
                }
            }
            Ok(0)
        }
        HouseholdCommand::Migrate => {
            let outcome = ctx
                .household
                .identity
                .migrate_untagged(ctx.store.as_ref())
                .await?;
            println!("{}", serde_json::to_string(&outcome)?);
            Ok(0)
        }
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Remote record type that mirrors a single inventory item.
pub const ITEM_RECORD_TYPE: &str = "FoodItem";

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_id!(ItemId);
uuid_id!(HouseholdId);

impl HouseholdId {
    /// Household ids are random so two installs never collide.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Opaque name of a record (or share) in the remote shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The remote record that mirrors `item`.
    pub fn for_item(item: ItemId) -> Self {
        Self(format!("{ITEM_RECORD_TYPE}-{item}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub opened_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub shelf_life_after_opening_days: u32,
    #[serde(default)]
    pub in_stock: bool,
    /// `None` only for rows written before household tagging existed.
    #[serde(default)]
    pub household_id: Option<HouseholdId>,
    /// Milliseconds since the epoch; strictly increasing per mutation.
    pub last_modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_reference: Option<RecordId>,
}

impl InventoryItem {
    pub fn is_opened(&self) -> bool {
        self.opened_date.is_some()
    }

    pub fn record_id(&self) -> RecordId {
        RecordId::for_item(self.id)
    }

    /// Name plus quantity, used in notification bodies.
    pub fn notification_text(&self) -> String {
        match self.quantity.as_deref().map(str::trim) {
            Some(qty) if !qty.is_empty() => format!("{} ({qty})", self.name),
            _ => self.name.clone(),
        }
    }
}

/// Fields for a new item. Identity, household tag and timestamps are assigned
/// by the store on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub opened_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub shelf_life_after_opening_days: u32,
    #[serde(default)]
    pub in_stock: bool,
}

impl NewItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn in_stock(mut self, in_stock: bool) -> Self {
        self.in_stock = in_stock;
        self
    }

    pub fn expires(mut self, at: DateTime<Utc>) -> Self {
        self.expiration_date = Some(at);
        self
    }

    pub fn opened(mut self, at: DateTime<Utc>, shelf_life_days: u32) -> Self {
        self.opened_date = Some(at);
        self.shelf_life_after_opening_days = shelf_life_days;
        self
    }

    pub fn located(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub quantity: Option<String>,
    pub location: Option<String>,
    pub store: Option<String>,
    pub barcode: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub opened_date: Option<DateTime<Utc>>,
    pub shelf_life_after_opening_days: Option<u32>,
    pub in_stock: Option<bool>,
}

impl ItemPatch {
    pub fn apply(self, item: &mut InventoryItem) {
        if let Some(name) = self.name {
            item.name = name;
        }
        if let Some(quantity) = self.quantity {
            item.quantity = Some(quantity);
        }
        if let Some(location) = self.location {
            item.location = Some(location);
        }
        if let Some(store) = self.store {
            item.store = Some(store);
        }
        if let Some(barcode) = self.barcode {
            item.barcode = Some(barcode);
        }
        if let Some(expiration) = self.expiration_date {
            item.expiration_date = Some(expiration);
        }
        if let Some(opened) = self.opened_date {
            item.opened_date = Some(opened);
        }
        if let Some(days) = self.shelf_life_after_opening_days {
            item.shelf_life_after_opening_days = days;
        }
        if let Some(in_stock) = self.in_stock {
            item.in_stock = in_stock;
        }
    }
}

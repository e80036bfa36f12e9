//! Core of the Spichr inventory app: expiry tracking, reminders and the
//! shared-household sync surface.

pub mod accept;
pub mod cleanup;
pub mod config;
pub mod confirm;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod household;
pub mod inventory;
pub mod lifecycle;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod notify;
pub mod prefs;
pub mod profile;
pub mod remote;
pub mod share;
pub mod state;
pub mod store;
pub mod time;

pub use error::{AppError, AppResult};
pub use state::AppContext;

pub mod auth;
pub mod error;
pub mod events;
pub mod ledger;
pub mod models;

pub use error::{Result, TripError};

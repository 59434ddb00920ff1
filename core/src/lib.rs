pub mod db;
pub mod dietitians;
pub mod error;
pub mod goals;
pub mod history;
pub mod ledger;
pub mod macros;
pub mod models;
pub mod service;
pub mod users;

pub use error::{Result, TallyError};

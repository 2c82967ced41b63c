//! Core business entities, types and traits

pub mod error;
pub mod log_entry;
pub mod meter_value;
pub mod ports;
pub mod transaction;
pub mod user;

pub use error::{DomainError, DomainResult};
pub use log_entry::LogEntry;
pub use meter_value::MeterValue;
pub use ports::{Authenticator, CommandGateway, LogRepository, TransactionRepository};
pub use transaction::{Transaction, TransactionStatus};
pub use user::User;

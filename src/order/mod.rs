//! Orders: model, store contract and service

pub mod error;
pub mod models;
pub mod service;
pub mod store;

pub use error::OrderError;
pub use models::{Order, OrderNumber, OrderStatus, luhn_valid};
pub use service::{CreateOrderOutcome, OrderService, ReconcileReport};
pub use store::OrderStore;

//! # Database Module
//!
//! Persistence for users, conversations and community posts. PostgreSQL via
//! tokio-postgres and deadpool in production, an in-memory store otherwise.

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod store;

pub use connection::{DatabaseConfig, DatabaseConnection};
pub use memory::MemoryStore;
pub use store::{Store, StoreError};

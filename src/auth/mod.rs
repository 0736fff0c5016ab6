//! # Authentication Module
//!
//! Token issuance and validation, password hashing, email verification codes,
//! and the middleware that guards the API.

pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod verification;

//! Configuration
//!
//! Limit types, option-value parsing, and startup validation.

pub mod types;
pub mod units;
pub mod validator;

//! Tradelink: account lifecycle and role routing for a B2B trade marketplace.

pub mod accounts;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod session;
pub mod store;
pub mod web;

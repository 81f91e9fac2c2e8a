//! HTTP route handlers

pub mod batches;
pub mod health;
pub mod weather;

//! Studio booking confirmation backend.
//!
//! Turns "payment captured" gateway notifications into confirmed bookings exactly once,
//! while customers race for the same slots.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;

//! Fleet back-office core
//!
//! Order lifecycle with a stock ledger, shipment dispatch and finishing,
//! billing, purchase orders and maintenance notifications over a pluggable
//! unit of work (in-memory or SeaORM).
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod migrator;
pub mod notifications;
pub mod repositories;
pub mod services;
pub mod workflows;

pub use commands::CommandRegistry;
pub use errors::ServiceError;
pub use services::AppServices;

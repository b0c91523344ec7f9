// Common library for report subscription delivery

pub mod catalog;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod models;
pub mod naming;
pub mod pdf;
pub mod schedule;
pub mod substitution;
pub mod tableau;
pub mod tables;
pub mod telemetry;
pub mod transport;

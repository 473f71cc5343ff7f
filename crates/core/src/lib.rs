//! Domain logic for the cadence workflow engine.
//!
//! Everything here is free of I/O except through the traits in
//! [`engine`]; persistence and delivery live in sibling crates.

pub mod aggregation;
pub mod analytics;
pub mod approval;
pub mod audit;
pub mod condition;
pub mod delegation;
pub mod engine;
pub mod error;
pub mod instance;
pub mod pagination;
pub mod roles;
pub mod types;
pub mod workflow;

//! Text moderation pipeline
//!
//! This library provides the core functionality for the moderation pipeline:
//! a job producer that publishes "classify this text" jobs, a Redis-backed
//! broker with leases and bounded retry, and a worker pool that calls the
//! external classifier and persists one prediction per content id in
//! PostgreSQL.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod telemetry;

//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - Repository layer for referral, commission, period and statement rows

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{CommissionFilter, Repository, StatementFilter, SweepCandidate};

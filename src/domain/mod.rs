//! Core domain types and logic.

pub mod bar;
pub mod signal;
pub mod row;
pub mod pattern;
pub mod query;
pub mod config;
pub mod config_validation;
pub mod market_metrics;
pub mod screen;
pub mod trade;
pub mod stats;
pub mod backtest;
pub mod error;

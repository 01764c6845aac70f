//! Rental listings acquisition and aggregation pipeline.
//!
//! Source adapters feed a deduplicated scrape queue, the queue is drained
//! into listings with snapshot history, and batch jobs roll the listings up
//! into a daily price index.

pub mod admin;
pub mod config;
pub mod jobs;
pub mod models;
pub mod scrapers;
pub mod storage;

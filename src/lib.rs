//! Cosmic Timeline library
//!
//! Data layer for NASA's Astronomy Picture of the Day: a retrying API client,
//! an in-memory stale-while-revalidate cache, a media download proxy, and the
//! CLI pieces used by the `cosmic` binary and integration tests.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod refresh;
pub mod render;

#[cfg(test)]
mod test_helpers;

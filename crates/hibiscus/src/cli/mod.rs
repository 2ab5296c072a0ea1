//! Command implementations.

pub mod config;
pub mod edit;
pub mod generate;
pub mod models;
pub mod video;

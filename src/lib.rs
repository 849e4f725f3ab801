pub mod card;
pub mod commands;
pub mod config;
pub mod crawl;
pub mod detail;
pub mod explain;
pub mod http;
pub mod listing;
pub mod normalize;
pub mod palette;
pub mod progress;
pub mod repair;
pub mod stats;
pub mod store;
pub mod utils;

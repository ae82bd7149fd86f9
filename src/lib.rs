pub mod alias;
pub mod config;
pub mod crossref;
pub mod grouping;
pub mod loader;
pub mod outliers;
pub mod pipeline;
pub mod region;
pub mod schema;
pub mod stats;
pub mod store;
pub mod tags;
pub mod trends;
pub mod wiki;
pub mod workbook;

/// Application name for XDG paths
pub const APP_NAME: &str = "thvote";

pub mod catalog;
pub mod config;
pub mod schema_tool;

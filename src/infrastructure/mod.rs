pub mod auth;
pub mod cache;
pub mod messaging;
pub mod persistence;
pub mod snowflake;

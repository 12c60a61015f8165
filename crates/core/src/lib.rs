pub mod config;
pub mod http_client;
pub mod models;
pub mod observability;
pub mod retry;

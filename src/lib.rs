pub mod config;
pub mod db;
pub mod fetch_error;
pub mod fetcher;
pub mod provider;
pub mod services;
pub mod units;

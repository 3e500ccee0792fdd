pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod ledger;
pub mod profile;
pub mod state;
pub mod storage;
pub mod sweeper;

pub mod api;
pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod jobs;
pub mod operation;
pub mod payment;
pub mod poller;
pub mod session;
pub mod tier;
pub mod ui;

pub mod bot;
pub mod cli;
pub mod config;
pub mod desk;
pub mod health;
pub mod logging;
pub mod setup;
pub mod sheet;
pub mod store;
pub mod supervisor;
pub mod telegram_log;
pub mod text;

pub mod adapter;
pub mod annotate;
pub mod config;
pub mod decision;
pub mod dev;
pub mod history;
pub mod launch;
pub mod preferences;
pub mod server;
pub mod session;
pub mod types;
pub mod update;

pub mod config;
pub mod loader;
pub mod oracle;
pub mod server;
pub mod service;

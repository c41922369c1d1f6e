// plugin module
pub mod plugin;
pub use plugin::*;

// configuration module
pub mod config;

// error module
pub mod error;

//! Command implementations

pub mod graph;
pub mod install;
pub mod list;
pub mod run;
pub mod uninstall;

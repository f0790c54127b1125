pub mod apply;
pub mod artifacts;
pub mod assistant;
pub mod backup;
pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod locate;
pub mod process;
pub mod request;
pub mod safety;
pub mod task;
pub mod validate;
pub mod verify;

// Library exports for the Warden process supervisor

pub mod api;
pub mod config;
pub mod control;
pub mod error;
pub mod process;
pub mod scaling;
pub mod scheduler;
pub mod state;

pub mod call;
pub mod chart;
pub mod clients;
pub mod config;
pub mod context;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod mock;
pub mod occupancy;
pub mod pacing;
pub mod sampling;
pub mod simulator;
pub mod skill;
pub mod source;
pub mod types;

pub use error::{BoosterError, Result};

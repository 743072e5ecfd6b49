pub mod chart;
pub mod service;
pub mod skills;

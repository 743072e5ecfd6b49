pub mod chart;
pub mod config;
pub mod demo;
pub mod run;

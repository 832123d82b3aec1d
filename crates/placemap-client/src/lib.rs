#![doc = include_str!("../README.md")]

pub mod app;
pub mod config;
pub mod telemetry;
pub mod transport;

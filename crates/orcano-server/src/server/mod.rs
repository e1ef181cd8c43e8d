pub mod backend;
pub mod client;
pub mod config;
pub mod frontend;
pub mod pool;
pub mod ports;
pub mod queue;
pub mod telemetry;

pub mod config;
pub mod controller;
pub mod decoder;
pub mod metrics;
pub mod pool;
pub mod scheduler;
pub mod session;

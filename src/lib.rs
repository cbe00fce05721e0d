pub mod calendar;
pub mod cli;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod store;
pub mod sync;
pub mod wal;

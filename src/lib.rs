pub mod config;
pub mod errors;
pub mod lock;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod ticket;
pub mod tracker;
pub mod ui;

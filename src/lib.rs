pub mod config;
pub mod logger;
pub mod ml;
pub mod model;

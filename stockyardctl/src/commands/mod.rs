pub mod config;
pub mod plan;
pub mod send;
pub mod simulate;

pub mod config;
pub mod generate;
pub mod tiktok;

pub use config::*;
pub use generate::*;

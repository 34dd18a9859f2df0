pub mod config;
pub mod keywords;

pub use config::*;
pub use keywords::*;

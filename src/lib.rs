pub mod error;
pub mod logger;
pub mod range;
pub mod sweep;

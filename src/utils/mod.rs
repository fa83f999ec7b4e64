pub mod error;
pub mod ine;
pub mod logger;
pub mod monitor;
pub mod validation;

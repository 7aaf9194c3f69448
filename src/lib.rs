#![doc = include_str!("../README.md")]

pub mod api;
pub mod cli;
pub mod error;
pub mod services;
pub mod types;

pub use error::*;
pub use services::*;
pub use types::*;

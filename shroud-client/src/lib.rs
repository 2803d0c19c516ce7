pub mod client;
pub mod config;

pub use client::{ShroudClient, ShroudClientError};
pub use config::ShroudConfig;

pub mod constants;
pub mod encryption;

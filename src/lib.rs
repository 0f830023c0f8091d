pub mod client;
pub mod config;
pub mod framing;
pub mod protocol;

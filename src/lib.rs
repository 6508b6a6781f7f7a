#![doc = include_str!("../README.md")]
#![deny(unsafe_code, missing_docs)]

pub mod checksum;
pub mod error;
pub mod metrics;
pub mod packet;
pub mod server;
pub mod table;

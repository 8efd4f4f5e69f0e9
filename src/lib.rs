#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod bridge;
pub mod call;
pub mod codec;
pub mod config;
pub mod realtime;
pub mod registry;
pub mod retry;
pub mod rtp;
pub mod session;
pub mod stream;
pub mod telephony;
pub mod validators;

#[cfg(test)]
mod testing;

pub use config::Config;

pub mod config;
pub mod controller;
pub mod outgoing;
pub mod processor;

pub use config::Config;
pub use controller::Mailgate;

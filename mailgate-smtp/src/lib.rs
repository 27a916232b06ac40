pub mod client;
pub mod connection;
pub mod data;
pub mod error;
pub mod message;
pub mod reader;
pub mod server;

pub use client::{Reply, ReplyCategory, SmtpClient};
pub use connection::Transport;
pub use error::{ClientError, ServerError};
pub use message::MessageBuilder;
pub use reader::LineReader;
pub use server::{AuthConfig, Listener, ListenerConfig, TlsFiles};

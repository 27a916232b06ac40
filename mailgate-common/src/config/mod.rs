//! Configuration types shared between the listener and the delivery engine.
//!
//! - [`timeouts`]: bounds for each suspension point of an SMTP session
//! - [`tls`]: when the delivery engine upgrades a session to TLS

pub mod timeouts;
pub mod tls;

pub use timeouts::{ClientTimeouts, ServerTimeouts};
pub use tls::TlsPolicy;

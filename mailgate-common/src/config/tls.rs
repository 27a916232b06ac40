use serde::{Deserialize, Serialize};

/// TLS policy for outbound SMTP sessions.
///
/// Certificates presented by receiving servers are never validated: STARTTLS
/// between MTAs protects against passive observers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Upgrade when the server advertises STARTTLS, otherwise stay in plaintext.
    #[default]
    Opportunistic,

    /// A server that does not advertise STARTTLS is treated as a failed host.
    Required,

    /// Never upgrade.
    Disabled,
}

impl TlsPolicy {
    #[must_use]
    pub const fn is_required(self) -> bool {
        matches!(self, Self::Required)
    }

    #[must_use]
    pub const fn is_disabled(self) -> bool {
        matches!(self, Self::Disabled)
    }
}

use std::{borrow::Cow, collections::HashSet};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Attachment {filename} is not valid base64: {source}")]
    InvalidBase64 {
        filename: String,
        #[source]
        source: base64::DecodeError,
    },
}

/// One outbound message: who it is from, who it goes to, and what it says.
///
/// An envelope is never persisted. The same serialized message is reused for
/// every destination domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub from_name: Option<String>,
    pub from_email: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub references: Option<String>,
}

impl Envelope {
    pub fn new(from_email: impl Into<String>) -> Self {
        Self {
            from_email: from_email.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to.push(recipient.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Recipients with header-breaking characters removed, blanks dropped and
    /// duplicates (compared case-insensitively) removed. First-seen order wins.
    pub fn recipients(&self) -> Vec<String> {
        let mut seen = HashSet::new();

        self.to
            .iter()
            .map(String::as_str)
            .map(strip_line_breaks)
            .filter(|recipient| !recipient.is_empty())
            .filter(|recipient| seen.insert(recipient.to_ascii_lowercase()))
            .collect()
    }

    /// The part of the sender address after the `@`, if there is one.
    pub fn sender_domain(&self) -> Option<&str> {
        self.from_email
            .trim()
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }
}

/// Replaces any run of CR/LF with a single space and trims the result.
pub fn strip_line_breaks(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_break = false;

    for ch in value.chars() {
        if ch == '\r' || ch == '\n' {
            if !in_break {
                out.push(' ');
                in_break = true;
            }
        } else {
            out.push(ch);
            in_break = false;
        }
    }

    out.trim().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    pub content: AttachmentContent,
    /// Set when inline HTML refers to the attachment via `cid:`.
    #[serde(default)]
    pub content_id: Option<String>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: Some(filename.into()),
            content_type: None,
            content: AttachmentContent::Binary(content.into()),
            content_id: None,
        }
    }

    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    /// Attachment content, normalised to raw bytes.
    pub fn bytes(&self) -> Result<Cow<'_, [u8]>, AttachmentError> {
        self.content.bytes().map_err(|source| AttachmentError::InvalidBase64 {
            filename: self.filename.clone().unwrap_or_default(),
            source,
        })
    }
}

/// Attachment payloads may arrive as raw bytes or as base64 text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachmentContent {
    Binary(Vec<u8>),
    /// Base64 text, optionally carrying a `data:<type>;base64,` prefix.
    Base64(String),
}

impl AttachmentContent {
    fn bytes(&self) -> Result<Cow<'_, [u8]>, base64::DecodeError> {
        match self {
            Self::Binary(bytes) => Ok(Cow::Borrowed(bytes)),
            Self::Base64(text) => {
                let encoded = text.rsplit_once(',').map_or(text.as_str(), |(_, data)| data);
                let encoded: String = encoded.split_ascii_whitespace().collect();
                STANDARD.decode(encoded).map(Cow::Owned)
            }
        }
    }
}

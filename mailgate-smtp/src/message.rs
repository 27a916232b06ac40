//! Serialises an [`Envelope`] into an RFC 5322 message with MIME bodies.

use std::{io::Write, path::Path};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use mailgate_common::envelope::{Attachment, AttachmentError, Envelope, strip_line_breaks};
use rand::RngCore;
use thiserror::Error;

/// Maximum length of a base64 body line (RFC 2045 section 6.8).
const BASE64_LINE: usize = 76;

/// Bytes of header text carried by each encoded word, keeping the word under
/// the 75 character limit of RFC 2047.
const ENCODED_WORD_INPUT: usize = 45;

const DEFAULT_FILENAME: &str = "attachment.bin";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum MessageError {
    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error("Failed to write message: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds the wire form of an outbound message.
///
/// ```no_run
/// use mailgate_common::envelope::Envelope;
/// use mailgate_smtp::MessageBuilder;
///
/// let envelope = Envelope::new("sender@example.com")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .text("This is the message body");
///
/// let raw = MessageBuilder::new(&envelope).build().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct MessageBuilder<'a> {
    envelope: &'a Envelope,
    date: Option<DateTime<Utc>>,
    message_id: Option<String>,
}

impl<'a> MessageBuilder<'a> {
    #[must_use]
    pub const fn new(envelope: &'a Envelope) -> Self {
        Self {
            envelope,
            date: None,
            message_id: None,
        }
    }

    /// Overrides the `Date` header, which otherwise is the build time.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Overrides the generated `Message-ID`.
    #[must_use]
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Builds the header block and body, with CRLF line endings throughout.
    pub fn build(&self) -> Result<Vec<u8>, MessageError> {
        let envelope = self.envelope;
        let mut message = Vec::with_capacity(4096);

        let message_id = self.message_id.clone().unwrap_or_else(|| {
            format!(
                "<{}@{}>",
                uuid::Uuid::new_v4(),
                envelope.sender_domain().unwrap_or("localhost")
            )
        });
        let date = self.date.unwrap_or_else(Utc::now);

        let to = envelope
            .recipients()
            .iter()
            .map(|recipient| format_address(None, recipient))
            .collect::<Vec<_>>()
            .join(", ");

        write!(
            message,
            "From: {}\r\n",
            format_address(envelope.from_name.as_deref(), &envelope.from_email)
        )?;
        write!(message, "To: {to}\r\n")?;
        write!(message, "Subject: {}\r\n", encode_header(&envelope.subject))?;
        write!(message, "Date: {}\r\n", date.to_rfc2822())?;
        write!(message, "Message-ID: {}\r\n", strip_line_breaks(&message_id))?;
        write!(message, "MIME-Version: 1.0\r\n")?;

        for (name, value) in [
            ("In-Reply-To", &envelope.in_reply_to),
            ("References", &envelope.references),
        ] {
            if let Some(value) = value.as_deref().map(strip_line_breaks)
                && !value.is_empty()
            {
                write!(message, "{name}: {value}\r\n")?;
            }
        }

        let text = envelope.text.as_deref().filter(|text| !text.is_empty());
        let html = envelope.html.as_deref().filter(|html| !html.is_empty());

        if !envelope.attachments.is_empty() {
            let mixed = boundary("mix");
            write!(
                message,
                "Content-Type: multipart/mixed; boundary=\"{mixed}\"\r\n\r\n"
            )?;

            write!(message, "--{mixed}\r\n")?;
            match (text, html) {
                (Some(text), Some(html)) => {
                    let alternative = boundary("alt");
                    write!(
                        message,
                        "Content-Type: multipart/alternative; boundary=\"{alternative}\"\r\n\r\n"
                    )?;
                    write_alternative(&mut message, &alternative, text, html)?;
                    write!(message, "\r\n")?;
                }
                (None, Some(html)) => {
                    write_text_part(&mut message, "text/html", html)?;
                    write!(message, "\r\n")?;
                }
                (text, None) => {
                    write_text_part(&mut message, "text/plain", text.unwrap_or_default())?;
                    write!(message, "\r\n")?;
                }
            }

            for attachment in &envelope.attachments {
                write!(message, "--{mixed}\r\n")?;
                write_attachment(&mut message, attachment)?;
                write!(message, "\r\n")?;
            }

            write!(message, "--{mixed}--")?;
        } else if let (Some(text), Some(html)) = (text, html) {
            let alternative = boundary("alt");
            write!(
                message,
                "Content-Type: multipart/alternative; boundary=\"{alternative}\"\r\n\r\n"
            )?;
            write_alternative(&mut message, &alternative, text, html)?;
        } else if let Some(html) = html {
            write_text_part(&mut message, "text/html", html)?;
        } else {
            write_text_part(&mut message, "text/plain", text.unwrap_or_default())?;
        }

        write!(message, "\r\n")?;

        Ok(message)
    }
}

/// `Name <address>`, or `<address>` without a display name.
fn format_address(name: Option<&str>, address: &str) -> String {
    let address = strip_line_breaks(address);
    let display = name.map(encode_header).unwrap_or_default();

    if display.is_empty() {
        format!("<{address}>")
    } else {
        format!("{display} <{address}>")
    }
}

/// Strips line breaks and renders non printable-ASCII text as RFC 2047
/// encoded words.
fn encode_header(value: &str) -> String {
    let value = strip_line_breaks(value);
    if value.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
        return value;
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;

    for (idx, ch) in value.char_indices() {
        let next = idx + ch.len_utf8();
        if next - start > ENCODED_WORD_INPUT && end > start {
            words.push(&value[start..end]);
            start = end;
        }
        end = next;
    }
    words.push(&value[start..]);

    words
        .into_iter()
        .map(|word| format!("=?UTF-8?B?{}?=", STANDARD.encode(word)))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

fn boundary(prefix: &str) -> String {
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}_{hex}")
}

/// Base64 in lines of at most 76 characters, without a trailing line break.
fn write_base64(out: &mut Vec<u8>, data: &[u8]) {
    let encoded = STANDARD.encode(data);

    for (idx, line) in encoded.as_bytes().chunks(BASE64_LINE).enumerate() {
        if idx > 0 {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(line);
    }
}

fn write_text_part(out: &mut Vec<u8>, content_type: &str, body: &str) -> std::io::Result<()> {
    write!(out, "Content-Type: {content_type}; charset=utf-8\r\n")?;
    write!(out, "Content-Transfer-Encoding: base64\r\n\r\n")?;
    write_base64(out, body.as_bytes());
    Ok(())
}

fn write_alternative(
    out: &mut Vec<u8>,
    boundary: &str,
    text: &str,
    html: &str,
) -> std::io::Result<()> {
    write!(out, "--{boundary}\r\n")?;
    write_text_part(out, "text/plain", text)?;
    write!(out, "\r\n--{boundary}\r\n")?;
    write_text_part(out, "text/html", html)?;
    write!(out, "\r\n--{boundary}--")
}

fn write_attachment(out: &mut Vec<u8>, attachment: &Attachment) -> Result<(), MessageError> {
    let content = attachment.bytes()?;
    let content_type = attachment
        .content_type
        .as_deref()
        .map(strip_line_breaks)
        .filter(|content_type| !content_type.is_empty())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    let content_id = attachment
        .content_id
        .as_deref()
        .map(|id| strip_line_breaks(id.trim_start_matches('<').trim_end_matches('>')))
        .filter(|id| !id.is_empty());

    let filename = FilenameParams::new(attachment.filename.as_deref());
    let disposition = if content_id.is_some() {
        "inline"
    } else {
        "attachment"
    };

    write!(out, "Content-Type: {content_type}; {}\r\n", filename.render("name"))?;
    write!(out, "Content-Transfer-Encoding: base64\r\n")?;
    write!(
        out,
        "Content-Disposition: {disposition}; {}\r\n",
        filename.render("filename")
    )?;
    if let Some(content_id) = content_id {
        write!(out, "Content-ID: <{content_id}>\r\n")?;
    }
    write!(out, "\r\n")?;
    write_base64(out, &content);

    Ok(())
}

/// A filename as both a quoted ASCII parameter and, when the name is not
/// plain ASCII, an RFC 5987 extended parameter.
struct FilenameParams {
    ascii: String,
    extended: Option<String>,
}

impl FilenameParams {
    fn new(filename: Option<&str>) -> Self {
        let safe = filename
            .map(strip_line_breaks)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
            .replace(['"', '\\'], "_");

        let ascii = safe
            .chars()
            .map(|ch| {
                if ch.is_ascii() && !ch.is_ascii_control() {
                    ch
                } else {
                    '_'
                }
            })
            .collect::<String>();

        let extended = (ascii != safe).then(|| urlencoding::encode(&safe).into_owned());

        Self { ascii, extended }
    }

    fn render(&self, parameter: &str) -> String {
        match &self.extended {
            Some(extended) => {
                format!("{parameter}=\"{}\"; {parameter}*=UTF-8''{extended}", self.ascii)
            }
            None => format!("{parameter}=\"{}\"", self.ascii),
        }
    }
}

/// Guesses a MIME content type from a file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    match extension.to_ascii_lowercase().as_str() {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "zip" => "application/zip",
        "json" => "application/json",
        "xml" => "application/xml",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

//! Helpers behind `mailgate send`.

use std::{fmt::Write as _, path::Path};

use anyhow::Context;
use mailgate_common::envelope::Attachment;
use mailgate_delivery::DeliveryResult;
use mailgate_smtp::message::guess_content_type;

/// Reads `path` into an attachment named after the file, with a content type
/// guessed from its extension.
pub async fn load_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read attachment {}", path.display()))?;

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} does not name a file", path.display()))?;

    Ok(Attachment::new(filename, content).content_type(guess_content_type(path)))
}

/// One line per recipient, accepted first.
pub fn summary(result: &DeliveryResult) -> String {
    let mut out = String::new();

    for recipient in &result.accepted {
        let _ = writeln!(out, "accepted: {recipient}");
    }
    for rejection in &result.rejected {
        let _ = writeln!(out, "rejected: {rejection}");
    }

    out
}

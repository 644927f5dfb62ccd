//! Rebuilding the message that gets re-delivered.

use mailward_mime::{Attachment as MimeAttachment, Headers, MessageBuilder, Part};

use crate::Result;
use crate::attachments::Plan;
use crate::store::Attachment;

/// Appended to the text when attachments were stripped.
pub const ATTACHMENTS_REMOVED: &str = "[Attachments removed]";

/// Original headers that the rebuilt message replaces.
const REPLACED_HEADERS: [&str; 8] = [
    "subject",
    "content-type",
    "content-transfer-encoding",
    "mime-version",
    "message-id",
    "x-mailward-released-from",
    "x-mailward-release-bypass",
    "x-mailward-email-id",
];

/// Subject and bodies of the released message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    /// Final subject.
    pub subject: String,
    /// Final plain text.
    pub text: String,
    /// Final HTML.
    pub html: String,
}

/// Escaped text with line breaks as `<br>`.
#[must_use]
pub fn html_from_text(text: &str) -> String {
    text.lines()
        .map(|line| {
            line.replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;")
                .replace('"', "&quot;")
        })
        .collect::<Vec<_>>()
        .join("<br>")
}

async fn load(attachment: &Attachment) -> Result<Part> {
    let data = tokio::fs::read(&attachment.storage_path).await?;
    Ok(Part::attachment(&MimeAttachment {
        filename: attachment.filename.clone(),
        mime_type: attachment.mime_type.clone(),
        data,
        inline: attachment.is_inline(),
        content_id: attachment.content_id.clone(),
    }))
}

/// Serializes the released message.
///
/// The body is `multipart/alternative`, wrapped in `multipart/related`
/// when inline parts remain and in `multipart/mixed` when regular
/// attachments remain.
///
/// # Errors
///
/// Returns an error if an attachment file cannot be read or a header
/// cannot be written.
pub async fn assemble(
    original: &Headers,
    content: &Content,
    message_id: &str,
    extra_headers: &[(&str, String)],
    plan: &Plan,
) -> Result<Vec<u8>> {
    let mut body = Part::multipart("alternative", vec![Part::text(&content.text), Part::html(&content.html)]);

    let mut inline = Vec::new();
    for attachment in plan.inline() {
        inline.push(load(attachment).await?);
    }
    if !inline.is_empty() {
        inline.insert(0, body);
        body = Part::multipart("related", inline);
    }

    let mut regular = Vec::new();
    for attachment in plan.regular() {
        regular.push(load(attachment).await?);
    }
    if !regular.is_empty() {
        regular.insert(0, body);
        body = Part::multipart("mixed", regular);
    }

    let mut builder = MessageBuilder::new()
        .headers_from(original, &REPLACED_HEADERS)
        .subject(&content.subject)
        .message_id(message_id);
    for (name, value) in extra_headers {
        builder = builder.header(name, value);
    }
    Ok(builder.body(body).build()?.to_bytes()?)
}

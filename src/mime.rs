use std::fs;
use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime};
use mailparse::{DispositionType, ParsedMail};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::store::AttachmentRef;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Failures that abort decoding of one message. Header and charset problems
/// never land here, those degrade to fallback values.
#[derive(Debug, Error)]
pub enum MimeError {
    #[error("attachment write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("attachment decode failed: {0}")]
    Parse(#[from] mailparse::MailParseError),
}

/// Decoded header fields of one message, extracted before the (heavier)
/// body/attachment pass so deduplication can run on headers alone.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub subject: String,
    pub from: String,
    pub date: String,
}

pub fn decode_envelope(mail: &ParsedMail) -> Envelope {
    Envelope {
        subject: header_value(mail, "Subject")
            .map(|raw| decode_header_text(&raw))
            .unwrap_or_default(),
        from: header_value(mail, "From").unwrap_or_default(),
        date: normalize_date(header_value(mail, "Date").as_deref()),
    }
}

fn header_value(mail: &ParsedMail, name: &str) -> Option<String> {
    mail.headers
        .iter()
        .find(|h| h.get_key().eq_ignore_ascii_case(name))
        .map(|h| h.get_value())
}

/// Decode RFC 2047 encoded-words (e.g. `=?utf-8?B?...?=`) in a header value.
/// Falls back to the input text on any parse failure: header decoding never
/// errors, bad charsets degrade to replacement characters.
pub fn decode_header_text(raw: &str) -> String {
    // Fast path: no encoded-word marker present
    if !raw.contains("=?") {
        return raw.to_string();
    }
    // Build a synthetic header so mailparse can decode it
    let fake_header = format!("X: {}", raw);
    match mailparse::parse_header(fake_header.as_bytes()) {
        Ok((hdr, _)) => hdr.get_value(),
        Err(_) => raw.to_string(),
    }
}

// ── Body extraction ─────────────────────────────────────────────────────────

/// Extract the display body: the first text/html part wins, otherwise the
/// first text/plain part. Parts marked as attachments are never body.
pub fn extract_content(mail: &ParsedMail) -> String {
    let mut text: Option<String> = None;
    let mut html: Option<String> = None;
    walk_body_parts(mail, &mut text, &mut html);
    html.or(text).unwrap_or_default()
}

fn walk_body_parts(part: &ParsedMail, text: &mut Option<String>, html: &mut Option<String>) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk_body_parts(sub, text, html);
        }
        return;
    }

    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return;
    }

    let content_type = part.ctype.mimetype.to_lowercase();
    if content_type == "text/plain" && text.is_none() {
        *text = part.get_body().ok();
    } else if content_type == "text/html" && html.is_none() {
        *html = part.get_body().ok();
    }
}

// ── Attachments ─────────────────────────────────────────────────────────────

/// Write every filename-carrying part's decoded payload under
/// `<attachments_dir>/<message_id>/` and return the recorded references, in
/// order of appearance. Write failures propagate as message-level errors.
pub fn save_attachments(
    mail: &ParsedMail,
    attachments_dir: &Path,
    message_id: &str,
) -> Result<Vec<AttachmentRef>, MimeError> {
    let mut refs = Vec::new();
    save_attachment_parts(mail, attachments_dir, message_id, &mut refs)?;
    Ok(refs)
}

fn save_attachment_parts(
    part: &ParsedMail,
    attachments_dir: &Path,
    message_id: &str,
    refs: &mut Vec<AttachmentRef>,
) -> Result<(), MimeError> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            save_attachment_parts(sub, attachments_dir, message_id, refs)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    let raw_name = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();
    let raw_name = match raw_name {
        Some(name) => name,
        None => return Ok(()),
    };

    let filename = sanitize_filename(&decode_header_text(&raw_name));
    let payload = part.get_body_raw()?;

    let dir = attachments_dir.join(message_id);
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(&filename), &payload)?;

    refs.push(AttachmentRef {
        path: format!("/api/attachments/{}/{}", message_id, filename),
        filename,
    });
    Ok(())
}

/// Replace everything outside word characters, dots and hyphens with an
/// underscore so the name is safe as a single path component.
pub fn sanitize_filename(name: &str) -> String {
    static UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w.-]").expect("valid regex"));
    UNSAFE.replace_all(name, "_").into_owned()
}

// ── Date normalization ──────────────────────────────────────────────────────

/// Normalize a Date header to "YYYY-MM-DD HH:MM:SS".
///
/// Tries a fixed ladder of RFC 2822-style formats, then a regex extraction
/// of a "D Mon YYYY H:M:S" substring (this also rescues named-timezone
/// suffixes and comment trailers the strict formats reject). If nothing
/// parses, the raw header value is returned unmodified; a missing header
/// yields the current local time.
pub fn normalize_date(raw: Option<&str>) -> String {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Local::now().format(DATE_FORMAT).to_string(),
    };
    let trimmed = raw.trim();

    for fmt in ["%a, %d %b %Y %H:%M:%S %z", "%d %b %Y %H:%M:%S %z"] {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, fmt) {
            return dt.format(DATE_FORMAT).to_string();
        }
    }
    for fmt in ["%a, %d %b %Y %H:%M:%S", "%d %b %Y %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return dt.format(DATE_FORMAT).to_string();
        }
    }

    static DATE_PART: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"\d{1,2}\s+\w{3}\s+\d{4}\s+\d{1,2}:\d{1,2}:\d{1,2}").expect("valid regex")
    });
    if let Some(found) = DATE_PART.find(trimmed) {
        if let Ok(dt) = NaiveDateTime::parse_from_str(found.as_str(), "%d %b %Y %H:%M:%S") {
            return dt.format(DATE_FORMAT).to_string();
        }
    }

    raw.to_string()
}

// ── Unit tests ──────────────────────────────────────────────────────────────

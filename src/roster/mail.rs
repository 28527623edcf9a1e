//! Attachment extraction from raw RFC 822 messages.
use mailparse::{parse_mail, ParsedMail};

use super::RosterError;

fn filename(part: &ParsedMail<'_>) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .filter(|name| !name.trim().is_empty())
        .cloned()
}

// Depth-first, in message order.
fn find_attachment(part: &ParsedMail<'_>) -> Result<Option<Vec<u8>>, RosterError> {
    if filename(part).is_some() {
        return Ok(Some(part.get_body_raw()?));
    }
    for sub in &part.subparts {
        if let Some(bytes) = find_attachment(sub)? {
            return Ok(Some(bytes));
        }
    }
    Ok(None)
}

/// Decoded body of the first part carrying a filename, if any.
pub fn first_attachment(raw: &[u8]) -> Result<Option<Vec<u8>>, RosterError> {
    let parsed = parse_mail(raw)?;
    find_attachment(&parsed)
}

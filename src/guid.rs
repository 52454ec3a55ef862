//! Cross-server message identity.
//!
//! A message's GUID must come out the same no matter which server it sits
//! on, so it is derived from content: the MD5 of the `Message-ID` header
//! value when the message has a syntactically valid one, otherwise the MD5
//! of its `RFC822.SIZE` and `INTERNALDATE` concatenated as decimal strings.

use md5::{Digest, Md5};
use regex::bytes::Regex;

lazy_static::lazy_static! {
    // Matches the header line plus any folded continuation lines.
    static ref MESSAGE_ID_HEADER: Regex =
        Regex::new(r"(?mi)^message-id:((?:[^\r\n]|\r\n[ \t])*)").expect("static regex");
}

/// Compute the GUID for a message.
///
/// `message_id` is the normalized `Message-ID` value (see
/// [`normalize_message_id`]); when it is absent the size/date fallback is
/// used, which is also what `fast_scan` mode always does.
pub fn message_guid(message_id: Option<&str>, size: u32, internal_date: i64) -> String {
    match message_id {
        Some(id) => md5_hex(id.as_bytes()),
        None => md5_hex(format!("{}{}", size, internal_date).as_bytes()),
    }
}

/// Pull the raw `Message-ID` value out of a header block, unfolding
/// continuation lines. Returns `None` when the header is missing.
pub fn extract_message_id(header: &[u8]) -> Option<String> {
    let capture = MESSAGE_ID_HEADER.captures(header)?;
    let raw = capture.get(1)?.as_bytes();
    let mut unfolded = String::with_capacity(raw.len());
    for &b in raw {
        if b != b'\r' && b != b'\n' {
            unfolded.push(char::from(b));
        }
    }
    let trimmed = unfolded.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Reduce a raw `Message-ID` value to the identity the GUID hashes: the
/// content of its `<...>` brackets, or the first whitespace-delimited token
/// when the value never got its brackets. `None` means the header is not
/// usable and the size/date fallback applies.
pub fn normalize_message_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let (Some(open), Some(close)) = (raw.find('<'), raw.rfind('>')) {
        if open < close {
            let inner = raw[open + 1..close].trim();
            if !inner.is_empty() {
                return Some(inner.to_string());
            }
        }
        return None;
    }
    raw.split_whitespace().next().map(String::from)
}

/// Message-ID scraped from a header block, ready for [`message_guid`].
pub fn message_id_from_header(header: &[u8]) -> Option<String> {
    extract_message_id(header).and_then(|raw| normalize_message_id(&raw))
}

fn md5_hex(data: &[u8]) -> String {
    to_hex(&Md5::digest(data))
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_is_deterministic() {
        let a = message_guid(Some("abc@example.com"), 100, 200);
        let b = message_guid(Some("abc@example.com"), 999, 999);
        assert_eq!(a, b, "GUID with a Message-ID ignores size and date");
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fallback_concatenates_decimal_strings() {
        // Same digest as MD5("40961700000000").
        let a = message_guid(None, 4096, 1_700_000_000);
        let b = md5_hex(b"40961700000000");
        assert_eq!(a, b);
        assert_ne!(a, message_guid(None, 4097, 1_700_000_000));
        assert_ne!(a, message_guid(None, 4096, 1_700_000_001));
    }

    #[test]
    fn bracketed_and_bare_ids_agree() {
        let bracketed = normalize_message_id("<abc@example.com>").unwrap();
        let bare = normalize_message_id("abc@example.com trailing junk").unwrap();
        assert_eq!(bracketed, bare);
        assert_eq!(
            message_guid(Some(&bracketed), 1, 1),
            message_guid(Some(&bare), 2, 2)
        );
    }

    #[test]
    fn empty_ids_are_rejected() {
        assert_eq!(normalize_message_id("<>"), None);
        assert_eq!(normalize_message_id("  "), None);
        assert_eq!(normalize_message_id("< >"), None);
    }

    #[test]
    fn extracts_from_header_block() {
        let header = b"Received: from mx.example.com\r\n\
                       Message-ID: <one@example.com>\r\n\
                       Subject: hi\r\n\r\n";
        assert_eq!(
            message_id_from_header(header).as_deref(),
            Some("one@example.com")
        );
    }

    #[test]
    fn unfolds_continuation_lines() {
        let header = b"Message-Id:\r\n <folded@example.com>\r\nSubject: x\r\n\r\n";
        assert_eq!(
            message_id_from_header(header).as_deref(),
            Some("folded@example.com")
        );
    }

    #[test]
    fn missing_header_yields_none() {
        let header = b"Subject: no id here\r\n\r\n";
        assert_eq!(message_id_from_header(header), None);
        // In-Reply-To must not be mistaken for Message-ID.
        let header = b"In-Reply-To-Message-Id: <x@y>\r\n\r\n";
        assert_eq!(message_id_from_header(header), None);
    }
}

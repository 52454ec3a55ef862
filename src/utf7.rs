//! Modified UTF-7 mailbox name encoding per [RFC 3501 section
//! 5.1.3](https://tools.ietf.org/html/rfc3501#section-5.1.3).
//!
//! International mailbox names cross the wire in a variant of UTF-7 that
//! shifts with `&` instead of `+` and uses `,` instead of `/` in its base64
//! alphabet. Everything above the printable ASCII range is encoded as
//! big-endian UTF-16 packed six bits at a time.

const BASE64_MAP: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+,";

const BASE64_RANK: &[u8] = &[
    255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255,
    255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255,
    255, 255, 255, 255, 255, 62, 63, 255, 255, 255, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 255,
    255, 255, 255, 255, 255, 255, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18,
    19, 20, 21, 22, 23, 24, 25, 255, 255, 255, 255, 255, 255, 26, 27, 28, 29, 30, 31, 32, 33, 34,
    35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51, 255, 255, 255, 255, 255,
];

/// Encode a UTF-8 mailbox name into its modified UTF-7 wire form.
pub fn encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut shifted = false;
    let mut bits = 0u32;
    let mut acc = 0u32;

    for ch in name.chars() {
        let mut units = [0u16; 2];
        let units = ch.encode_utf16(&mut units);
        let printable = units.len() == 1 && (0x20..0x7f).contains(&units[0]);

        if printable {
            if shifted {
                if bits > 0 {
                    out.push(char::from(BASE64_MAP[((acc << (6 - bits)) & 0x3f) as usize]));
                }
                out.push('-');
                shifted = false;
                bits = 0;
                acc = 0;
            }
            if ch == '&' {
                out.push_str("&-");
            } else {
                out.push(ch);
            }
        } else {
            if !shifted {
                out.push('&');
                shifted = true;
            }
            for &unit in units.iter() {
                acc = (acc << 16) | u32::from(unit);
                bits += 16;
                while bits >= 6 {
                    out.push(char::from(BASE64_MAP[((acc >> (bits - 6)) & 0x3f) as usize]));
                    bits -= 6;
                }
            }
        }
    }

    if shifted {
        if bits > 0 {
            out.push(char::from(BASE64_MAP[((acc << (6 - bits)) & 0x3f) as usize]));
        }
        out.push('-');
    }

    out
}

/// Decode a modified UTF-7 wire form back into UTF-8.
///
/// Returns `None` when the input is not valid modified UTF-7; callers fall
/// back to the raw name in that case, since some servers emit names that
/// never went through the encoder.
pub fn decode(raw: &str) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(raw.len());
    let mut shifted = false;
    let mut bits = 0u32;
    let mut acc = 0u32;
    let mut input = raw.bytes().peekable();

    while let Some(ch) = input.next() {
        if shifted {
            if ch == b'-' {
                shifted = false;
                bits = 0;
                acc = 0;
            } else {
                let rank = *BASE64_RANK.get(ch as usize)?;
                if rank == 255 {
                    return None;
                }
                acc = (acc << 6) | u32::from(rank);
                bits += 6;
                if bits >= 16 {
                    units.push(((acc >> (bits - 16)) & 0xffff) as u16);
                    bits -= 16;
                }
            }
        } else if ch == b'&' {
            match input.peek() {
                Some(b'-') => {
                    units.push(u16::from(b'&'));
                    input.next();
                }
                Some(_) => shifted = true,
                None => return None,
            }
        } else if ch < 0x20 || ch > 0x7e {
            return None;
        } else {
            units.push(u16::from(ch));
        }
    }

    if shifted {
        // unterminated shift sequence
        return None;
    }

    String::from_utf16(&units).ok()
}

/// Decode a wire name, falling back to the raw bytes on malformed input.
pub fn decode_lossy(raw: &str) -> String {
    decode(raw).unwrap_or_else(|| raw.to_string())
}

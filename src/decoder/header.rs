//! Raw header access and RFC 2047 encoded-word decoding.
//!
//! Headers are read straight from the message bytes so that malformed
//! encodings never sink the whole message: anything that does not decode
//! cleanly is passed through as lossy UTF-8.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use encoding_rs::{Encoding, UTF_8};

/// Base64 engine tolerant of missing padding, as found in the wild.
const LENIENT_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The header block of a raw message (everything before the first blank line).
fn header_block(raw: &[u8]) -> &[u8] {
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = raw.windows(2).position(|w| w == b"\n\n");
    let end = match (crlf, lf) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => raw.len(),
    };
    &raw[..end]
}

/// Unfolded value of the first header called `name` (case-insensitive).
pub fn raw_header(raw: &[u8], name: &str) -> Option<String> {
    let block = String::from_utf8_lossy(header_block(raw));
    let mut found: Option<String> = None;

    for line in block.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with([' ', '\t']) {
            if let Some(value) = found.as_mut() {
                value.push_str(line);
            }
            continue;
        }
        if found.is_some() {
            break;
        }
        if let Some((key, value)) = line.split_once(':')
            && key.trim().eq_ignore_ascii_case(name)
        {
            found = Some(value.to_string());
        }
    }

    found.map(|v| v.trim().to_string())
}

/// One decoded piece of a header value.
enum Fragment {
    Plain(String),
    Encoded { charset: String, bytes: Vec<u8> },
}

/// Decode a header value containing RFC 2047 encoded words.
///
/// Adjacent encoded words in the same charset are merged before charset
/// decoding; distinct fragments are joined with a single space.
pub fn decode_header(value: &str) -> String {
    let mut fragments: Vec<Fragment> = Vec::new();
    let mut rest = value;

    while !rest.is_empty() {
        let Some(start) = rest.find("=?") else {
            push_plain(&mut fragments, rest);
            break;
        };
        match parse_encoded_word(&rest[start..]) {
            Some((charset, bytes, consumed)) => {
                push_plain(&mut fragments, &rest[..start]);
                match fragments.last_mut() {
                    Some(Fragment::Encoded {
                        charset: prev,
                        bytes: prev_bytes,
                    }) if prev.eq_ignore_ascii_case(&charset) => {
                        prev_bytes.extend_from_slice(&bytes);
                    }
                    _ => fragments.push(Fragment::Encoded { charset, bytes }),
                }
                rest = &rest[start + consumed..];
            }
            None => {
                // Not a valid encoded word: keep "=?" literally and move on
                push_plain(&mut fragments, &rest[..start + 2]);
                rest = &rest[start + 2..];
            }
        }
    }

    let decoded: Vec<String> = fragments
        .into_iter()
        .map(|f| match f {
            Fragment::Plain(text) => text,
            Fragment::Encoded { charset, bytes } => decode_charset(&charset, &bytes),
        })
        .filter(|s| !s.is_empty())
        .collect();
    decoded.join(" ")
}

/// Append plain text, trimming the whitespace that separates encoded words.
fn push_plain(fragments: &mut Vec<Fragment>, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    match fragments.last_mut() {
        // Continues a plain run split at a rejected "=?"
        Some(Fragment::Plain(prev)) if !text.starts_with(char::is_whitespace) => {
            prev.push_str(text.trim_end());
        }
        _ => fragments.push(Fragment::Plain(trimmed.to_string())),
    }
}

/// Parse `=?charset?enc?text?=` at the start of `s`.
///
/// Returns the charset, decoded bytes and the byte length consumed.
fn parse_encoded_word(s: &str) -> Option<(String, Vec<u8>, usize)> {
    let inner = s.strip_prefix("=?")?;
    let (charset, after) = inner.split_once('?')?;
    let (encoding, after) = after.split_once('?')?;
    let end = after.find("?=")?;
    let text = &after[..end];
    if charset.is_empty() || text.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => LENIENT_B64.decode(text).ok()?,
        "Q" | "q" => decode_q(text)?,
        _ => return None,
    };

    // RFC 2231 language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset).to_string();
    let consumed = 2 + charset_len(inner) + 1 + encoding.len() + 1 + end + 2;
    Some((charset, bytes, consumed))
}

fn charset_len(inner: &str) -> usize {
    inner.find('?').unwrap_or(0)
}

/// Decode the "Q" encoding: `_` is a space, `=XX` is a hex byte.
fn decode_q(text: &str) -> Option<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' => {
                let hex = text.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    Some(out)
}

/// Decode bytes in a named charset, falling back to lossy UTF-8.
fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    let encoding = Encoding::for_label(charset.trim().as_bytes()).unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_header_finds_and_unfolds() {
        let raw = b"From: a@b.c\r\nSubject: first part\r\n second part\r\nTo: x@y.z\r\n\r\nSubject: body";
        assert_eq!(
            raw_header(raw, "subject").as_deref(),
            Some("first part second part")
        );
        assert_eq!(raw_header(raw, "To").as_deref(), Some("x@y.z"));
        assert_eq!(raw_header(raw, "Cc"), None);
    }

    #[test]
    fn raw_header_ignores_body() {
        let raw = b"From: a@b.c\n\nX-Hidden: nope\n";
        assert_eq!(raw_header(raw, "X-Hidden"), None);
    }

    #[test]
    fn plain_header_untouched() {
        assert_eq!(decode_header("Meeting  notes"), "Meeting  notes");
        assert_eq!(decode_header(""), "");
    }

    #[test]
    fn base64_utf8_word() {
        // "Счёт" in UTF-8
        assert_eq!(decode_header("=?UTF-8?B?0KHRh9GR0YI=?="), "Счёт");
    }

    #[test]
    fn base64_without_padding() {
        assert_eq!(decode_header("=?utf-8?b?0KHRh9GR0YI?="), "Счёт");
    }

    #[test]
    fn q_encoded_word() {
        assert_eq!(
            decode_header("=?iso-8859-1?Q?Caf=E9_au_lait?="),
            "Café au lait"
        );
    }

    #[test]
    fn windows_1251_word() {
        // "Привет" in windows-1251
        assert_eq!(decode_header("=?windows-1251?B?z/Do4uXy?="), "Привет");
    }

    #[test]
    fn koi8r_word() {
        // "Счет" in KOI8-R
        assert_eq!(decode_header("=?KOI8-R?Q?=F3=DE=C5=D4?="), "Счет");
    }

    #[test]
    fn same_charset_words_merge() {
        // "Счёт" split across two words mid-character
        assert_eq!(
            decode_header("=?UTF-8?B?0KHRh9E=?= =?UTF-8?B?kdGC?="),
            "Счёт"
        );
    }

    #[test]
    fn mixed_charsets_joined_with_space() {
        let value = "=?UTF-8?B?0KHRh9GR0YI=?= =?iso-8859-1?Q?Caf=E9?=";
        assert_eq!(decode_header(value), "Счёт Café");
    }

    #[test]
    fn plain_prefix_and_encoded_word() {
        assert_eq!(
            decode_header("Re: =?UTF-8?B?0KHRh9GR0YI=?= #42"),
            "Re: Счёт #42"
        );
    }

    #[test]
    fn truncated_word_falls_back_to_text() {
        let value = "=?UTF-8?B?0KHRh9GR";
        assert_eq!(decode_header(value), "=?UTF-8?B?0KHRh9GR");
    }

    #[test]
    fn invalid_base64_kept_literally() {
        let decoded = decode_header("Hi =?UTF-8?B?***?= there");
        assert!(decoded.contains("***"));
        assert!(decoded.starts_with("Hi"));
    }

    #[test]
    fn unknown_charset_is_lossy_utf8() {
        assert_eq!(decode_header("=?x-unknown?Q?abc?="), "abc");
    }

    #[test]
    fn language_suffix_ignored() {
        assert_eq!(decode_header("=?UTF-8*ru?B?0KHRh9GR0YI=?="), "Счёт");
    }
}

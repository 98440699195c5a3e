//! Byte-level encoding detection and decoding.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default ratio of GBK-shaped byte pairs to total bytes above which a
/// non-UTF-8 buffer is tagged as GBK.
pub const DEFAULT_GBK_PAIR_THRESHOLD: f64 = 0.01;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodingTag {
    #[serde(rename = "UTF-8")]
    Utf8,
    #[serde(rename = "UTF-8-BOM")]
    Utf8Bom,
    #[serde(rename = "UTF-16LE")]
    Utf16Le,
    #[serde(rename = "UTF-16BE")]
    Utf16Be,
    #[serde(rename = "GBK")]
    Gbk,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl EncodingTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodingTag::Utf8 => "UTF-8",
            EncodingTag::Utf8Bom => "UTF-8-BOM",
            EncodingTag::Utf16Le => "UTF-16LE",
            EncodingTag::Utf16Be => "UTF-16BE",
            EncodingTag::Gbk => "GBK",
            EncodingTag::Unknown => "UNKNOWN",
        }
    }

    pub fn has_bom(&self) -> bool {
        matches!(
            self,
            EncodingTag::Utf8Bom | EncodingTag::Utf16Le | EncodingTag::Utf16Be
        )
    }

    /// Whether line edits can operate on this encoding without conversion.
    pub fn is_utf8(&self) -> bool {
        matches!(self, EncodingTag::Utf8 | EncodingTag::Utf8Bom)
    }
}

impl fmt::Display for EncodingTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Count byte pairs shaped like a GBK double-byte character: lead byte in
/// 0x81..=0xFE, trail byte in 0x40..=0xFE except 0x7F.
fn gbk_pair_count(bytes: &[u8]) -> usize {
    let mut pairs = 0;
    let mut i = 0;
    while i + 1 < bytes.len() {
        let lead = bytes[i];
        let trail = bytes[i + 1];
        if (0x81..=0xFE).contains(&lead) && (0x40..=0xFE).contains(&trail) && trail != 0x7F {
            pairs += 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    pairs
}

/// Tag a byte buffer. Checks run in order and the first match wins:
/// byte-order mark, UTF-8 validity, GBK pair ratio above `gbk_threshold`.
pub fn detect_bytes(bytes: &[u8], gbk_threshold: f64) -> EncodingTag {
    if bytes.starts_with(UTF8_BOM) {
        return EncodingTag::Utf8Bom;
    }
    if bytes.starts_with(UTF16_LE_BOM) {
        return EncodingTag::Utf16Le;
    }
    if bytes.starts_with(UTF16_BE_BOM) {
        return EncodingTag::Utf16Be;
    }
    if std::str::from_utf8(bytes).is_ok() {
        return EncodingTag::Utf8;
    }

    let ratio = gbk_pair_count(bytes) as f64 / bytes.len() as f64;
    if ratio > gbk_threshold {
        EncodingTag::Gbk
    } else {
        EncodingTag::Unknown
    }
}

/// Decode `bytes` strictly under `tag`, dropping any byte-order mark.
/// `Unknown` is attempted as GBK. Returns `None` on any malformed sequence.
pub fn decode(bytes: &[u8], tag: EncodingTag) -> Option<Cow<'_, str>> {
    match tag {
        EncodingTag::Utf8 => std::str::from_utf8(bytes).ok().map(Cow::Borrowed),
        EncodingTag::Utf8Bom => std::str::from_utf8(bytes.strip_prefix(UTF8_BOM)?)
            .ok()
            .map(Cow::Borrowed),
        EncodingTag::Utf16Le => encoding_rs::UTF_16LE
            .decode_without_bom_handling_and_without_replacement(bytes.strip_prefix(UTF16_LE_BOM)?),
        EncodingTag::Utf16Be => encoding_rs::UTF_16BE
            .decode_without_bom_handling_and_without_replacement(bytes.strip_prefix(UTF16_BE_BOM)?),
        EncodingTag::Gbk | EncodingTag::Unknown => {
            encoding_rs::GBK.decode_without_bom_handling_and_without_replacement(bytes)
        }
    }
}

/// Detect and decode for read-only consumers such as the validator.
/// Undecodable bytes become U+FFFD.
pub fn decode_lossy(bytes: &[u8], gbk_threshold: f64) -> (EncodingTag, String) {
    let tag = detect_bytes(bytes, gbk_threshold);
    let text = match decode(bytes, tag) {
        Some(text) => text.into_owned(),
        None => String::from_utf8_lossy(bytes).into_owned(),
    };
    (tag, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gbk(text: &str) -> Vec<u8> {
        let (bytes, _, had_errors) = encoding_rs::GBK.encode(text);
        assert!(!had_errors);
        bytes.into_owned()
    }

    #[test]
    fn test_bom_wins_over_everything() {
        assert_eq!(detect_bytes(b"\xEF\xBB\xBF\\section{A}", 0.01), EncodingTag::Utf8Bom);
        assert_eq!(detect_bytes(b"\xFF\xFEa\x00", 0.01), EncodingTag::Utf16Le);
        assert_eq!(detect_bytes(b"\xFE\xFF\x00a", 0.01), EncodingTag::Utf16Be);
    }

    #[test]
    fn test_utf8_including_cjk() {
        assert_eq!(detect_bytes(b"", 0.01), EncodingTag::Utf8);
        assert_eq!(detect_bytes("\\title{中文}".as_bytes(), 0.01), EncodingTag::Utf8);
    }

    #[test]
    fn test_gbk_document_exceeds_threshold() {
        let mut bytes = b"\\documentclass{ctexart}\n\\begin{document}\n".to_vec();
        bytes.extend(gbk("这是一个中文文档。"));
        bytes.extend(b"\n\\end{document}\n");

        assert_eq!(detect_bytes(&bytes, DEFAULT_GBK_PAIR_THRESHOLD), EncodingTag::Gbk);
        let text = decode(&bytes, EncodingTag::Gbk).unwrap();
        assert!(text.contains("这是一个中文文档"));
    }

    #[test]
    fn test_single_latin1_byte_in_long_ascii_stays_below_threshold() {
        // 0xE9 followed by an ASCII letter looks like a GBK pair, but one
        // pair in several hundred bytes is noise.
        let mut bytes = "x".repeat(300).into_bytes();
        bytes.extend(b"r\xE9sum\xE9 ");
        bytes.extend("y".repeat(300).into_bytes());

        assert_eq!(detect_bytes(&bytes, DEFAULT_GBK_PAIR_THRESHOLD), EncodingTag::Unknown);
        // A looser threshold flips the decision.
        assert_eq!(detect_bytes(&bytes, 0.0), EncodingTag::Gbk);
    }

    #[test]
    fn test_decode_strips_bom() {
        assert_eq!(decode(b"\xEF\xBB\xBFabc", EncodingTag::Utf8Bom).unwrap(), "abc");
        assert_eq!(decode(b"\xFF\xFEa\x00b\x00", EncodingTag::Utf16Le).unwrap(), "ab");
        assert_eq!(decode(b"\xFE\xFF\x00a\x00b", EncodingTag::Utf16Be).unwrap(), "ab");
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert!(decode(b"\xFF\xFEa", EncodingTag::Utf16Le).is_none());
        assert!(decode(b"\xC3", EncodingTag::Utf8).is_none());
    }

    #[test]
    fn test_decode_lossy_never_fails() {
        let (tag, text) = decode_lossy(b"\xFF\xFEa", 0.01);
        assert_eq!(tag, EncodingTag::Utf16Le);
        assert!(text.contains('\u{FFFD}'));
    }
}

//! Encoding detection and normalization to BOM-less UTF-8.

mod detect;
mod normalizer;

pub use detect::{decode, decode_lossy, detect_bytes, EncodingTag, DEFAULT_GBK_PAIR_THRESHOLD};
pub use normalizer::{EncodingNormalizer, EncodingReport, NormalizeOutcome};

//! Octal permission values as written in configuration files.
//!
//! YAML loaders disagree on whether `0644` is octal, so strings are always
//! read as octal (`"0644"`, `"0o644"`, `"644"`) while integers are taken as
//! literal mode bits.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawMode {
    Bits(u32),
    Octal(String),
}

impl RawMode {
    pub(crate) fn resolve(&self) -> Result<u32, String> {
        match self {
            Self::Bits(bits) => Ok(*bits),
            Self::Octal(text) => parse_octal(text),
        }
    }
}

pub(crate) fn parse_octal(text: &str) -> Result<u32, String> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0o")
        .or_else(|| trimmed.strip_prefix("0O"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(format!("'{text}' is not an octal mode"));
    }
    u32::from_str_radix(digits, 8).map_err(|_| format!("'{text}' is not an octal mode"))
}

/// Formats mode bits the way operators write them (`0644`).
pub(crate) fn format_octal(bits: u32) -> String {
    format!("0{bits:03o}")
}

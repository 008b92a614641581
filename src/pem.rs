use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::base64::{Base64, DecodeError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PemError {
    #[error("PEM document is too short")]
    TooShort,
    #[error("Invalid PEM fence: {0}")]
    InvalidFence(String),
    #[error("Invalid PEM body line: {0}")]
    InvalidBody(String),
    #[error("Base64 decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Invalid certificate pattern: {0}")]
    Pattern(String),
}

type Result<T> = std::result::Result<T, PemError>;

const LINE_WIDTH: usize = 64;

/// 將單一 PEM 區塊轉為 DER。
///
/// 需要至少三行非空白內容，首尾行必須是 `-----...-----` 形式的標頭與結尾，
/// 中間每一行只能包含 Base64 字元。
///
/// # Errors
///
/// 格式不符時回傳 [`PemError`]。
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let lines: Vec<&str> = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.len() < 3 {
        return Err(PemError::TooShort);
    }

    let first = lines[0];
    let last = lines[lines.len() - 1];
    for fence in [first, last] {
        if !is_fence(fence) {
            return Err(PemError::InvalidFence(fence.to_string()));
        }
    }

    let body_lines = &lines[1..lines.len() - 1];
    let mut body = String::new();
    for line in body_lines {
        if !line
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'+' | b'/' | b'='))
        {
            return Err(PemError::InvalidBody((*line).to_string()));
        }
        body.push_str(line);
    }

    Ok(Base64::from_encoded(&body)?.decode()?)
}

/// 將 DER 以指定標籤包成 PEM，每行 64 字元。
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let encoded = Base64::new(der);
    let mut pem = format!("-----BEGIN {label}-----\n");
    for chunk in encoded.as_str().as_bytes().chunks(LINE_WIDTH) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}

/// 依文件順序擷取所有 `CERTIFICATE` 區塊。
pub fn certificate_blocks(text: &str) -> Result<Vec<String>> {
    Ok(certificate_pattern()?
        .find_iter(text)
        .map(|m| format!("{}\n", m.as_str().trim()))
        .collect())
}

fn is_fence(line: &str) -> bool {
    line.len() > 2 && line.starts_with('-') && line.ends_with('-')
}

fn certificate_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?s)-+[ \t]*BEGIN CERTIFICATE[ \t]*-+\s+[A-Za-z0-9+/=\s]+?\s*-+[ \t]*END CERTIFICATE[ \t]*-+",
            )
        })
        .as_ref()
        .map_err(|e| PemError::Pattern(e.to_string()))
}

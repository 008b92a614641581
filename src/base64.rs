use openssl::base64::{decode_block, encode_block};
use thiserror::Error;

/// Base64 編碼與解碼過程中的錯誤類型。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// 遇到不屬於字母表的字元，包含該字元的 ASCII 值。
    #[error("Invalid character: {0}")]
    InvalidCharacter(u8),

    /// 填充（`=`）位置或數量不正確。
    #[error("Invalid padding")]
    InvalidPadding,

    /// 長度不可能對應任何合法的編碼結果。
    #[error("Invalid length")]
    InvalidLength,

    /// 底層解碼失敗。
    #[error("Malformed base64 input")]
    Malformed,
}

type Result<T> = std::result::Result<T, DecodeError>;

/// 以標準 Base64 形式保存的已編碼資料。
///
/// ACME 所有欄位都使用 base64url（無填充），因此通常透過 [`Base64::base64_url`] 取得輸出，
/// 並以 [`Base64::from_url`] 讀入伺服器或金鑰提供的資料。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    encoded: String,
}

impl Base64 {
    /// 將任意位元組編碼為標準 Base64。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        Self {
            encoded: encode_block(input.as_ref()),
        }
    }

    /// 從標準 Base64 字串建立實例，會先檢查字母表與填充。
    ///
    /// # Errors
    ///
    /// 字串不是合法的標準 Base64 時回傳 [`DecodeError`]。
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        validate_standard(encoded)?;
        Ok(Self {
            encoded: encoded.to_string(),
        })
    }

    /// 從 base64url（允許省略填充）字串建立實例。
    ///
    /// 會把 `-_` 換回 `+/` 並補上 `=`，使後續可以用標準解碼流程處理。
    ///
    /// # Errors
    ///
    /// 含有非 base64url 字元或長度不合法時回傳 [`DecodeError`]。
    pub fn from_url(url_encoded: &str) -> Result<Self> {
        let trimmed = url_encoded.trim_end_matches('=');
        if trimmed.len() % 4 == 1 {
            return Err(DecodeError::InvalidLength);
        }

        let mut standard = String::with_capacity(trimmed.len() + 3);
        for byte in trimmed.bytes() {
            let mapped = match byte {
                b'-' => '+',
                b'_' => '/',
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => byte as char,
                other => return Err(DecodeError::InvalidCharacter(other)),
            };
            standard.push(mapped);
        }
        while standard.len() % 4 != 0 {
            standard.push('=');
        }

        Ok(Self { encoded: standard })
    }

    /// 取得原始位元組。
    pub fn decode(&self) -> Result<Vec<u8>> {
        decode_block(&self.encoded).map_err(|_| DecodeError::Malformed)
    }

    /// 回傳 base64url 形式（`+/` 轉為 `-_`，去除填充）。
    pub fn base64_url(&self) -> String {
        self.encoded
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl std::fmt::Display for Base64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// 將位元組編碼為 base64url。
pub fn b64url_encode<T: AsRef<[u8]>>(input: T) -> String {
    Base64::new(input).base64_url()
}

/// 將 base64url 字串解碼為位元組。
pub fn b64url_decode(input: &str) -> Result<Vec<u8>> {
    Base64::from_url(input)?.decode()
}

fn validate_standard(s: &str) -> Result<()> {
    if s.len() % 4 != 0 {
        return Err(DecodeError::InvalidLength);
    }

    let body = s.trim_end_matches('=');
    if s.len() - body.len() > 2 {
        return Err(DecodeError::InvalidPadding);
    }

    match body
        .bytes()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == b'+' || *c == b'/'))
    {
        Some(b'=') => Err(DecodeError::InvalidPadding),
        Some(other) => Err(DecodeError::InvalidCharacter(other)),
        None => Ok(()),
    }
}

use serde::Serialize;

use crate::{base64::Base64, jwk::Jwk};

/// 簽章請求如何指出帳戶金鑰。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyBinding {
    /// 內嵌完整公鑰，用於註冊帳戶或查詢既有帳戶。
    Jwk(Jwk),
    /// 以帳戶 URL 作為金鑰識別碼，用於其他所有已驗證請求。
    Kid(String),
}

/// JWS 保護頭。
///
/// `url` 綁定簽章的目的地，`nonce` 防止重放。
/// EAB 與金鑰輪替的內層 JWS 不帶 nonce。
#[derive(Debug, Clone, Serialize)]
pub struct ProtectedHeader {
    alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl ProtectedHeader {
    pub fn new(alg: impl Into<String>, url: impl Into<String>, binding: KeyBinding) -> Self {
        let (jwk, kid) = match binding {
            KeyBinding::Jwk(jwk) => (Some(jwk), None),
            KeyBinding::Kid(kid) => (None, Some(kid)),
        };
        Self {
            alg: alg.into(),
            nonce: None,
            url: url.into(),
            jwk,
            kid,
        }
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 序列化後以 Base64 編碼。
    ///
    /// # Errors
    ///
    /// 序列化失敗時回傳 [`serde_json::Error`]。
    pub fn to_base64(&self) -> Result<Base64, serde_json::Error> {
        Ok(Base64::new(serde_json::to_string(self)?))
    }
}

impl std::fmt::Display for ProtectedHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        serde_json::to_string(self)
            .map_err(|_| std::fmt::Error)
            .and_then(|s| write!(f, "{}", s))
    }
}

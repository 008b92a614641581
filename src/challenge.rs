use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use openssl::sha::sha256;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    account::Account,
    base64::b64url_encode,
    entity::{parse_body, present, Entity},
    error::{AcmeError, Error, Result},
    payload::{ChallengeValidationPayload, PayloadT},
};

pub const HTTP_CHALLENGE_PATH: &str = "/.well-known/acme-challenge/";
pub const DNS_RECORD_PREFIX: &str = "_acme-challenge";

/// 表示 ACME 挑戰的類型，可用於選擇相應的驗證策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
}

impl ChallengeType {
    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

impl FromStr for ChallengeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http-01" => Ok(Self::Http01),
            "dns-01" => Ok(Self::Dns01),
            "tls-alpn-01" => Ok(Self::TlsAlpn01),
            other => Err(Error::InvalidArgument(format!(
                "Unsupported challenge type: {other}"
            ))),
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 由挑戰 token 與帳戶金鑰指紋推導出的驗證資料，不存在伺服器端。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationData {
    pub token: String,
    /// `token.thumbprint`
    pub key_authorization: String,
}

impl VerificationData {
    pub fn new(token: &str, thumbprint: &str) -> Self {
        Self {
            token: token.to_string(),
            key_authorization: format!("{token}.{thumbprint}"),
        }
    }

    /// HTTP-01 檔案路徑。
    pub fn http_path(&self) -> String {
        format!("{HTTP_CHALLENGE_PATH}{}", self.token)
    }

    /// HTTP-01 檔案內容。
    pub fn http_content(&self) -> &str {
        &self.key_authorization
    }

    /// DNS-01 TXT 記錄值：`base64url(sha256(keyAuthorization))`。
    pub fn dns_txt_value(&self) -> String {
        b64url_encode(sha256(self.key_authorization.as_bytes()))
    }

    /// DNS-01 記錄名稱，萬用字元網域會去掉 `*.`。
    pub fn dns_record_name(domain: &str) -> String {
        let domain = domain.strip_prefix("*.").unwrap_or(domain);
        format!("{DNS_RECORD_PREFIX}.{domain}")
    }

    /// TLS-ALPN-01 驗證證書中 `acmeIdentifier` 擴展的內容。
    pub fn tls_alpn_digest(&self) -> [u8; 32] {
        sha256(self.key_authorization.as_bytes())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChallengeBody {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    token: Option<String>,
    validated: Option<DateTime<Utc>>,
    error: Option<Map<String, Value>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// ACME 挑戰：驗證一個識別項控制權的其中一種方式。
#[derive(Debug, Clone)]
pub struct Challenge {
    url: String,
    body: ChallengeBody,
    raw: Map<String, Value>,
}

impl Challenge {
    pub(crate) fn from_raw(url: String, raw: Map<String, Value>) -> Result<Self> {
        let body = parse_body(Self::KIND, &raw)?;
        Ok(Self { url, body, raw })
    }

    /// 伺服器回傳的類型字串，可能是本 crate 不認識的類型。
    pub fn kind(&self) -> &str {
        &self.body.kind
    }

    pub fn challenge_type(&self) -> Option<ChallengeType> {
        self.body.kind.parse().ok()
    }

    pub fn token(&self) -> Result<&str> {
        present(Self::KIND, "token", self.body.token.as_deref())
    }

    pub fn validated(&self) -> Result<DateTime<Utc>> {
        present(Self::KIND, "validated", self.body.validated.as_ref()).copied()
    }

    /// 驗證失敗時伺服器附上的問題文件。
    pub fn error(&self) -> Result<AcmeError> {
        let raw = present(Self::KIND, "error", self.body.error.as_ref())?;
        AcmeError::from_raw(raw.clone(), None)
            .ok_or_else(|| Error::malformed("Challenge error has no type"))
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.body.extra
    }

    pub fn verification_data(&self, account: &Account) -> Result<VerificationData> {
        Ok(VerificationData::new(self.token()?, &account.thumbprint()?))
    }

    /// 通知伺服器開始驗證。
    ///
    /// 送出 `{}`，回應成為新的挑戰狀態；通常仍是 `pending` 或 `processing`，
    /// 實際驗證由伺服器非同步進行。
    pub fn validate(&mut self, account: &Account) -> Result<()> {
        let payload = ChallengeValidationPayload::default().to_value()?;
        let reply = account.signed(&self.url, Some(&payload), true)?;
        self.refresh_with(reply.into_json()?)
    }

    pub fn refresh(&mut self, account: &Account) -> Result<()> {
        let raw = account.post_as_get(&self.url)?;
        self.refresh_with(raw)
    }

    pub fn refresh_with(&mut self, raw: Map<String, Value>) -> Result<()> {
        self.body = parse_body(Self::KIND, &raw)?;
        self.raw = raw;
        Ok(())
    }
}

impl Entity for Challenge {
    const KIND: &'static str = "Challenge";

    fn url(&self) -> &str {
        &self.url
    }

    fn status(&self) -> &str {
        &self.body.status
    }

    fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

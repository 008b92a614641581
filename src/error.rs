use std::{fmt, time::Duration};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    base64::DecodeError, certificate::CertificateError, csr::CsrError, jwk::JwkError,
    jws::JwsError, key_pair::KeyError, payload::Identifier, pem::PemError,
    signature::SignatureError, transport::TransportError,
};

const ERROR_NAMESPACE: &str = "urn:ietf:params:acme:error:";

/// 協定引擎對外回報的錯誤。
///
/// - [`Error::Transport`]：HTTP 交換本身失敗。
/// - [`Error::MalformedResponse`]：HTTP 成功但內容無法解析或缺少必要欄位。
/// - [`Error::Acme`]：伺服器回傳的問題文件（RFC 7807）。
/// - [`Error::AttributeMissing`]：實體本身合法，但呼叫端要求的可選屬性不存在。
/// - [`Error::Timeout`]：輪詢超過截止時間。
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Unexpected response from ACME server: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    Acme(#[from] AcmeError),
    #[error("{kind} has no `{name}` attribute")]
    AttributeMissing { kind: &'static str, name: String },
    #[error("Timed out after {waited:?} while waiting for order to leave `{status}`")]
    Timeout { waited: Duration, status: String },
    #[error("Order is `{status}`{}", .error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    OrderFailed {
        status: String,
        error: Option<AcmeError>,
    },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No `{method}` challenge offered for `{identifier}`")]
    ChallengeNotOffered { identifier: String, method: String },
    #[error("No directory item `{0}`")]
    MissingDirectoryItem(String),
    #[error("Multiple `{0}` headers in response")]
    AmbiguousHeader(String),
    #[error("Failed to acquire nonce: {0}")]
    NonceUnavailable(String),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("PEM error: {0}")]
    Pem(#[from] PemError),
    #[error("Base64 error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn attribute_missing(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AttributeMissing {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// 若為協定錯誤則回傳其內容。
    pub fn as_acme(&self) -> Option<&AcmeError> {
        match self {
            Self::Acme(problem) => Some(problem),
            _ => None,
        }
    }
}

/// ACME 問題文件。
///
/// 多網域訂單的部分失敗會以 `subproblems` 表達，每個子問題通常綁定一個識別碼。
#[derive(Debug, Clone, PartialEq)]
pub struct AcmeError {
    pub error_type: String,
    pub detail: Option<String>,
    pub http_code: Option<u16>,
    pub identifier: Option<Identifier>,
    pub subproblems: Vec<AcmeError>,
    pub raw: Map<String, Value>,
}

impl AcmeError {
    /// 從原始 JSON 建立問題物件，`type` 缺失或不是字串時回傳 `None`。
    ///
    /// 子問題沒有自己的狀態碼，會沿用外層的 `http_code`；缺少 `type` 的子問題會被略過。
    pub fn from_raw(raw: Map<String, Value>, http_code: Option<u16>) -> Option<Self> {
        let error_type = raw.get("type")?.as_str()?.to_string();
        let detail = raw
            .get("detail")
            .and_then(Value::as_str)
            .filter(|detail| !detail.is_empty())
            .map(ToString::to_string);
        let identifier = raw
            .get("identifier")
            .and_then(|value| serde_json::from_value(value.clone()).ok());
        let subproblems = match raw.get("subproblems") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Self::from_raw(map.clone(), http_code),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        Some(Self {
            error_type,
            detail,
            http_code,
            identifier,
            subproblems,
            raw,
        })
    }

    /// 去除 `urn:ietf:params:acme:error:` 前綴後的錯誤名稱，例如 `badNonce`。
    pub fn kind(&self) -> &str {
        self.error_type
            .strip_prefix(ERROR_NAMESPACE)
            .unwrap_or(&self.error_type)
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.kind() == "badNonce"
    }
}

impl fmt::Display for AcmeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "ACME error: {detail}")?,
            None => write!(f, "ACME error, type={}", self.error_type)?,
        }
        if let Some(code) = self.http_code {
            write!(f, ", httpCode={code}")?;
        }
        if !self.subproblems.is_empty() {
            write!(f, ", {} subproblems", self.subproblems.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for AcmeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_subproblems_are_nested() {
        let problem = AcmeError::from_raw(
            raw(json!({
                "type": "urn:ietf:params:acme:error:rejectedIdentifier",
                "detail": "some identifiers were rejected",
                "subproblems": [
                    {"type": "A", "identifier": {"type": "dns", "value": "a.example"}},
                    {"type": "B"},
                    {"detail": "no type, skipped"}
                ]
            })),
            Some(400),
        );

        let Some(problem) = problem else {
            panic!("problem document should parse");
        };
        assert_eq!(problem.kind(), "rejectedIdentifier");
        assert_eq!(problem.subproblems.len(), 2);
        assert_eq!(problem.subproblems[0].error_type, "A");
        assert_eq!(problem.subproblems[1].error_type, "B");
        assert_eq!(problem.subproblems[1].http_code, Some(400));
        assert_eq!(
            problem.subproblems[0].identifier,
            Some(Identifier::dns("a.example"))
        );
    }

    #[test]
    fn test_missing_type_is_not_a_problem() {
        assert!(AcmeError::from_raw(raw(json!({"detail": "x"})), None).is_none());
        assert!(AcmeError::from_raw(raw(json!({"type": 5})), None).is_none());
    }

    #[test]
    fn test_display_and_bad_nonce() {
        let Some(problem) = AcmeError::from_raw(
            raw(json!({"type": "urn:ietf:params:acme:error:badNonce", "detail": "stale"})),
            Some(400),
        ) else {
            panic!("problem document should parse");
        };
        assert!(problem.is_bad_nonce());
        assert_eq!(problem.to_string(), "ACME error: stale, httpCode=400");

        let Some(bare) = AcmeError::from_raw(raw(json!({"type": "about:blank"})), None) else {
            panic!("problem document should parse");
        };
        assert!(!bare.is_bad_nonce());
        assert_eq!(bare.to_string(), "ACME error, type=about:blank");
    }
}

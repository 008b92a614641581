use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    base64::b64url_encode,
    error::{Error, Result},
    jwk::Jwk,
};

/// 所有送往 ACME 伺服器的載荷（Payload）共用的行為。
pub trait PayloadT: Serialize {
    /// 序列化為 JSON 值，可直接交給簽章流程。
    fn to_value(&self) -> Result<Value> {
        self.validate()?;
        Ok(serde_json::to_value(self)?)
    }

    /// 檢查載荷是否可以送出。
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// 識別項，描述一個訂單或授權涵蓋的主機名稱。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub const TYPE_DNS: &'static str = "dns";

    pub fn dns(value: impl Into<String>) -> Self {
        Self {
            type_: Self::TYPE_DNS.to_string(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// 建立新帳號或查詢既有帳號時的載荷。
#[derive(Debug, Default, Serialize)]
pub struct NewAccountPayload {
    #[serde(rename = "termsOfServiceAgreed", skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
    #[serde(rename = "onlyReturnExisting", skip_serializing_if = "std::ops::Not::not")]
    pub only_return_existing: bool,
    #[serde(
        rename = "externalAccountBinding",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_account_binding: Option<Value>,
}

impl NewAccountPayload {
    /// 查詢既有帳號用的載荷，只帶 `onlyReturnExisting`。
    pub fn only_existing() -> Self {
        Self {
            only_return_existing: true,
            ..Self::default()
        }
    }
}

impl PayloadT for NewAccountPayload {}

/// 將聯絡資訊補上 `mailto:` 前綴；已有 URI scheme 的值不變。
pub fn normalize_contact(contact: &str) -> String {
    if contact.contains(':') {
        contact.to_string()
    } else {
        format!("mailto:{contact}")
    }
}

/// 更新帳號聯絡資訊。
#[derive(Debug, Serialize)]
pub struct ContactPayload {
    pub contact: Vec<String>,
}

impl PayloadT for ContactPayload {}

/// 停用帳號或授權時送出的 `{"status":"deactivated"}`。
#[derive(Debug, Serialize)]
pub struct DeactivationPayload {
    status: &'static str,
}

impl Default for DeactivationPayload {
    fn default() -> Self {
        Self {
            status: "deactivated",
        }
    }
}

impl PayloadT for DeactivationPayload {}

/// 建立新訂單時的載荷。
#[derive(Debug, Serialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
    #[serde(rename = "notBefore", skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(rename = "notAfter", skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,
}

impl NewOrderPayload {
    /// `not_before`、`not_after` 以 RFC 3339 格式送出。
    pub fn new(
        identifiers: Vec<Identifier>,
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> Self {
        let format = |time: DateTime<Utc>| time.to_rfc3339_opts(SecondsFormat::Secs, true);
        Self {
            identifiers,
            not_before: not_before.map(format),
            not_after: not_after.map(format),
        }
    }
}

impl PayloadT for NewOrderPayload {
    fn validate(&self) -> Result<()> {
        if self.identifiers.is_empty() {
            return Err(Error::InvalidArgument(
                "An order needs at least one identifier".to_string(),
            ));
        }
        if let Some(empty) = self.identifiers.iter().find(|id| id.value.is_empty()) {
            return Err(Error::InvalidArgument(format!(
                "Identifier of type `{}` has an empty value",
                empty.type_
            )));
        }
        Ok(())
    }
}

/// 觸發挑戰驗證時送出的空物件 `{}`，與 POST-as-GET 的空字串不同。
#[derive(Debug, Default, Serialize)]
pub struct ChallengeValidationPayload {}

impl PayloadT for ChallengeValidationPayload {}

/// 送出 CSR 以完成訂單。
#[derive(Debug, Serialize)]
pub struct FinalizeOrderPayload {
    csr: String,
}

impl FinalizeOrderPayload {
    /// `csr_der` 為 DER 格式，會轉為 base64url。
    pub fn new(csr_der: &[u8]) -> Self {
        Self {
            csr: b64url_encode(csr_der),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {}

/// RFC 5280 定義的撤銷原因，代碼 7 未被使用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevocationReason {
    #[default]
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    pub fn code(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::KeyCompromise => 1,
            Self::CaCompromise => 2,
            Self::AffiliationChanged => 3,
            Self::Superseded => 4,
            Self::CessationOfOperation => 5,
            Self::CertificateHold => 6,
            Self::RemoveFromCrl => 8,
            Self::PrivilegeWithdrawn => 9,
            Self::AaCompromise => 10,
        }
    }

    /// 由數字代碼取得撤銷原因。
    ///
    /// # Errors
    ///
    /// 代碼 7 或大於 10 時回傳 [`Error::InvalidArgument`]。
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Unspecified,
            1 => Self::KeyCompromise,
            2 => Self::CaCompromise,
            3 => Self::AffiliationChanged,
            4 => Self::Superseded,
            5 => Self::CessationOfOperation,
            6 => Self::CertificateHold,
            8 => Self::RemoveFromCrl,
            9 => Self::PrivilegeWithdrawn,
            10 => Self::AaCompromise,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "Invalid revocation reason code: {other}"
                )))
            }
        })
    }
}

/// 撤銷證書的載荷，原因為 `Unspecified` 時省略 `reason` 欄位。
#[derive(Debug, Serialize)]
pub struct RevocationPayload {
    certificate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<u8>,
}

impl RevocationPayload {
    pub fn new(certificate_der: &[u8], reason: RevocationReason) -> Self {
        Self {
            certificate: b64url_encode(certificate_der),
            reason: match reason {
                RevocationReason::Unspecified => None,
                other => Some(other.code()),
            },
        }
    }
}

impl PayloadT for RevocationPayload {}

/// 金鑰輪替時內層 JWS 的載荷。
#[derive(Debug, Serialize)]
pub struct KeyChangePayload {
    pub account: String,
    #[serde(rename = "oldKey")]
    pub old_key: Jwk,
}

impl PayloadT for KeyChangePayload {}

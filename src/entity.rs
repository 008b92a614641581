use std::{fmt, str::FromStr};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// 伺服器端資源的狀態值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Deactivated => "deactivated",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    /// 進入後不會再改變的狀態。
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Valid | Self::Invalid | Self::Deactivated | Self::Expired | Self::Revoked
        )
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "processing" => Ok(Self::Processing),
            "valid" => Ok(Self::Valid),
            "invalid" => Ok(Self::Invalid),
            "deactivated" => Ok(Self::Deactivated),
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            other => Err(Error::malformed(format!("Unknown status `{other}`"))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 帳戶、訂單、授權與挑戰共用的實體介面。
///
/// 每個實體都有固定不變的 `url`、必填的 `status` 與原始屬性。
/// 建立與刷新時就會驗證必填欄位，因此存取可選屬性時若不存在，
/// 回傳的是 [`Error::AttributeMissing`] 而不是格式錯誤。
pub trait Entity {
    /// 實體種類名稱，用於錯誤訊息。
    const KIND: &'static str;

    fn url(&self) -> &str;

    fn status(&self) -> &str;

    /// 伺服器回傳的完整 JSON 物件。
    fn raw(&self) -> &Map<String, Value>;

    /// 已知的狀態值；伺服器回傳未知狀態時為 `None`。
    fn state(&self) -> Option<Status> {
        self.status().parse().ok()
    }

    fn has_attribute(&self, name: &str) -> bool {
        self.raw().get(name).is_some_and(|value| !value.is_null())
    }

    /// # Errors
    ///
    /// 屬性不存在或為 `null` 時回傳 [`Error::AttributeMissing`]。
    fn attribute(&self, name: &str) -> Result<&Value> {
        self.raw()
            .get(name)
            .filter(|value| !value.is_null())
            .ok_or_else(|| Error::attribute_missing(Self::KIND, name))
    }
}

/// 驗證並解析實體內容：`status` 必須是字串，其餘必填欄位交給型別本身。
pub(crate) fn parse_body<B: DeserializeOwned>(kind: &str, raw: &Map<String, Value>) -> Result<B> {
    match raw.get("status") {
        Some(Value::String(_)) => {}
        Some(other) => {
            return Err(Error::malformed(format!(
                "{kind} status is not a string: {other}"
            )))
        }
        None => return Err(Error::malformed(format!("{kind} object has no status"))),
    }

    serde_json::from_value(Value::Object(raw.clone()))
        .map_err(|e| Error::malformed(format!("Invalid {kind} object: {e}")))
}

/// 可選屬性的取值輔助。
pub(crate) fn present<'a, T: ?Sized>(
    kind: &'static str,
    name: &str,
    value: Option<&'a T>,
) -> Result<&'a T> {
    value.ok_or_else(|| Error::attribute_missing(kind, name))
}

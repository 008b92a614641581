use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Let's Encrypt 正式環境的目錄 URL。
pub const LETSENCRYPT_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt 測試環境的目錄 URL。
pub const LETSENCRYPT_STAGING_DIRECTORY: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

pub const NEW_NONCE: &str = "newNonce";
pub const NEW_ACCOUNT: &str = "newAccount";
pub const NEW_ORDER: &str = "newOrder";
pub const REVOKE_CERT: &str = "revokeCert";
pub const KEY_CHANGE: &str = "keyChange";

/// CA 的服務目錄：服務名稱對應絕對 URL，另可附帶 `meta`。
///
/// 目錄在同一個工作階段內只取得一次，之後只能透過明確替換更新。
#[derive(Debug, Clone, PartialEq)]
pub struct Directory {
    raw: Map<String, Value>,
}

impl Directory {
    /// 從伺服器回應的 JSON 建立目錄。
    ///
    /// # Errors
    ///
    /// 內容不是 JSON 物件時回傳 [`Error::MalformedResponse`]。
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(raw) => Ok(Self { raw }),
            other => Err(Error::malformed(format!(
                "Directory is not a JSON object: {other}"
            ))),
        }
    }

    /// 查詢服務 URL。
    ///
    /// # Errors
    ///
    /// - 目錄沒有該服務時回傳 [`Error::MissingDirectoryItem`]。
    /// - 值不是字串時回傳 [`Error::MalformedResponse`]。
    pub fn item(&self, name: &str) -> Result<&str> {
        match self.raw.get(name) {
            None | Some(Value::Null) => Err(Error::MissingDirectoryItem(name.to_string())),
            Some(Value::String(url)) if !url.is_empty() => Ok(url),
            Some(other) => Err(Error::malformed(format!(
                "Directory item `{name}` is not a URL: {other}"
            ))),
        }
    }

    /// 查詢服務 URL，沒有時回傳 `default`。
    pub fn item_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.item(name).unwrap_or(default)
    }

    pub fn meta(&self) -> Option<&Map<String, Value>> {
        self.raw.get("meta").and_then(Value::as_object)
    }

    pub fn terms_of_service(&self) -> Option<&str> {
        self.meta()
            .and_then(|meta| meta.get("termsOfService"))
            .and_then(Value::as_str)
    }

    /// CA 是否要求 External Account Binding。
    ///
    /// RFC 8555 把旗標放在 `meta` 中，部分舊伺服器放在最上層，兩處都會檢查。
    pub fn external_account_required(&self) -> bool {
        self.meta()
            .and_then(|meta| meta.get("externalAccountRequired"))
            .or_else(|| self.raw.get("externalAccountRequired"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Result<Directory> {
        Directory::from_value(json!({
            "newNonce": "https://acme.test/new-nonce",
            "newAccount": "https://acme.test/new-acct",
            "newOrder": "https://acme.test/new-order",
            "revokeCert": "https://acme.test/revoke-cert",
            "keyChange": "https://acme.test/key-change",
            "renewalInfo": null,
            "meta": {
                "termsOfService": "https://acme.test/terms",
                "externalAccountRequired": true
            }
        }))
    }

    #[test]
    fn test_items() -> Result<()> {
        let directory = sample()?;
        assert_eq!(directory.item(NEW_ORDER)?, "https://acme.test/new-order");
        assert!(matches!(
            directory.item("newAuthz"),
            Err(Error::MissingDirectoryItem(name)) if name == "newAuthz"
        ));
        assert!(matches!(
            directory.item("renewalInfo"),
            Err(Error::MissingDirectoryItem(_))
        ));
        assert!(matches!(directory.item("meta"), Err(Error::MalformedResponse(_))));
        assert_eq!(directory.item_or("newAuthz", "fallback"), "fallback");
        Ok(())
    }

    #[test]
    fn test_meta() -> Result<()> {
        let directory = sample()?;
        assert!(directory.external_account_required());
        assert_eq!(directory.terms_of_service(), Some("https://acme.test/terms"));

        let legacy = Directory::from_value(json!({"externalAccountRequired": true}))?;
        assert!(legacy.external_account_required());

        let plain = Directory::from_value(json!({"newNonce": "https://acme.test/n"}))?;
        assert!(!plain.external_account_required());
        Ok(())
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(matches!(
            Directory::from_value(json!(["newNonce"])),
            Err(Error::MalformedResponse(_))
        ));
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    base64::{b64url_encode, Base64},
    jwk::Jwk,
    protection::{KeyBinding, ProtectedHeader},
    signature::{SignatureError, Signer},
};

#[derive(Debug, Error)]
pub enum JwsError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
}

type Result<T> = std::result::Result<T, JwsError>;

/// Flattened JWS：`{"protected", "payload", "signature"}`，三者皆為 base64url。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

impl Jws {
    /// 以 `signer` 簽署保護頭與載荷。
    ///
    /// `payload` 為 `None` 時輸出空字串（POST-as-GET），與 `{}` 不同。
    ///
    /// # Errors
    ///
    /// 序列化或簽章失敗時回傳 [`JwsError`]。
    pub fn sign(
        header: &ProtectedHeader,
        payload: Option<&Value>,
        signer: &dyn Signer,
    ) -> Result<Self> {
        let protected = header.to_base64()?.base64_url();
        let payload = match payload {
            Some(value) => Base64::new(serde_json::to_string(value)?).base64_url(),
            None => String::new(),
        };
        let signing_input = format!("{protected}.{payload}");
        let signature = b64url_encode(signer.sign(signing_input.as_bytes())?);

        Ok(Self {
            protected,
            payload,
            signature,
        })
    }

    /// External Account Binding 的內層 JWS。
    ///
    /// 以 CA 核發的 HMAC 金鑰簽署帳戶公鑰，保護頭為 `{alg, kid, url}`，不帶 nonce。
    pub fn external_account_binding(
        eab_kid: &str,
        mac: &dyn Signer,
        account_jwk: &Jwk,
        url: &str,
    ) -> Result<Self> {
        let header = ProtectedHeader::new(mac.alg(), url, KeyBinding::Kid(eab_kid.to_string()));
        Self::sign(&header, Some(&serde_json::to_value(account_jwk)?), mac)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

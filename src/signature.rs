use openssl::{
    ecdsa::EcdsaSig,
    error::ErrorStack,
    hash::MessageDigest,
    pkey::{Id, PKey, Private},
    sign::Signer as OpenSslSigner,
};
use thiserror::Error;

use crate::{
    base64::b64url_encode,
    jwk::{Jwk, JwkError},
    key_pair::{KeyAlgorithm, KeyError, KeyPair},
};

/// 簽章過程中可能遇到的錯誤。
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

type Result<T> = std::result::Result<T, SignatureError>;

/// 簽章能力。
///
/// JWS 只需要演算法名稱與對 `protected.payload` 的簽章結果，
/// 實作可以是本機金鑰，也可以是硬體模組或遠端服務。
pub trait Signer {
    /// JWS `alg` 欄位，例如 `RS256`、`ES256`、`HS256`。
    fn alg(&self) -> &str;

    /// 對輸入進行簽章，回傳 JWS 所需的原始簽章位元組。
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// 帳戶金鑰：非對稱簽章能力，另外提供公鑰 JWK 與指紋。
pub trait AccountKey: Signer {
    fn jwk(&self) -> Result<Jwk>;

    /// 指紋的 base64url 形式。
    fn thumbprint(&self) -> Result<String> {
        Ok(b64url_encode(self.jwk()?.thumbprint()))
    }

    /// 以 PEM 匯出私鑰，供呼叫端自行保存。
    fn export_pem(&self) -> Result<String> {
        Err(KeyError::NotExportable.into())
    }
}

/// RS256 簽章器。
#[derive(Debug, Clone)]
pub struct RsaSigner {
    key: KeyPair,
}

impl RsaSigner {
    pub fn new(key: KeyPair) -> Result<Self> {
        match key.pri_key.id() {
            Id::RSA => Ok(Self { key }),
            other => Err(SignatureError::UnsupportedAlgorithm(format!(
                "RS256 with {other:?} key"
            ))),
        }
    }
}

impl Signer for RsaSigner {
    fn alg(&self) -> &str {
        "RS256"
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut signer = OpenSslSigner::new(MessageDigest::sha256(), &self.key.pri_key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

impl AccountKey for RsaSigner {
    fn jwk(&self) -> Result<Jwk> {
        Ok(self.key.jwk()?)
    }

    fn export_pem(&self) -> Result<String> {
        Ok(self.key.private_key_pem()?)
    }
}

/// ECDSA 簽章器，P-256 對應 ES256，P-384 對應 ES384。
///
/// OpenSSL 產出 DER 編碼的簽章，JWS 需要固定長度的 `r‖s`，這裡負責轉換。
#[derive(Debug, Clone)]
pub struct EcSigner {
    key: KeyPair,
    alg: &'static str,
    size: i32,
}

impl EcSigner {
    pub fn new(key: KeyPair) -> Result<Self> {
        let (alg, size) = match key.algorithm()? {
            KeyAlgorithm::EcP256 => ("ES256", 32),
            KeyAlgorithm::EcP384 => ("ES384", 48),
            other => {
                return Err(SignatureError::UnsupportedAlgorithm(format!(
                    "ECDSA with {other:?} key"
                )))
            }
        };
        Ok(Self { key, alg, size })
    }
}

impl Signer for EcSigner {
    fn alg(&self) -> &str {
        self.alg
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let digest = match self.size {
            48 => MessageDigest::sha384(),
            _ => MessageDigest::sha256(),
        };
        let mut signer = OpenSslSigner::new(digest, &self.key.pri_key)?;
        signer.update(data)?;
        let der = signer.sign_to_vec()?;

        let sig = EcdsaSig::from_der(&der)?;
        let mut raw = sig.r().to_vec_padded(self.size)?;
        raw.extend(sig.s().to_vec_padded(self.size)?);
        Ok(raw)
    }
}

impl AccountKey for EcSigner {
    fn jwk(&self) -> Result<Jwk> {
        Ok(self.key.jwk()?)
    }

    fn export_pem(&self) -> Result<String> {
        Ok(self.key.private_key_pem()?)
    }
}

/// HMAC 簽章器，用於 External Account Binding。
pub struct HmacSigner {
    key: PKey<Private>,
    alg: &'static str,
    digest: MessageDigest,
}

impl HmacSigner {
    /// `alg` 可為 `HS256`、`HS384` 或 `HS512`。
    pub fn new(secret: &[u8], alg: &str) -> Result<Self> {
        let (alg, digest) = match alg.to_uppercase().as_str() {
            "HS256" => ("HS256", MessageDigest::sha256()),
            "HS384" => ("HS384", MessageDigest::sha384()),
            "HS512" => ("HS512", MessageDigest::sha512()),
            other => return Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
        };
        Ok(Self {
            key: PKey::hmac(secret)?,
            alg,
            digest,
        })
    }
}

impl Signer for HmacSigner {
    fn alg(&self) -> &str {
        self.alg
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut signer = OpenSslSigner::new(self.digest, &self.key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

/// 依金鑰類型選擇簽章器：RSA 使用 RS256，EC 依曲線使用 ES256/ES384。
pub fn account_key(key: KeyPair) -> Result<Box<dyn AccountKey>> {
    match key.pri_key.id() {
        Id::RSA => Ok(Box::new(RsaSigner::new(key)?)),
        Id::EC => Ok(Box::new(EcSigner::new(key)?)),
        other => Err(SignatureError::UnsupportedAlgorithm(format!("{other:?}"))),
    }
}

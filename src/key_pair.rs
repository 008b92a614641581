use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
};
use thiserror::Error;

use crate::{
    base64::b64url_encode,
    jwk::{Jwk, JwkError},
    signature::{account_key, AccountKey, SignatureError},
};

/// 金鑰相關操作的錯誤列舉。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Private key cannot be exported")]
    NotExportable,
}

type Result<T> = std::result::Result<T, KeyError>;

/// 產生金鑰時可選的演算法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA，參數為位元長度。
    Rsa(u32),
    EcP256,
    EcP384,
}

impl KeyAlgorithm {
    /// 依名稱解析，例如 `"RSA"`、`"EC"`、`"P-384"`（不分大小寫）。
    ///
    /// `bits` 只對 RSA 有效，未提供時為 2048。
    pub fn from_name(name: &str, bits: Option<u32>) -> Result<Self> {
        match name.to_uppercase().as_str() {
            "RSA" => Ok(Self::Rsa(bits.unwrap_or(2048))),
            "EC" | "ECDSA" | "P-256" | "ES256" => Ok(Self::EcP256),
            "P-384" | "ES384" => Ok(Self::EcP384),
            other => Err(KeyError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// 一組非對稱金鑰。
///
/// 帳戶金鑰與 CSR 金鑰皆使用此結構，公鑰由私鑰派生。
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub pri_key: PKey<Private>,
    pub pub_key: PKey<Public>,
}

impl KeyPair {
    /// 產生新的金鑰對。
    ///
    /// # Errors
    ///
    /// OpenSSL 產生金鑰失敗時回傳 [`KeyError::OpenSSL`]。
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        let pri_key = match algorithm {
            KeyAlgorithm::Rsa(bits) => PKey::from_rsa(Rsa::generate(bits)?)?,
            KeyAlgorithm::EcP256 => Self::generate_ec(Nid::X9_62_PRIME256V1)?,
            KeyAlgorithm::EcP384 => Self::generate_ec(Nid::SECP384R1)?,
        };
        Self::from_private_key(pri_key)
    }

    fn generate_ec(curve: Nid) -> Result<PKey<Private>> {
        let group = EcGroup::from_curve_name(curve)?;
        Ok(PKey::from_ec_key(EcKey::generate(&group)?)?)
    }

    /// 從 PEM 格式的私鑰建立金鑰對，RSA、EC 與 PKCS#8 格式皆可。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        Self::from_private_key(PKey::private_key_from_pem(pri_key_pem)?)
    }

    pub fn from_private_key(pri_key: PKey<Private>) -> Result<Self> {
        match pri_key.id() {
            Id::RSA | Id::EC => {}
            other => return Err(KeyError::UnsupportedAlgorithm(format!("{other:?}"))),
        }
        let pub_key = PKey::public_key_from_der(&pri_key.public_key_to_der()?)?;
        Ok(Self { pri_key, pub_key })
    }

    pub fn algorithm(&self) -> Result<KeyAlgorithm> {
        match self.pri_key.id() {
            Id::RSA => Ok(KeyAlgorithm::Rsa(self.pri_key.bits())),
            Id::EC => match self.pri_key.ec_key()?.group().curve_name() {
                Some(Nid::X9_62_PRIME256V1) => Ok(KeyAlgorithm::EcP256),
                Some(Nid::SECP384R1) => Ok(KeyAlgorithm::EcP384),
                other => Err(KeyError::UnsupportedAlgorithm(format!("{other:?}"))),
            },
            other => Err(KeyError::UnsupportedAlgorithm(format!("{other:?}"))),
        }
    }

    /// 以 PKCS#8 PEM 匯出私鑰。
    pub fn private_key_pem(&self) -> Result<String> {
        let pem = self.pri_key.private_key_to_pem_pkcs8()?;
        Ok(String::from_utf8_lossy(&pem).into_owned())
    }

    pub fn public_key_pem(&self) -> Result<String> {
        let pem = self.pub_key.public_key_to_pem()?;
        Ok(String::from_utf8_lossy(&pem).into_owned())
    }

    pub fn jwk(&self) -> Result<Jwk> {
        Ok(Jwk::from_public_key(&self.pub_key)?)
    }

    /// 金鑰指紋的 base64url 形式，用於組成 keyAuthorization。
    pub fn thumbprint(&self) -> Result<String> {
        Ok(b64url_encode(self.jwk()?.thumbprint()))
    }

    /// 依金鑰類型轉為帳戶簽章器，見 [`account_key`]。
    pub fn into_account_key(self) -> std::result::Result<Box<dyn AccountKey>, SignatureError> {
        account_key(self)
    }
}

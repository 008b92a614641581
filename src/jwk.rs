use openssl::{
    bn::{BigNum, BigNumContext},
    error::ErrorStack,
    nid::Nid,
    pkey::{HasPublic, Id, PKeyRef},
    sha::sha256,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::base64::b64url_encode;

/// JWK 產生與序列化過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum JwkError {
    #[error("Unsupported key type: {0:?}")]
    UnsupportedKeyType(Id),
    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, JwkError>;

/// 帳戶公鑰的 JSON Web Key 表示。
///
/// 出現在 JWS 保護頭的 `jwk` 欄位、金鑰輪替的 `oldKey` 以及 EAB 載荷中。
/// 指紋計算不依賴 serde 的欄位順序，而是由 [`Jwk::thumbprint_input`] 明確組出。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
    #[serde(rename = "EC")]
    Ec(EcJwk),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    pub e: String,
    pub n: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub crv: String,
    pub x: String,
    pub y: String,
}

impl Jwk {
    /// 從任何含有公鑰的 OpenSSL 金鑰建立 JWK。
    ///
    /// # Errors
    ///
    /// 支援 RSA 與 P-256/P-384 曲線，其他類型回傳 [`JwkError`]。
    pub fn from_public_key<T: HasPublic>(key: &PKeyRef<T>) -> Result<Self> {
        match key.id() {
            Id::RSA => {
                let rsa = key.rsa()?;
                Ok(Self::Rsa(RsaJwk {
                    e: b64url_encode(rsa.e().to_vec()),
                    n: b64url_encode(rsa.n().to_vec()),
                }))
            }
            Id::EC => {
                let ec = key.ec_key()?;
                let group = ec.group();
                let (crv, size) = match group.curve_name() {
                    Some(Nid::X9_62_PRIME256V1) => ("P-256", 32),
                    Some(Nid::SECP384R1) => ("P-384", 48),
                    other => {
                        return Err(JwkError::UnsupportedCurve(format!("{other:?}")));
                    }
                };

                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec.public_key()
                    .affine_coordinates_gfp(group, &mut x, &mut y, &mut ctx)?;

                Ok(Self::Ec(EcJwk {
                    crv: crv.to_string(),
                    x: b64url_encode(x.to_vec_padded(size)?),
                    y: b64url_encode(y.to_vec_padded(size)?),
                }))
            }
            other => Err(JwkError::UnsupportedKeyType(other)),
        }
    }

    /// RFC 7638 定義的正規化字串：鍵名依字典序排列、無多餘空白。
    pub fn thumbprint_input(&self) -> String {
        match self {
            Self::Rsa(jwk) => format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, jwk.e, jwk.n),
            Self::Ec(jwk) => format!(
                r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
                jwk.crv, jwk.x, jwk.y
            ),
        }
    }

    /// 正規化字串的 SHA-256。
    pub fn thumbprint(&self) -> [u8; 32] {
        sha256(self.thumbprint_input().as_bytes())
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::{
        ec::{EcGroup, EcKey},
        pkey::PKey,
        rsa::Rsa,
    };

    #[test]
    fn test_rsa_thumbprint_input_order() -> Result<()> {
        let rsa = Rsa::generate(2048)?;
        let key = PKey::from_rsa(rsa)?;
        let jwk = Jwk::from_public_key(&key)?;

        let input = jwk.thumbprint_input();
        assert!(input.starts_with(r#"{"e":"AQAB","kty":"RSA","n":""#));
        assert!(!input.contains(' '));
        assert_eq!(jwk.thumbprint(), Jwk::from_public_key(&key)?.thumbprint());
        Ok(())
    }

    #[test]
    fn test_rfc7638_reference_thumbprint() {
        let jwk = Jwk::Rsa(RsaJwk {
            e: "AQAB".to_string(),
            n: "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw".to_string(),
        });
        assert_eq!(
            b64url_encode(jwk.thumbprint()),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }

    #[test]
    fn test_ec_jwk_coordinates() -> Result<()> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        let key = PKey::from_ec_key(EcKey::generate(&group)?)?;
        let Jwk::Ec(ec) = Jwk::from_public_key(&key)? else {
            panic!("expected an EC jwk");
        };

        assert_eq!(ec.crv, "P-256");
        assert_eq!(ec.x.len(), 43);
        assert_eq!(ec.y.len(), 43);
        Ok(())
    }

    #[test]
    fn test_serialized_jwk_has_kty() -> Result<()> {
        let jwk = Jwk::Ec(EcJwk {
            crv: "P-256".to_string(),
            x: "x".to_string(),
            y: "y".to_string(),
        });
        let value = jwk.to_value()?;
        assert_eq!(value["kty"], "EC");
        assert_eq!(value["crv"], "P-256");
        assert_eq!(
            jwk.thumbprint_input(),
            r#"{"crv":"P-256","kty":"EC","x":"x","y":"y"}"#
        );
        Ok(())
    }
}

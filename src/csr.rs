use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::{KeyAlgorithm, KeyError, KeyPair};

/// 建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] ErrorStack),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Common name is empty")]
    EmptyCommonName,
}

type Result<T> = std::result::Result<T, CsrError>;

/// CSR 的主體名稱。除了 CN 以外皆為可選。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    pub common_name: String,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub locality: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub email_address: Option<String>,
}

impl DistinguishedName {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            ..Self::default()
        }
    }

    pub fn organization(mut self, value: impl Into<String>) -> Self {
        self.organization = Some(value.into());
        self
    }

    pub fn organizational_unit(mut self, value: impl Into<String>) -> Self {
        self.organizational_unit = Some(value.into());
        self
    }

    pub fn locality(mut self, value: impl Into<String>) -> Self {
        self.locality = Some(value.into());
        self
    }

    pub fn state(mut self, value: impl Into<String>) -> Self {
        self.state = Some(value.into());
        self
    }

    pub fn country(mut self, value: impl Into<String>) -> Self {
        self.country = Some(value.into());
        self
    }

    pub fn email_address(mut self, value: impl Into<String>) -> Self {
        self.email_address = Some(value.into());
        self
    }

    fn entries(&self) -> Vec<(Nid, &str)> {
        let optional = [
            (Nid::ORGANIZATIONNAME, &self.organization),
            (Nid::ORGANIZATIONALUNITNAME, &self.organizational_unit),
            (Nid::LOCALITYNAME, &self.locality),
            (Nid::STATEORPROVINCENAME, &self.state),
            (Nid::COUNTRYNAME, &self.country),
            (Nid::PKCS9_EMAILADDRESS, &self.email_address),
        ];

        let mut entries = vec![(Nid::COMMONNAME, self.common_name.as_str())];
        entries.extend(
            optional
                .into_iter()
                .filter_map(|(nid, value)| value.as_deref().map(|v| (nid, v))),
        );
        entries
    }
}

/// CSR 提供者：產出 PKCS#10 請求，並持有對應的私鑰。
pub trait CsrProvider {
    fn csr_pem(&self) -> Result<String>;
    fn private_key(&self) -> &KeyPair;
}

/// 以 OpenSSL 產生的 CSR。
#[derive(Debug, Clone)]
pub struct OpensslCsr {
    pem: String,
    key: KeyPair,
    common_name: String,
    san: Vec<String>,
}

impl OpensslCsr {
    /// 產生 CSR。
    ///
    /// # 參數
    ///
    /// - `dn`: 主體名稱。
    /// - `san`: DNS 主體替代名稱，空陣列時不加入 SAN 擴展。
    /// - `key`: 證書私鑰，未提供時產生 RSA 2048。
    ///
    /// # Errors
    ///
    /// CN 為空或 OpenSSL 失敗時回傳 [`CsrError`]。
    pub fn generate(dn: &DistinguishedName, san: &[String], key: Option<KeyPair>) -> Result<Self> {
        if dn.common_name.trim().is_empty() {
            return Err(CsrError::EmptyCommonName);
        }
        let key = match key {
            Some(key) => key,
            None => KeyPair::generate(KeyAlgorithm::Rsa(2048))?,
        };

        let mut name = X509NameBuilder::new()?;
        for (nid, value) in dn.entries() {
            name.append_entry_by_nid(nid, value)?;
        }
        let name = name.build();

        let mut req_builder = X509Req::builder()?;
        req_builder.set_version(0)?;
        req_builder.set_subject_name(&name)?;

        if !san.is_empty() {
            let mut san_builder = SubjectAlternativeName::new();
            for entry in san {
                san_builder.dns(entry);
            }
            let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

            let mut stack = Stack::new()?;
            stack.push(san_extension)?;
            req_builder.add_extensions(&stack)?;
        }

        req_builder.set_pubkey(&key.pri_key)?;
        req_builder.sign(&key.pri_key, MessageDigest::sha256())?;
        let pem = String::from_utf8_lossy(&req_builder.build().to_pem()?).into_owned();

        Ok(Self {
            pem,
            key,
            common_name: dn.common_name.clone(),
            san: san.to_vec(),
        })
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn san(&self) -> &[String] {
        &self.san
    }
}

impl CsrProvider for OpensslCsr {
    fn csr_pem(&self) -> Result<String> {
        Ok(self.pem.clone())
    }

    fn private_key(&self) -> &KeyPair {
        &self.key
    }
}

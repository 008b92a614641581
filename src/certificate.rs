use chrono::{DateTime, Utc};
use openssl::{
    asn1::{Asn1Time, Asn1TimeRef},
    x509::{X509Ref, X509VerifyResult, X509},
};
use thiserror::Error;

use crate::{
    error::{Error, Result},
    pem::{certificate_blocks, pem_to_der},
};

const SECONDS_PER_DAY: i64 = 86_400;

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
    #[error("Chain is broken at position {position}: {reason}")]
    BrokenChain { position: usize, reason: String },
}

/// 下載的證書：終端證書與 CA 鏈，皆為 PEM。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    certificate: String,
    ca_chain: Vec<String>,
}

impl Certificate {
    pub fn new(certificate: impl Into<String>, ca_chain: Vec<String>) -> Self {
        Self {
            certificate: certificate.into(),
            ca_chain,
        }
    }

    /// 依文件順序拆出證書區塊：第一個為終端證書，其餘為 CA 鏈。
    ///
    /// # Errors
    ///
    /// 內容中沒有任何 `CERTIFICATE` 區塊時回傳 [`Error::MalformedResponse`]。
    pub fn from_pem_chain(text: &str) -> Result<Self> {
        let mut blocks = certificate_blocks(text)?.into_iter();
        let certificate = blocks
            .next()
            .ok_or_else(|| Error::malformed("No certificate found in response"))?;
        Ok(Self::new(certificate, blocks.collect()))
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate
    }

    pub fn ca_chain(&self) -> &[String] {
        &self.ca_chain
    }

    /// 終端證書接上 CA 鏈，可直接用於伺服器設定。
    pub fn full_chain_pem(&self) -> String {
        std::iter::once(&self.certificate)
            .chain(&self.ca_chain)
            .map(String::as_str)
            .collect()
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(pem_to_der(&self.certificate)?)
    }

    pub fn x509(&self) -> Result<X509> {
        Ok(X509::from_pem(self.certificate.as_bytes()).map_err(CertificateError::from)?)
    }

    pub fn expires_at(&self) -> Result<DateTime<Utc>> {
        let cert = self.x509()?;
        let epoch = Asn1Time::from_unix(0).map_err(CertificateError::from)?;
        let seconds = seconds_between(&epoch, cert.not_after())?;
        Ok(DateTime::from_timestamp(seconds, 0).ok_or(CertificateError::InvalidTimestamp)?)
    }

    /// 距離到期的整天數，已過期時為負值。
    pub fn days_left(&self) -> Result<i64> {
        Ok((self.expires_at()? - Utc::now()).num_days())
    }

    /// 判斷證書是否應該進行續約
    ///
    /// 剩餘有效時間不超過 `threshold_days` 天，或已經過期時回傳 `true`。
    pub fn should_renew(&self, threshold_days: u32) -> Result<bool> {
        let cert = self.x509()?;
        let now = Asn1Time::days_from_now(0).map_err(CertificateError::from)?;
        let remaining = seconds_between(&now, cert.not_after())?;
        Ok(remaining <= i64::from(threshold_days) * SECONDS_PER_DAY)
    }

    /// 檢查鏈中每一張證書都由下一張簽發。
    ///
    /// 比對簽發者名稱與 AKI/SKI，並以上層公鑰驗證簽章。簽發流程本身不會呼叫此檢查。
    pub fn verify_chain_linkage(&self) -> Result<()> {
        let chain = std::iter::once(&self.certificate)
            .chain(&self.ca_chain)
            .map(|pem| X509::from_pem(pem.as_bytes()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(CertificateError::from)?;

        for (position, pair) in chain.windows(2).enumerate() {
            check_issued(&pair[1], &pair[0])
                .map_err(|reason| CertificateError::BrokenChain { position, reason })?;
        }
        Ok(())
    }
}

fn seconds_between(from: &Asn1TimeRef, to: &Asn1TimeRef) -> Result<i64> {
    let diff = from.diff(to).map_err(CertificateError::from)?;
    Ok(i64::from(diff.days) * SECONDS_PER_DAY + i64::from(diff.secs))
}

fn check_issued(issuer: &X509Ref, child: &X509Ref) -> std::result::Result<(), String> {
    let result = issuer.issued(child);
    if result != X509VerifyResult::OK {
        return Err(result.error_string().to_string());
    }

    if let (Some(authority), Some(subject)) = (child.authority_key_id(), issuer.subject_key_id()) {
        if authority.as_slice() != subject.as_slice() {
            return Err("authority key identifier does not match issuer".to_string());
        }
    }

    let key = issuer.public_key().map_err(|e| e.to_string())?;
    match child.verify(&key) {
        Ok(true) => Ok(()),
        Ok(false) => Err("signature does not verify against issuer key".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

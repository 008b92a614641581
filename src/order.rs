use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    account::Account,
    authorization::Authorization,
    certificate::Certificate,
    challenge::{ChallengeType, VerificationData},
    csr::{CsrProvider, DistinguishedName, OpensslCsr},
    entity::{parse_body, present, Entity, Status},
    error::{AcmeError, Error, Result},
    payload::{FinalizeOrderPayload, Identifier, PayloadT},
    pem::pem_to_der,
    poll::{poll_status, PollSettings},
};

#[derive(Debug, Clone, Deserialize)]
struct OrderBody {
    status: String,
    identifiers: Vec<Identifier>,
    authorizations: Vec<String>,
    finalize: String,
    expires: Option<DateTime<Utc>>,
    #[serde(rename = "notBefore")]
    not_before: Option<DateTime<Utc>>,
    #[serde(rename = "notAfter")]
    not_after: Option<DateTime<Utc>>,
    certificate: Option<String>,
    error: Option<Map<String, Value>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// 一張證書的申請。
///
/// 狀態流程為 `pending → ready → processing → valid`，`invalid` 與 `expired` 為終止狀態。
/// 授權在第一次需要時取得並快取。
///
/// # 範例
///
/// ```no_run
/// use acme_engine::{
///     account::NewAccount, challenge::ChallengeType, client::Acme, payload::Identifier,
///     poll::PollSettings,
/// };
///
/// let acme = Acme::new()?;
/// let account = acme.register_account(NewAccount::new(true))?;
/// let mut order = account.new_order(&[Identifier::dns("example.com")], None, None)?;
///
/// for (identifier, data) in order.verification_data(&account, ChallengeType::Http01)? {
///     println!("{identifier}: {} -> {}", data.http_path(), data.http_content());
/// }
///
/// let settings = PollSettings::default();
/// order.start_validation(&account, ChallengeType::Http01)?;
/// order.wait_ready(&account, &settings)?;
/// let csr = order.default_csr()?;
/// order.finalize(&account, &csr)?;
/// order.wait_valid(&account, &settings)?;
/// let certificate = order.download_certificate(&account)?;
/// println!("{}", certificate.full_chain_pem());
/// # Ok::<(), acme_engine::error::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Order {
    url: String,
    body: OrderBody,
    raw: Map<String, Value>,
    primary_domain: Option<String>,
    authorizations: Option<Vec<Authorization>>,
}

impl Order {
    pub(crate) fn from_raw(url: String, raw: Map<String, Value>) -> Result<Self> {
        let body = Self::parse(&raw)?;
        Ok(Self {
            url,
            body,
            raw,
            primary_domain: None,
            authorizations: None,
        })
    }

    fn parse(raw: &Map<String, Value>) -> Result<OrderBody> {
        let body: OrderBody = parse_body(Self::KIND, raw)?;
        if body.identifiers.is_empty() {
            return Err(Error::malformed("Order has no identifiers"));
        }
        Ok(body)
    }

    pub fn identifiers(&self) -> &[Identifier] {
        &self.body.identifiers
    }

    pub fn authorization_urls(&self) -> &[String] {
        &self.body.authorizations
    }

    pub fn finalize_url(&self) -> &str {
        &self.body.finalize
    }

    pub fn expires(&self) -> Result<DateTime<Utc>> {
        present(Self::KIND, "expires", self.body.expires.as_ref()).copied()
    }

    pub fn not_before(&self) -> Result<DateTime<Utc>> {
        present(Self::KIND, "notBefore", self.body.not_before.as_ref()).copied()
    }

    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        present(Self::KIND, "notAfter", self.body.not_after.as_ref()).copied()
    }

    /// 只有 `valid` 訂單才有證書 URL。
    pub fn certificate_url(&self) -> Result<&str> {
        present(Self::KIND, "certificate", self.body.certificate.as_deref())
    }

    pub fn error(&self) -> Result<AcmeError> {
        let raw = present(Self::KIND, "error", self.body.error.as_ref())?;
        AcmeError::from_raw(raw.clone(), None)
            .ok_or_else(|| Error::malformed("Order error has no type"))
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.body.extra
    }

    /// 主要網域，作為 CSR 的 CN。預設為第一個識別項。
    pub fn primary_domain(&self) -> &str {
        match &self.primary_domain {
            Some(domain) => domain,
            None => self
                .body
                .identifiers
                .first()
                .map_or("", |identifier| identifier.value.as_str()),
        }
    }

    /// # Errors
    ///
    /// 網域不在識別項中時回傳 [`Error::InvalidArgument`]。
    pub fn set_primary_domain(&mut self, domain: &str) -> Result<()> {
        if !self.body.identifiers.iter().any(|id| id.value == domain) {
            return Err(Error::InvalidArgument(format!(
                "`{domain}` is not an identifier of this order"
            )));
        }
        self.primary_domain = Some(domain.to_string());
        Ok(())
    }

    /// CSR 的 CN 與 SAN：主要網域與其餘識別項，依訂單順序。
    pub fn csr_names(&self) -> (String, Vec<String>) {
        let primary = self.primary_domain().to_string();
        let san = self
            .body
            .identifiers
            .iter()
            .map(|identifier| identifier.value.clone())
            .filter(|value| *value != primary)
            .collect();
        (primary, san)
    }

    /// 依訂單識別項產生 CSR 與新的 RSA 2048 證書私鑰。
    pub fn default_csr(&self) -> Result<OpensslCsr> {
        let (common_name, san) = self.csr_names();
        Ok(OpensslCsr::generate(
            &DistinguishedName::new(common_name),
            &san,
            None,
        )?)
    }

    pub fn refresh(&mut self, account: &Account) -> Result<()> {
        let raw = account.post_as_get(&self.url)?;
        self.refresh_with(raw)
    }

    /// 以新內容替換狀態。授權列表改變時清除授權快取。
    pub fn refresh_with(&mut self, raw: Map<String, Value>) -> Result<()> {
        let body = Self::parse(&raw)?;
        if body.authorizations != self.body.authorizations {
            self.authorizations = None;
        }
        self.body = body;
        self.raw = raw;
        Ok(())
    }

    /// 取得所有授權。`use_cache` 為 `false` 時重新向伺服器取得。
    pub fn authorizations(
        &mut self,
        account: &Account,
        use_cache: bool,
    ) -> Result<&mut [Authorization]> {
        if !use_cache || self.authorizations.is_none() {
            debug!("Fetching authorizations of {}", self.url);
            let authorizations = self
                .body
                .authorizations
                .iter()
                .map(|url| account.get_authorization(url))
                .collect::<Result<Vec<_>>>()?;
            self.authorizations = Some(authorizations);
        }
        Ok(self.authorizations.get_or_insert_with(Vec::new).as_mut_slice())
    }

    /// 每個尚未通過驗證的識別項所需的驗證資料。
    pub fn verification_data(
        &mut self,
        account: &Account,
        method: ChallengeType,
    ) -> Result<Vec<(Identifier, VerificationData)>> {
        let thumbprint = account.thumbprint()?;
        let mut data = Vec::new();
        for authz in self.authorizations(account, true)? {
            if authz.state() == Some(Status::Valid) {
                continue;
            }
            let identifier = authz.identifier().clone();
            let challenge = authz.challenge(account, method)?;
            data.push((identifier, VerificationData::new(challenge.token()?, &thumbprint)));
        }
        Ok(data)
    }

    /// 對每個待驗證的授權觸發指定方式的挑戰。
    ///
    /// `ready` 訂單直接返回；已通過的授權會略過。
    ///
    /// # Errors
    ///
    /// - 訂單不是 `pending` 或 `ready` 時回傳錯誤。
    /// - 某個授權已失效，或沒有提供該驗證方式。
    pub fn start_validation(&mut self, account: &Account, method: ChallengeType) -> Result<()> {
        match self.state() {
            Some(Status::Ready) => return Ok(()),
            Some(Status::Pending) => {}
            _ => return Err(self.unexpected_state(Status::Pending)),
        }

        for authz in self.authorizations(account, true)? {
            match authz.state() {
                Some(Status::Valid) => debug!("Authorization for {} is already valid", authz.domain()),
                Some(Status::Pending) => {
                    let domain = authz.domain().to_string();
                    authz.challenge(account, method)?.validate(account)?;
                    info!("Triggered {method} validation for {domain}");
                }
                _ => {
                    return Err(Error::InvalidState(format!(
                        "Authorization for `{}` is `{}`",
                        authz.domain(),
                        authz.status()
                    )))
                }
            }
        }
        Ok(())
    }

    /// 輪詢直到訂單離開 `pending`。
    ///
    /// # Errors
    ///
    /// - 結果不是 `ready` 時回傳 [`Error::OrderFailed`]，附上訂單的錯誤內容。
    /// - 超過期限時回傳 [`Error::Timeout`]。
    pub fn wait_ready(&mut self, account: &Account, settings: &PollSettings) -> Result<()> {
        self.wait_for(account, settings, Status::Pending, Status::Ready)
    }

    /// 送出 CSR 完成訂單。訂單必須是 `ready`。
    pub fn finalize(&mut self, account: &Account, csr: &dyn CsrProvider) -> Result<()> {
        if self.state() != Some(Status::Ready) {
            return Err(self.unexpected_state(Status::Ready));
        }

        let der = pem_to_der(&csr.csr_pem()?)?;
        let payload = FinalizeOrderPayload::new(&der).to_value()?;
        let reply = account.signed(&self.body.finalize, Some(&payload), true)?;
        self.refresh_with(reply.into_json()?)?;
        info!("Finalized order {}, now `{}`", self.url, self.status());
        Ok(())
    }

    /// 輪詢直到訂單離開 `processing`，結果必須是 `valid`。
    pub fn wait_valid(&mut self, account: &Account, settings: &PollSettings) -> Result<()> {
        self.wait_for(account, settings, Status::Processing, Status::Valid)
    }

    /// 下載證書鏈，第一個區塊為終端證書，其餘依伺服器順序為 CA 鏈。
    pub fn download_certificate(&self, account: &Account) -> Result<Certificate> {
        if self.state() != Some(Status::Valid) {
            return Err(self.unexpected_state(Status::Valid));
        }

        let reply = account.signed(self.certificate_url()?, None, false)?;
        let certificate = Certificate::from_pem_chain(&reply.response.text())?;
        info!(
            "Downloaded certificate with {} chain certificates",
            certificate.ca_chain().len()
        );
        Ok(certificate)
    }

    /// 停用所有仍為 `pending` 或 `valid` 的授權。
    pub fn deactivate_authorizations(&mut self, account: &Account) -> Result<()> {
        for authz in self.authorizations(account, true)? {
            if matches!(authz.state(), Some(Status::Pending | Status::Valid)) {
                authz.deactivate(account)?;
            }
        }
        Ok(())
    }

    fn wait_for(
        &mut self,
        account: &Account,
        settings: &PollSettings,
        waiting_on: Status,
        expected: Status,
    ) -> Result<()> {
        let clock = account.acme().clock();
        let status = poll_status(clock.as_ref(), settings, waiting_on.as_str(), || {
            self.refresh(account)?;
            Ok(self.status().to_string())
        })?;

        if status == expected.as_str() {
            Ok(())
        } else {
            Err(self.failed())
        }
    }

    fn failed(&self) -> Error {
        Error::OrderFailed {
            status: self.status().to_string(),
            error: self.error().ok(),
        }
    }

    fn unexpected_state(&self, expected: Status) -> Error {
        match self.state() {
            Some(Status::Invalid | Status::Expired) => self.failed(),
            _ => Error::InvalidState(format!(
                "Order is `{}`, expected `{expected}`",
                self.status()
            )),
        }
    }
}

impl Entity for Order {
    const KIND: &'static str = "Order";

    fn url(&self) -> &str {
        &self.url
    }

    fn status(&self) -> &str {
        &self.body.status
    }

    fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

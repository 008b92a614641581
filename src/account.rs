//! ACME 帳戶：註冊請求、External Account Binding 與帳戶層級的操作。

use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    authorization::Authorization,
    base64::b64url_decode,
    challenge::Challenge,
    client::{Acme, Reply},
    directory::{KEY_CHANGE, NEW_ORDER, REVOKE_CERT},
    entity::{parse_body, present, Entity},
    error::{Error, Result},
    jws::Jws,
    order::Order,
    payload::{
        normalize_contact, ContactPayload, DeactivationPayload, Identifier, KeyChangePayload,
        NewOrderPayload, PayloadT, RevocationPayload, RevocationReason,
    },
    pem::{certificate_blocks, pem_to_der},
    protection::{KeyBinding, ProtectedHeader},
    signature::{AccountKey, HmacSigner, Signer},
};

/// 註冊新帳戶的請求內容。
///
/// # 範例
///
/// ```no_run
/// use acme_engine::{account::NewAccount, client::Acme, entity::Entity};
///
/// let acme = Acme::new()?;
/// let account = acme.register_account(NewAccount::new(true).email("admin@example.com"))?;
/// println!("{}", account.url());
/// # Ok::<(), acme_engine::error::Error>(())
/// ```
pub struct NewAccount {
    pub(crate) terms_of_service_agreed: bool,
    pub(crate) contact: Vec<String>,
    pub(crate) eab: Option<ExternalAccountBinding>,
    pub(crate) key: Option<Box<dyn AccountKey>>,
}

impl NewAccount {
    pub fn new(terms_of_service_agreed: bool) -> Self {
        Self {
            terms_of_service_agreed,
            contact: Vec::new(),
            eab: None,
            key: None,
        }
    }

    /// 加入電子郵件聯絡方式，自動補上 `mailto:`。
    pub fn email(mut self, email: &str) -> Self {
        self.contact.push(normalize_contact(email));
        self
    }

    /// 加入任意 URI 形式的聯絡方式。
    pub fn contact(mut self, contact: impl Into<String>) -> Self {
        self.contact.push(contact.into());
        self
    }

    pub fn external_account_binding(mut self, eab: ExternalAccountBinding) -> Self {
        self.eab = Some(eab);
        self
    }

    /// 使用既有的帳戶金鑰；未設定時由工作階段產生。
    pub fn key(mut self, key: Box<dyn AccountKey>) -> Self {
        self.key = Some(key);
        self
    }
}

impl fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAccount")
            .field("terms_of_service_agreed", &self.terms_of_service_agreed)
            .field("contact", &self.contact)
            .field("eab", &self.eab)
            .field("key", &self.key.as_ref().map(|key| key.alg().to_string()))
            .finish()
    }
}

/// CA 核發的 External Account Binding 憑證：key identifier 與 HMAC 金鑰。
pub struct ExternalAccountBinding {
    kid: String,
    mac: HmacSigner,
}

impl ExternalAccountBinding {
    /// `hmac_key` 為 CA 提供的 base64url 字串，以 HS256 簽署。
    ///
    /// # Errors
    ///
    /// 金鑰無法解碼時回傳 [`Error::Decode`]。
    pub fn new(kid: impl Into<String>, hmac_key: &str) -> Result<Self> {
        Self::with_algorithm(kid, hmac_key, "HS256")
    }

    pub fn with_algorithm(kid: impl Into<String>, hmac_key: &str, alg: &str) -> Result<Self> {
        let secret = b64url_decode(hmac_key)?;
        Ok(Self {
            kid: kid.into(),
            mac: HmacSigner::new(&secret, alg)?,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn mac(&self) -> &dyn Signer {
        &self.mac
    }
}

impl fmt::Debug for ExternalAccountBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalAccountBinding")
            .field("kid", &self.kid)
            .field("alg", &self.mac.alg())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AccountBody {
    status: String,
    contact: Option<Vec<String>>,
    #[serde(rename = "termsOfServiceAgreed")]
    terms_of_service_agreed: Option<bool>,
    orders: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// 已註冊的 ACME 帳戶。
///
/// 持有帳戶金鑰，帳戶底下的所有請求都以帳戶 URL 作為 `kid` 簽署。
/// 訂單、授權與挑戰不保存帳戶參照，操作時由呼叫端傳入。
pub struct Account {
    acme: Acme,
    url: String,
    body: AccountBody,
    raw: Map<String, Value>,
    key: Box<dyn AccountKey>,
}

impl Account {
    pub(crate) fn from_reply(
        acme: Acme,
        url: String,
        raw: Map<String, Value>,
        key: Box<dyn AccountKey>,
    ) -> Result<Self> {
        let body = parse_body(Self::KIND, &raw)?;
        Ok(Self {
            acme,
            url,
            body,
            raw,
            key,
        })
    }

    pub fn acme(&self) -> &Acme {
        &self.acme
    }

    pub fn key(&self) -> &dyn AccountKey {
        self.key.as_ref()
    }

    /// 帳戶金鑰指紋，用於組成 keyAuthorization。
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.key.thumbprint()?)
    }

    pub fn contact(&self) -> Result<&[String]> {
        present(Self::KIND, "contact", self.body.contact.as_deref())
    }

    pub fn terms_of_service_agreed(&self) -> Result<bool> {
        present(
            Self::KIND,
            "termsOfServiceAgreed",
            self.body.terms_of_service_agreed.as_ref(),
        )
        .copied()
    }

    pub fn orders_url(&self) -> Result<&str> {
        present(Self::KIND, "orders", self.body.orders.as_deref())
    }

    pub fn created_at(&self) -> Result<DateTime<Utc>> {
        present(Self::KIND, "createdAt", self.body.created_at.as_ref()).copied()
    }

    /// 伺服器回傳但沒有對應欄位的屬性。
    pub fn extra(&self) -> &Map<String, Value> {
        &self.body.extra
    }

    /// 以 POST-as-GET 重新取得帳戶內容。
    pub fn refresh(&mut self) -> Result<()> {
        let raw = self.post_as_get(&self.url)?;
        self.refresh_with(raw)
    }

    /// 以已取得的內容替換狀態；驗證失敗時保留原狀態。
    pub fn refresh_with(&mut self, raw: Map<String, Value>) -> Result<()> {
        self.body = parse_body(Self::KIND, &raw)?;
        self.raw = raw;
        Ok(())
    }

    /// 以帳戶金鑰（kid 模式）送出簽章請求。
    pub(crate) fn signed(
        &self,
        url: &str,
        payload: Option<&Value>,
        require_json: bool,
    ) -> Result<Reply> {
        self.acme.signed_request(
            url,
            payload,
            KeyBinding::Kid(self.url.clone()),
            self.key.as_ref(),
            require_json,
        )
    }

    pub(crate) fn post_as_get(&self, url: &str) -> Result<Map<String, Value>> {
        self.signed(url, None, true)?.into_json()
    }

    /// 建立新訂單。
    ///
    /// # Errors
    ///
    /// - 識別項為空時回傳 [`Error::InvalidArgument`]，不送出請求。
    /// - 回應缺少 `Location` 時回傳 [`Error::MalformedResponse`]。
    pub fn new_order(
        &self,
        identifiers: &[Identifier],
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> Result<Order> {
        let payload = NewOrderPayload::new(identifiers.to_vec(), not_before, not_after).to_value()?;
        let url = self.acme.directory_item(NEW_ORDER)?;

        let reply = self.signed(&url, Some(&payload), true)?;
        let location = reply.location()?;
        info!("Created order {location}");
        Order::from_raw(location, reply.into_json()?)
    }

    pub fn get_order(&self, url: &str) -> Result<Order> {
        Order::from_raw(url.to_string(), self.post_as_get(url)?)
    }

    pub fn get_authorization(&self, url: &str) -> Result<Authorization> {
        Authorization::from_raw(url.to_string(), self.post_as_get(url)?)
    }

    pub fn get_challenge(&self, url: &str) -> Result<Challenge> {
        Challenge::from_raw(url.to_string(), self.post_as_get(url)?)
    }

    /// 替換帳戶聯絡方式；電子郵件會補上 `mailto:`。
    pub fn update_contact(&mut self, contact: &[&str]) -> Result<()> {
        let payload = ContactPayload {
            contact: contact.iter().map(|c| normalize_contact(c)).collect(),
        }
        .to_value()?;

        let reply = self.signed(&self.url, Some(&payload), true)?;
        self.refresh_with(reply.into_json()?)
    }

    /// 停用帳戶，之後伺服器會拒絕此帳戶的所有請求。
    pub fn deactivate(&mut self) -> Result<()> {
        let payload = DeactivationPayload::default().to_value()?;
        let reply = self.signed(&self.url, Some(&payload), true)?;
        self.refresh_with(reply.into_json()?)?;
        info!("Deactivated account {}", self.url);
        Ok(())
    }

    /// 更換帳戶金鑰。
    ///
    /// 內層 JWS 由新金鑰以 jwk 模式簽署，載荷為 `{account, oldKey}`，不帶 nonce；
    /// 外層由舊金鑰以 kid 模式簽署。伺服器確認後才替換本地金鑰。
    pub fn change_key(&mut self, new_key: Box<dyn AccountKey>) -> Result<()> {
        let url = self.acme.directory_item(KEY_CHANGE)?;
        let payload = KeyChangePayload {
            account: self.url.clone(),
            old_key: self.key.jwk()?,
        }
        .to_value()?;

        let header = ProtectedHeader::new(new_key.alg(), &url, KeyBinding::Jwk(new_key.jwk()?));
        let inner = Jws::sign(&header, Some(&payload), new_key.as_ref())?.to_value()?;

        let reply = self.signed(&url, Some(&inner), false)?;
        self.key = new_key;
        info!("Changed key of account {}", self.url);

        if let Some(raw) = reply.json.filter(|raw| raw.contains_key("status")) {
            self.refresh_with(raw)?;
        }
        Ok(())
    }

    /// 撤銷證書。
    ///
    /// `certificate_pem` 可為完整鏈，只使用第一個區塊。
    pub fn revoke_certificate(&self, certificate_pem: &str, reason: RevocationReason) -> Result<()> {
        let leaf = certificate_blocks(certificate_pem)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidArgument("No certificate in PEM input".to_string()))?;
        let der = pem_to_der(&leaf)?;
        let payload = RevocationPayload::new(&der, reason).to_value()?;
        let url = self.acme.directory_item(REVOKE_CERT)?;

        debug!("Revoking certificate with reason {reason:?}");
        self.signed(&url, Some(&payload), false)?;
        info!("Revoked certificate");
        Ok(())
    }
}

impl Entity for Account {
    const KIND: &'static str = "Account";

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

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("url", &self.url)
            .field("status", &self.body.status)
            .field("alg", &self.key.alg())
            .finish_non_exhaustive()
    }
}

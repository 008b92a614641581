use std::{cell::RefCell, fmt, rc::Rc, time::Duration};

use log::{debug, trace, warn};
use serde_json::{Map, Value};

use crate::{
    account::{Account, NewAccount},
    directory::{Directory, LETSENCRYPT_DIRECTORY, NEW_ACCOUNT, NEW_NONCE},
    error::{AcmeError, Error, Result},
    jws::Jws,
    key_pair::{KeyAlgorithm, KeyPair},
    nonce::NonceCache,
    payload::{NewAccountPayload, PayloadT},
    poll::{Clock, SystemClock},
    protection::{KeyBinding, ProtectedHeader},
    signature::{account_key, AccountKey, Signer},
    transport::{
        HeaderValue, HttpRequest, HttpResponse, HttpTransport, HttpWatcher, Method,
        ReqwestTransport,
    },
};

pub const DEFAULT_DIR_URL: &str = LETSENCRYPT_DIRECTORY;
pub const DEFAULT_KEY_BITS: u32 = 2048;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_USER_AGENT: &str = concat!("acme-engine/", env!("CARGO_PKG_VERSION"));

const JOSE_CONTENT_TYPE: &str = "application/jose+json";
const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// 建立 [`Acme`] 工作階段的建構器。
///
/// # 範例
///
/// ```no_run
/// use acme_engine::client::AcmeBuilder;
/// use acme_engine::directory::LETSENCRYPT_STAGING_DIRECTORY;
///
/// let acme = AcmeBuilder::new()
///     .directory_url(LETSENCRYPT_STAGING_DIRECTORY)
///     .account_key_bits(4096)
///     .build()?;
/// # Ok::<(), acme_engine::error::Error>(())
/// ```
pub struct AcmeBuilder {
    directory_url: String,
    directory: Option<Directory>,
    transport: Option<Box<dyn HttpTransport>>,
    clock: Option<Rc<dyn Clock>>,
    watchers: Vec<Rc<dyn HttpWatcher>>,
    key_bits: u32,
    http_timeout: Duration,
    user_agent: String,
}

impl AcmeBuilder {
    pub fn new() -> Self {
        Self {
            directory_url: DEFAULT_DIR_URL.to_string(),
            directory: None,
            transport: None,
            clock: None,
            watchers: Vec::new(),
            key_bits: DEFAULT_KEY_BITS,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn directory_url(mut self, url: impl Into<String>) -> Self {
        self.directory_url = url.into();
        self
    }

    /// 預先提供目錄內容，略過第一次的 GET。
    pub fn directory(mut self, directory: Directory) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn transport(mut self, transport: Box<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 加入交換觀察者，依加入順序呼叫。
    pub fn watcher(mut self, watcher: Rc<dyn HttpWatcher>) -> Self {
        self.watchers.push(watcher);
        self
    }

    /// 未提供帳戶金鑰時所產生 RSA 金鑰的長度。
    pub fn account_key_bits(mut self, bits: u32) -> Self {
        self.key_bits = bits;
        self
    }

    /// 預設傳輸層的逾時，自訂傳輸層時無效。
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// # Errors
    ///
    /// 無法建立預設的 HTTP client 時回傳 [`Error::Transport`]。
    pub fn build(self) -> Result<Acme> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(ReqwestTransport::new(self.http_timeout, &self.user_agent)?),
        };

        Ok(Acme {
            inner: Rc::new(RefCell::new(Session {
                directory_url: self.directory_url,
                directory: self.directory,
                transport,
                nonce: NonceCache::new(),
                last_request: None,
                last_response: None,
                clock: self.clock.unwrap_or_else(|| Rc::new(SystemClock)),
                watchers: self.watchers,
                key_bits: self.key_bits,
            })),
        })
    }
}

impl Default for AcmeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 與單一 CA 溝通的工作階段。
///
/// 持有目錄快取、nonce 暫存與最後一次 HTTP 交換的紀錄。可複製，複本共用同一份狀態；
/// 不可跨執行緒共用，所有請求依序進行。
#[derive(Clone)]
pub struct Acme {
    inner: Rc<RefCell<Session>>,
}

struct Session {
    directory_url: String,
    directory: Option<Directory>,
    transport: Box<dyn HttpTransport>,
    nonce: NonceCache,
    last_request: Option<HttpRequest>,
    last_response: Option<HttpResponse>,
    clock: Rc<dyn Clock>,
    watchers: Vec<Rc<dyn HttpWatcher>>,
    key_bits: u32,
}

/// 簽章請求的結果。
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub response: HttpResponse,
    pub json: Option<Map<String, Value>>,
}

impl Reply {
    /// 取出 JSON 物件；呼叫端以 `require_json` 送出請求時必定存在。
    pub fn into_json(self) -> Result<Map<String, Value>> {
        let status = self.response.status;
        self.json.ok_or_else(|| {
            Error::malformed(format!("Expected a JSON object. responseCode={status}"))
        })
    }

    pub fn location(&self) -> Result<String> {
        required_header(&self.response, "Location").map(ToString::to_string)
    }
}

impl Acme {
    /// 以預設設定（Let's Encrypt 正式環境）建立工作階段。
    pub fn new() -> Result<Self> {
        AcmeBuilder::new().build()
    }

    pub fn builder() -> AcmeBuilder {
        AcmeBuilder::new()
    }

    pub fn directory_url(&self) -> String {
        self.inner.borrow().directory_url.clone()
    }

    /// 取得目錄，第一次呼叫時才向伺服器要求。
    pub fn directory(&self) -> Result<Directory> {
        self.inner.borrow_mut().directory().cloned()
    }

    /// 替換目錄快取。
    pub fn set_directory(&self, directory: Directory) {
        self.inner.borrow_mut().directory = Some(directory);
    }

    /// # Errors
    ///
    /// 目錄沒有該服務時回傳 [`Error::MissingDirectoryItem`]。
    pub fn directory_item(&self, name: &str) -> Result<String> {
        self.inner.borrow_mut().directory_item(name)
    }

    pub fn external_account_required(&self) -> Result<bool> {
        Ok(self
            .inner
            .borrow_mut()
            .directory()?
            .external_account_required())
    }

    /// 取得一個未使用過的 nonce。
    ///
    /// 有暫存時直接取出並清除，否則向 `newNonce` 服務要求。
    pub fn nonce(&self) -> Result<String> {
        self.inner.borrow_mut().nonce()
    }

    /// 最後送出的請求，用於除錯。
    pub fn last_request(&self) -> Option<HttpRequest> {
        self.inner.borrow().last_request.clone()
    }

    /// 最後收到的回應，用於除錯。
    pub fn last_response(&self) -> Option<HttpResponse> {
        self.inner.borrow().last_response.clone()
    }

    /// 註冊新帳戶。
    ///
    /// 未提供金鑰時會產生 RSA 金鑰（長度見 [`AcmeBuilder::account_key_bits`]）。
    /// 若目錄要求 External Account Binding 而請求中沒有，會先回傳錯誤，不送出請求。
    ///
    /// # Errors
    ///
    /// - 伺服器拒絕時回傳 [`Error::Acme`]。
    /// - 回應缺少 `Location` 時回傳 [`Error::MalformedResponse`]。
    pub fn register_account(&self, request: NewAccount) -> Result<Account> {
        let url = self.directory_item(NEW_ACCOUNT)?;
        if request.eab.is_none() && self.external_account_required()? {
            return Err(Error::InvalidArgument(
                "The CA requires an external account binding".to_string(),
            ));
        }

        let key = match request.key {
            Some(key) => key,
            None => {
                let bits = self.inner.borrow().key_bits;
                debug!("Generating RSA {bits} account key");
                account_key(KeyPair::generate(KeyAlgorithm::Rsa(bits))?)?
            }
        };
        let jwk = key.jwk()?;

        let external_account_binding = match &request.eab {
            Some(eab) => Some(Jws::external_account_binding(eab.kid(), eab.mac(), &jwk, &url)?.to_value()?),
            None => None,
        };
        let payload = NewAccountPayload {
            terms_of_service_agreed: Some(request.terms_of_service_agreed),
            contact: request.contact,
            only_return_existing: false,
            external_account_binding,
        };

        let reply = self.signed_request(
            &url,
            Some(&payload.to_value()?),
            KeyBinding::Jwk(jwk),
            key.as_ref(),
            true,
        )?;
        let location = reply.location()?;
        debug!("Registered account {location}");
        Account::from_reply(self.clone(), location, reply.into_json()?, key)
    }

    /// 以既有金鑰取得帳戶。
    ///
    /// `url` 為 `None` 時以 `onlyReturnExisting` 向 `newAccount` 查詢；
    /// 否則直接以 kid 對帳戶 URL 做 POST-as-GET。
    pub fn existing_account(&self, key: Box<dyn AccountKey>, url: Option<&str>) -> Result<Account> {
        let (location, reply) = match url {
            Some(url) => {
                let reply = self.signed_request(
                    url,
                    None,
                    KeyBinding::Kid(url.to_string()),
                    key.as_ref(),
                    true,
                )?;
                (url.to_string(), reply)
            }
            None => {
                let new_account = self.directory_item(NEW_ACCOUNT)?;
                let reply = self.signed_request(
                    &new_account,
                    Some(&NewAccountPayload::only_existing().to_value()?),
                    KeyBinding::Jwk(key.jwk()?),
                    key.as_ref(),
                    true,
                )?;
                (reply.location()?, reply)
            }
        };
        Account::from_reply(self.clone(), location, reply.into_json()?, key)
    }

    pub(crate) fn signed_request(
        &self,
        url: &str,
        payload: Option<&Value>,
        binding: KeyBinding,
        signer: &dyn Signer,
        require_json: bool,
    ) -> Result<Reply> {
        self.inner
            .borrow_mut()
            .signed_request(url, payload, &binding, signer, require_json)
    }

    pub(crate) fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.inner.borrow().clock)
    }
}

impl fmt::Debug for Acme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acme")
            .field("directory_url", &self.inner.borrow().directory_url)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn http_request(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        debug!("Call endpoint: {} {}", request.method, request.url);
        if let Some(body) = &request.body {
            trace!("Request body: {body}");
        }
        self.last_response = None;
        for watcher in &self.watchers {
            watcher.on_request(&request);
        }
        let response = self.transport.send(&request);

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.last_request = Some(request);
                return Err(e.into());
            }
        };
        trace!("Response {}: {}", response.status, response.text());
        for watcher in &self.watchers {
            watcher.on_response(&request, &response);
        }
        self.last_request = Some(request);
        self.last_response = Some(response.clone());
        self.nonce.observe(&response)?;
        Ok(response)
    }

    fn directory(&mut self) -> Result<&Directory> {
        if self.directory.is_none() {
            let url = self.directory_url.clone();
            let response = self.http_request(HttpRequest::new(Method::Get, url))?;
            let raw = parse_response(&response, true)?.unwrap_or_default();
            self.directory = Some(Directory::from_value(Value::Object(raw))?);
        }
        self.directory
            .as_ref()
            .ok_or_else(|| Error::InvalidState("Directory is not loaded".to_string()))
    }

    fn directory_item(&mut self, name: &str) -> Result<String> {
        Ok(self.directory()?.item(name)?.to_string())
    }

    fn nonce(&mut self) -> Result<String> {
        if let Some(nonce) = self.nonce.take() {
            return Ok(nonce);
        }

        let url = self.directory_item(NEW_NONCE)?;
        let response = self.http_request(HttpRequest::new(Method::Head, url))?;
        self.nonce.take().ok_or_else(|| {
            Error::NonceUnavailable(format!(
                "no `Replay-Nonce` header. responseCode={}",
                response.status
            ))
        })
    }

    /// 送出簽章請求；`badNonce` 只重試一次，使用錯誤回應附帶的新 nonce。
    fn signed_request(
        &mut self,
        url: &str,
        payload: Option<&Value>,
        binding: &KeyBinding,
        signer: &dyn Signer,
        require_json: bool,
    ) -> Result<Reply> {
        let mut retried = false;
        loop {
            let nonce = self.nonce()?;
            let header = ProtectedHeader::new(signer.alg(), url, binding.clone()).with_nonce(nonce);
            let jws = Jws::sign(&header, payload, signer)?;

            let request = HttpRequest::new(Method::Post, url)
                .header("Content-Type", JOSE_CONTENT_TYPE)
                .body(jws.to_json()?);
            let response = self.http_request(request)?;

            match parse_response(&response, require_json) {
                Ok(json) => return Ok(Reply { response, json }),
                Err(Error::Acme(problem)) if problem.is_bad_nonce() && !retried => {
                    warn!("Retrying on bad nonce: {problem}");
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// 讀取必須存在且唯一的回應標頭。
pub(crate) fn required_header<'a>(response: &'a HttpResponse, name: &str) -> Result<&'a str> {
    match response.header_value(name) {
        HeaderValue::Single(value) if !value.is_empty() => Ok(value),
        HeaderValue::Repeated(_) => Err(Error::AmbiguousHeader(name.to_string())),
        HeaderValue::Single(_) | HeaderValue::Missing => Err(Error::malformed(format!(
            "No `{name}` response header. responseCode={}, contentType={}",
            response.status,
            content_type(response).unwrap_or_default()
        ))),
    }
}

fn content_type(response: &HttpResponse) -> Result<String> {
    match response.header_value("Content-Type") {
        HeaderValue::Single(value) => Ok(value.to_ascii_lowercase()),
        HeaderValue::Missing => Ok(String::new()),
        HeaderValue::Repeated(_) => Err(Error::AmbiguousHeader("Content-Type".to_string())),
    }
}

/// 解析回應內容。
///
/// - 含 `type` 的 JSON 物件，且狀態碼 ≥ 400 或內容類型為 `application/problem+json` 時，回傳 [`Error::Acme`]。
/// - `require_json` 時內容必須是 JSON 物件，否則回傳 [`Error::MalformedResponse`]。
/// - 狀態碼 ≥ 400 但不是問題文件時，一律視為 [`Error::MalformedResponse`]。
pub(crate) fn parse_response(
    response: &HttpResponse,
    require_json: bool,
) -> Result<Option<Map<String, Value>>> {
    let code = response.status;
    let content_type = content_type(response)?;

    let parsed = match serde_json::from_slice::<Value>(&response.body) {
        Ok(Value::Object(map)) => Some(map),
        Ok(other) if require_json => {
            return Err(Error::malformed(format!(
                "Unexpected type of json response: {other}. responseCode={code}"
            )))
        }
        Err(e) if require_json => {
            return Err(Error::malformed(format!(
                "Failed to parse http response as json: {e}. responseCode={code}, contentType={content_type}"
            )))
        }
        _ => None,
    };

    if let Some(map) = parsed {
        if code >= 400 || content_type.starts_with(PROBLEM_CONTENT_TYPE) {
            if let Some(problem) = AcmeError::from_raw(map.clone(), Some(code)) {
                return Err(problem.into());
            }
        }
        if code >= 400 {
            return Err(Error::malformed(format!(
                "HTTP {code} without a problem document"
            )));
        }
        return Ok(Some(map));
    }

    if code >= 400 {
        return Err(Error::malformed(format!(
            "HTTP {code} with a non-JSON body. contentType={content_type}"
        )));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base64::b64url_decode,
        entity::Entity,
        test::{
            payload_of, protected_of, MockClock, MockServer, ACCOUNT_URL, DIRECTORY_URL,
            NEW_ACCOUNT_URL, NONCE_URL,
        },
    };
    use serde_json::json;

    #[derive(Default)]
    struct RecordingWatcher {
        seen: RefCell<Vec<String>>,
    }

    impl HttpWatcher for RecordingWatcher {
        fn on_request(&self, request: &HttpRequest) {
            self.seen
                .borrow_mut()
                .push(format!("> {} {}", request.method, request.url));
        }

        fn on_response(&self, request: &HttpRequest, response: &HttpResponse) {
            self.seen
                .borrow_mut()
                .push(format!("< {} {}", response.status, request.url));
        }
    }

    #[test]
    fn test_watchers_see_every_exchange() -> Result<()> {
        let server = MockServer::new();
        server.fail(Method::Head, NONCE_URL, "connection reset");
        let watcher = Rc::new(RecordingWatcher::default());
        let acme = AcmeBuilder::new()
            .directory_url(DIRECTORY_URL)
            .transport(Box::new(server.clone()))
            .clock(Rc::new(MockClock::new()))
            .watcher(watcher.clone())
            .build()?;

        acme.directory()?;
        acme.nonce()?;
        assert!(matches!(acme.nonce(), Err(Error::Transport(_))));

        assert_eq!(
            *watcher.seen.borrow(),
            [
                format!("> GET {DIRECTORY_URL}"),
                format!("< 200 {DIRECTORY_URL}"),
                format!("> HEAD {NONCE_URL}"),
            ]
        );
        assert_eq!(acme.last_request().map(|r| r.url), Some(NONCE_URL.to_string()));
        assert!(acme.last_response().is_none());
        Ok(())
    }

    #[test]
    fn test_directory_is_fetched_once() -> Result<()> {
        let server = MockServer::new();
        let acme = server.acme()?;

        assert_eq!(acme.directory_item("newOrder")?, "https://acme.test/new-order");
        assert_eq!(acme.directory_item("revokeCert")?, "https://acme.test/revoke-cert");
        assert_eq!(server.count(Method::Get, crate::test::DIRECTORY_URL), 1);
        assert!(!acme.external_account_required()?);
        Ok(())
    }

    #[test]
    fn test_nonce_single_use() -> Result<()> {
        let server = MockServer::new();
        let acme = server.acme()?;

        let first = acme.nonce()?;
        let second = acme.nonce()?;
        assert_ne!(first, second);
        assert_eq!(server.count(Method::Head, NONCE_URL), 2);
        Ok(())
    }

    #[test]
    fn test_missing_nonce_header() -> Result<()> {
        let server = MockServer::new();
        server.respond_bare(Method::Head, NONCE_URL, HttpResponse::new(200));
        let acme = server.acme()?;
        acme.directory()?;
        // 目錄回應附帶的 nonce
        acme.nonce()?;

        assert!(matches!(acme.nonce(), Err(Error::NonceUnavailable(_))));
        assert_eq!(server.count(Method::Head, NONCE_URL), 1);
        Ok(())
    }

    #[test]
    fn test_empty_nonce_header() -> Result<()> {
        let server = MockServer::new();
        server.respond(
            Method::Head,
            NONCE_URL,
            HttpResponse::new(200).header("Replay-Nonce", ""),
        );
        let acme = server.acme()?;
        acme.directory()?;
        acme.nonce()?;

        assert!(matches!(acme.nonce(), Err(Error::NonceUnavailable(_))));
        Ok(())
    }

    #[test]
    fn test_register_account_generates_key_and_uses_jwk() -> Result<()> {
        let server = MockServer::new();
        let acme = server.acme()?;

        let account = acme.register_account(NewAccount::new(true).email("admin@example.com"))?;
        assert_eq!(account.url(), ACCOUNT_URL);
        assert_eq!(account.status(), "valid");

        let request = server.last_to(NEW_ACCOUNT_URL);
        let Some(request) = request else {
            panic!("newAccount was not called");
        };
        assert_eq!(
            request.header_value("content-type"),
            HeaderValue::Single(JOSE_CONTENT_TYPE)
        );
        let protected = protected_of(&request);
        assert_eq!(protected["alg"], "RS256");
        assert_eq!(protected["url"], NEW_ACCOUNT_URL);
        assert_eq!(protected["jwk"]["kty"], "RSA");
        assert!(protected.get("kid").is_none());
        assert!(protected["nonce"].as_str().is_some_and(|n| !n.is_empty()));

        let payload: Value =
            serde_json::from_slice(&b64url_decode(&payload_of(&request)).unwrap_or_default())?;
        assert_eq!(
            payload,
            json!({"termsOfServiceAgreed": true, "contact": ["mailto:admin@example.com"]})
        );
        Ok(())
    }

    #[test]
    fn test_missing_location_is_malformed() -> Result<()> {
        let server = MockServer::new();
        server.respond(
            Method::Post,
            NEW_ACCOUNT_URL,
            MockServer::json(201, json!({"status": "valid"})),
        );
        let acme = server.acme()?;

        let result = acme.register_account(NewAccount::new(true));
        assert!(matches!(result, Err(Error::MalformedResponse(message)) if message.contains("Location")));
        assert!(acme.last_response().is_some());
        Ok(())
    }

    #[test]
    fn test_eab_required_is_checked_first() -> Result<()> {
        let server = MockServer::new();
        server.set_directory_meta(json!({"externalAccountRequired": true}));
        let acme = server.acme()?;

        let result = acme.register_account(NewAccount::new(true));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(server.count(Method::Post, NEW_ACCOUNT_URL), 0);
        Ok(())
    }

    #[test]
    fn test_existing_account_lookup() -> Result<()> {
        let server = MockServer::new();
        let acme = server.acme()?;
        let key = account_key(KeyPair::generate(KeyAlgorithm::EcP256)?)?;

        let account = acme.existing_account(key, None)?;
        assert_eq!(account.url(), ACCOUNT_URL);

        let Some(request) = server.last_to(NEW_ACCOUNT_URL) else {
            panic!("newAccount was not called");
        };
        assert_eq!(protected_of(&request)["alg"], "ES256");
        let payload: Value =
            serde_json::from_slice(&b64url_decode(&payload_of(&request)).unwrap_or_default())?;
        assert_eq!(payload, json!({"onlyReturnExisting": true}));
        Ok(())
    }

    #[test]
    fn test_existing_account_by_url_uses_kid() -> Result<()> {
        let server = MockServer::new();
        let acme = server.acme()?;
        let key = account_key(KeyPair::generate(KeyAlgorithm::EcP256)?)?;

        let account = acme.existing_account(key, Some(ACCOUNT_URL))?;
        assert_eq!(account.url(), ACCOUNT_URL);

        let Some(request) = server.last_to(ACCOUNT_URL) else {
            panic!("account was not fetched");
        };
        assert_eq!(protected_of(&request)["kid"], ACCOUNT_URL);
        assert_eq!(payload_of(&request), "");
        Ok(())
    }

    #[test]
    fn test_bad_nonce_is_retried_once() -> Result<()> {
        let server = MockServer::new();
        let bad_nonce = MockServer::problem(400, "urn:ietf:params:acme:error:badNonce", "stale nonce")
            .header("Replay-Nonce", "fresh-from-error");
        server.respond_once(Method::Post, NEW_ACCOUNT_URL, bad_nonce);
        let acme = server.acme()?;

        let account = acme.register_account(NewAccount::new(true))?;
        assert_eq!(account.url(), ACCOUNT_URL);

        let posts = server.requests_to(NEW_ACCOUNT_URL);
        assert_eq!(posts.len(), 2);
        assert_eq!(protected_of(&posts[1])["nonce"], "fresh-from-error");
        assert_ne!(protected_of(&posts[0])["nonce"], protected_of(&posts[1])["nonce"]);
        Ok(())
    }

    #[test]
    fn test_second_bad_nonce_surfaces() -> Result<()> {
        let server = MockServer::new();
        let bad_nonce = MockServer::problem(400, "urn:ietf:params:acme:error:badNonce", "stale nonce");
        server.respond(Method::Post, NEW_ACCOUNT_URL, bad_nonce);
        let acme = server.acme()?;

        let result = acme.register_account(NewAccount::new(true));
        assert!(matches!(result, Err(Error::Acme(ref problem)) if problem.is_bad_nonce()));
        assert_eq!(server.count(Method::Post, NEW_ACCOUNT_URL), 2);
        Ok(())
    }

    #[test]
    fn test_transport_error_is_not_retried() -> Result<()> {
        let server = MockServer::new();
        server.fail(Method::Post, NEW_ACCOUNT_URL, "connection reset");
        let acme = server.acme()?;

        let result = acme.register_account(NewAccount::new(true));
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(server.count(Method::Post, NEW_ACCOUNT_URL), 1);
        assert!(acme.last_request().is_some());
        assert!(acme.last_response().is_none());
        Ok(())
    }

    #[test]
    fn test_parse_response_problem_detection() {
        let problem = MockServer::problem(403, "urn:ietf:params:acme:error:unauthorized", "no");
        assert!(matches!(parse_response(&problem, true), Err(Error::Acme(p)) if p.http_code == Some(403)));

        let typed_but_ok = HttpResponse::new(200)
            .header("Content-Type", "application/json")
            .body(json!({"type": "dns", "status": "valid"}).to_string());
        assert!(matches!(parse_response(&typed_but_ok, true), Ok(Some(_))));

        let problem_json_200 = HttpResponse::new(200)
            .header("Content-Type", "application/problem+json")
            .body(json!({"type": "urn:x", "detail": "d"}).to_string());
        assert!(matches!(parse_response(&problem_json_200, true), Err(Error::Acme(_))));

        let html = HttpResponse::new(200).body("<html></html>");
        assert!(matches!(parse_response(&html, true), Err(Error::MalformedResponse(_))));
        assert!(matches!(parse_response(&html, false), Ok(None)));

        let array = HttpResponse::new(200).body("[1,2]");
        assert!(matches!(parse_response(&array, true), Err(Error::MalformedResponse(_))));

        let server_error = HttpResponse::new(500).body("oops");
        assert!(matches!(parse_response(&server_error, false), Err(Error::MalformedResponse(_))));
    }
}

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    account::Account,
    challenge::{Challenge, ChallengeType},
    entity::{parse_body, present, Entity},
    error::{Error, Result},
    payload::{DeactivationPayload, Identifier, PayloadT},
};

/// 授權中列出的挑戰摘要，至少包含類型與 URL。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChallengeDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub status: Option<String>,
    pub token: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthorizationBody {
    status: String,
    identifier: Identifier,
    challenges: Vec<ChallengeDescriptor>,
    expires: Option<DateTime<Utc>>,
    wildcard: Option<bool>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// 單一識別項的控制權證明。
///
/// 挑戰在第一次存取時逐一以 POST-as-GET 取得並快取。
#[derive(Debug, Clone)]
pub struct Authorization {
    url: String,
    body: AuthorizationBody,
    raw: Map<String, Value>,
    challenges: Option<Vec<Challenge>>,
}

impl Authorization {
    pub(crate) fn from_raw(url: String, raw: Map<String, Value>) -> Result<Self> {
        let body = parse_body(Self::KIND, &raw)?;
        Ok(Self {
            url,
            body,
            raw,
            challenges: None,
        })
    }

    pub fn identifier(&self) -> &Identifier {
        &self.body.identifier
    }

    pub fn domain(&self) -> &str {
        &self.body.identifier.value
    }

    pub fn expires(&self) -> Result<DateTime<Utc>> {
        present(Self::KIND, "expires", self.body.expires.as_ref()).copied()
    }

    pub fn wildcard(&self) -> bool {
        self.body.wildcard.unwrap_or(false)
    }

    pub fn descriptors(&self) -> &[ChallengeDescriptor] {
        &self.body.challenges
    }

    /// 伺服器是否提供指定的驗證方式。
    pub fn offers(&self, method: ChallengeType) -> bool {
        self.body
            .challenges
            .iter()
            .any(|descriptor| descriptor.kind == method.as_str())
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.body.extra
    }

    /// 取得所有挑戰。`use_cache` 為 `false` 時重新向伺服器取得。
    pub fn challenges(&mut self, account: &Account, use_cache: bool) -> Result<&mut [Challenge]> {
        if !use_cache || self.challenges.is_none() {
            debug!("Fetching challenges of {}", self.url);
            let challenges = self
                .body
                .challenges
                .iter()
                .map(|descriptor| account.get_challenge(&descriptor.url))
                .collect::<Result<Vec<_>>>()?;
            self.challenges = Some(challenges);
        }
        Ok(self.challenges.get_or_insert_with(Vec::new).as_mut_slice())
    }

    /// 依驗證方式選出挑戰。
    ///
    /// # Errors
    ///
    /// 伺服器沒有提供該方式時回傳 [`Error::ChallengeNotOffered`]。
    pub fn challenge(&mut self, account: &Account, method: ChallengeType) -> Result<&mut Challenge> {
        if !self.offers(method) {
            return Err(Error::ChallengeNotOffered {
                identifier: self.body.identifier.value.clone(),
                method: method.as_str().to_string(),
            });
        }

        let identifier = self.body.identifier.value.clone();
        self.challenges(account, true)?
            .iter_mut()
            .find(|challenge| challenge.kind() == method.as_str())
            .ok_or_else(|| Error::ChallengeNotOffered {
                identifier,
                method: method.as_str().to_string(),
            })
    }

    /// 放棄此授權。
    pub fn deactivate(&mut self, account: &Account) -> Result<()> {
        let payload = DeactivationPayload::default().to_value()?;
        let reply = account.signed(&self.url, Some(&payload), true)?;
        self.refresh_with(reply.into_json()?)?;
        info!("Deactivated authorization for {}", self.domain());
        Ok(())
    }

    pub fn refresh(&mut self, account: &Account) -> Result<()> {
        let raw = account.post_as_get(&self.url)?;
        self.refresh_with(raw)
    }

    /// 以新內容替換狀態並清除挑戰快取。
    pub fn refresh_with(&mut self, raw: Map<String, Value>) -> Result<()> {
        self.body = parse_body(Self::KIND, &raw)?;
        self.raw = raw;
        self.challenges = None;
        Ok(())
    }
}

impl Entity for Authorization {
    const KIND: &'static str = "Authorization";

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::Status,
        test::{account, authz_json, authz_url, challenge_url, payload_of, MockServer},
        transport::Method,
    };
    use serde_json::json;

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_required_attributes() {
        let missing_challenges = raw(json!({
            "status": "pending",
            "identifier": {"type": "dns", "value": "example.com"}
        }));
        assert!(matches!(
            Authorization::from_raw("u".to_string(), missing_challenges),
            Err(Error::MalformedResponse(_))
        ));

        let challenge_without_url = raw(json!({
            "status": "pending",
            "identifier": {"type": "dns", "value": "example.com"},
            "challenges": [{"type": "http-01"}]
        }));
        assert!(matches!(
            Authorization::from_raw("u".to_string(), challenge_without_url),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_challenges_are_fetched_once() -> Result<()> {
        let server = MockServer::new();
        let account = account(&server)?;
        let mut authz = account.get_authorization(&authz_url(0))?;

        assert_eq!(authz.domain(), "example.com");
        assert!(!authz.wildcard());
        assert!(authz.offers(ChallengeType::Dns01));

        assert_eq!(authz.challenges(&account, true)?.len(), 3);
        authz.challenges(&account, true)?;
        let url = challenge_url(0, "dns-01");
        assert_eq!(server.count(Method::Post, &url), 1);

        authz.challenges(&account, false)?;
        assert_eq!(server.count(Method::Post, &url), 2);
        Ok(())
    }

    #[test]
    fn test_challenge_selection() -> Result<()> {
        let server = MockServer::new();
        let account = account(&server)?;
        let mut authz = account.get_authorization(&authz_url(1))?;

        let challenge = authz.challenge(&account, ChallengeType::Http01)?;
        assert_eq!(challenge.token()?, "token-2-http-01");

        let mut only_dns = authz_json(1, "pending");
        only_dns["challenges"] = json!([{"type": "dns-01", "url": challenge_url(1, "dns-01")}]);
        authz.refresh_with(raw(only_dns))?;
        assert!(matches!(
            authz.challenge(&account, ChallengeType::Http01),
            Err(Error::ChallengeNotOffered { ref identifier, ref method })
                if identifier == "www.example.com" && method == "http-01"
        ));
        Ok(())
    }

    #[test]
    fn test_deactivate() -> Result<()> {
        let server = MockServer::new();
        let account = account(&server)?;
        let url = authz_url(0);
        let mut authz = account.get_authorization(&url)?;
        server.respond(
            Method::Post,
            &url,
            MockServer::json(200, authz_json(0, "deactivated")),
        );

        authz.deactivate(&account)?;
        assert_eq!(authz.state(), Some(Status::Deactivated));

        let Some(request) = server.last_to(&url) else {
            panic!("authorization was not updated");
        };
        assert_eq!(payload_of(&request), "eyJzdGF0dXMiOiJkZWFjdGl2YXRlZCJ9");
        Ok(())
    }
}

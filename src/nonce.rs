use log::trace;

use crate::{
    error::{Error, Result},
    transport::{HeaderValue, HttpResponse},
};

pub const REPLAY_NONCE: &str = "Replay-Nonce";

/// 單次使用的 nonce 暫存。
///
/// 每個回應的 `Replay-Nonce` 都會覆蓋暫存值，下一個簽章請求取走後即清空，
/// 因此同一個 nonce 不會被兩個請求使用。
#[derive(Debug, Default)]
pub struct NonceCache {
    cached: Option<String>,
}

impl NonceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出並清除暫存的 nonce。
    pub fn take(&mut self) -> Option<String> {
        self.cached.take()
    }

    pub fn is_empty(&self) -> bool {
        self.cached.is_none()
    }

    /// 記錄回應中的 `Replay-Nonce`；沒有或為空時保留原狀。
    ///
    /// # Errors
    ///
    /// 回應含多個 `Replay-Nonce` 時回傳 [`Error::AmbiguousHeader`]。
    pub fn observe(&mut self, response: &HttpResponse) -> Result<()> {
        if let Some(nonce) = replay_nonce(response)? {
            trace!("Cached nonce {nonce}");
            self.cached = Some(nonce);
        }
        Ok(())
    }
}

/// 讀取回應中的 `Replay-Nonce`。
pub fn replay_nonce(response: &HttpResponse) -> Result<Option<String>> {
    match response.header_value(REPLAY_NONCE) {
        HeaderValue::Single(value) if !value.trim().is_empty() => {
            Ok(Some(value.trim().to_string()))
        }
        HeaderValue::Single(_) | HeaderValue::Missing => Ok(None),
        HeaderValue::Repeated(_) => Err(Error::AmbiguousHeader(REPLAY_NONCE.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_is_single_use() -> Result<()> {
        let mut cache = NonceCache::new();
        cache.observe(&HttpResponse::new(200).header("replay-nonce", "n1"))?;

        assert_eq!(cache.take().as_deref(), Some("n1"));
        assert_eq!(cache.take(), None);
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn test_newer_nonce_replaces_older() -> Result<()> {
        let mut cache = NonceCache::new();
        cache.observe(&HttpResponse::new(200).header("Replay-Nonce", "n1"))?;
        cache.observe(&HttpResponse::new(201).header("Replay-Nonce", "n2"))?;
        cache.observe(&HttpResponse::new(200).header("Replay-Nonce", " "))?;

        assert_eq!(cache.take().as_deref(), Some("n2"));
        Ok(())
    }

    #[test]
    fn test_repeated_nonce_header_fails() {
        let mut cache = NonceCache::new();
        let response = HttpResponse::new(200)
            .header("Replay-Nonce", "a")
            .header("Replay-Nonce", "b");

        assert!(matches!(
            cache.observe(&response),
            Err(Error::AmbiguousHeader(_))
        ));
        assert!(cache.is_empty());
    }
}

use std::future::Future;
use std::time::Duration;

use moka::future::Cache;

use crate::error::AppError;

/// One cached bearer token for one external service.
///
/// The TTL sits below the provider's real expiry (MediaValet: 240s under a
/// ~300s token, DocuSign: 3540s under a 3600s token) so a token handed out
/// near the end of its cache life is still valid upstream. Backed by a
/// single-entry moka cache: `try_get_with` coalesces concurrent refreshes,
/// so parallel workflows hitting an expired slot trigger exactly one
/// re-authentication, and a failed refresh is never cached.
pub struct TokenSlot {
    service: &'static str,
    cache: Cache<(), String>,
}

impl TokenSlot {
    pub fn new(service: &'static str, ttl: Duration) -> Self {
        Self {
            service,
            cache: Cache::builder().max_capacity(1).time_to_live(ttl).build(),
        }
    }

    /// Return the cached token, or run `refresh` to mint a new one. The
    /// refresh future is only polled by the single caller that wins the
    /// slot; everyone else waits for its result.
    pub async fn get_or_refresh<Fut>(&self, refresh: Fut) -> Result<String, AppError>
    where
        Fut: Future<Output = Result<String, AppError>> + Send,
    {
        self.cache
            .try_get_with((), refresh)
            .await
            .map_err(|e| AppError::external(self.service, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let slot = Arc::new(TokenSlot::new("test", Duration::from_secs(60)));
        let refreshes = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let slot = slot.clone();
            let refreshes = refreshes.clone();
            handles.push(tokio::spawn(async move {
                slot.get_or_refresh(async move {
                    let n = refreshes.fetch_add(1, Ordering::SeqCst);
                    // slow refresh so the other callers pile up behind it
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(format!("token-{n}"))
                })
                .await
                .unwrap()
            }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap());
        }

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == "token-0"));
    }

    #[tokio::test]
    async fn expired_slot_refreshes_again() {
        let slot = TokenSlot::new("test", Duration::from_millis(200));
        let refreshes = AtomicUsize::new(0);

        let fetch = || async {
            refreshes.fetch_add(1, Ordering::SeqCst);
            Ok("token".to_string())
        };

        slot.get_or_refresh(fetch()).await.unwrap();
        slot.get_or_refresh(fetch()).await.unwrap(); // still fresh
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        slot.get_or_refresh(fetch()).await.unwrap();
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refresh_is_not_cached() {
        let slot = TokenSlot::new("test", Duration::from_secs(60));

        let failed = slot
            .get_or_refresh(async { Err(AppError::external("test", "auth down")) })
            .await;
        assert!(matches!(failed, Err(AppError::ExternalService { .. })));

        let token = slot
            .get_or_refresh(async { Ok("recovered".to_string()) })
            .await
            .unwrap();
        assert_eq!(token, "recovered");
    }
}

//! Per-request authentication context.
//!
//! Pool mode (caller presented a gateway key) holds a pool credential for
//! the request's lifetime and can rotate to another one when a pipeline
//! stage fails; pass-through mode carries the caller's own upstream token
//! and has nothing to rotate or release. Release runs exactly once per
//! request: it is idempotent, and the drop guard covers disconnects and
//! panics on paths that never reach an explicit release.

use std::collections::HashSet;
use std::sync::Arc;

use dragoman_accounts::AccountPool;
use dragoman_config::ConfigStore;
use dragoman_types::{Credential, GatewayError};
use dragoman_upstream::UpstreamClient;

#[derive(Debug)]
pub struct AuthContext {
    token: String,
    credential: Option<Credential>,
    tried: HashSet<String>,
    pool: Option<Arc<AccountPool>>,
}

impl AuthContext {
    pub(crate) fn pool_mode(token: String, credential: Credential, pool: Arc<AccountPool>) -> Self {
        Self {
            token,
            credential: Some(credential),
            tried: HashSet::new(),
            pool: Some(pool),
        }
    }

    pub(crate) fn pass_through(token: String) -> Self {
        Self {
            token,
            credential: None,
            tried: HashSet::new(),
            pool: None,
        }
    }

    /// The upstream bearer token this request runs with.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn is_pool_mode(&self) -> bool {
        self.pool.is_some()
    }

    /// Swap the held credential for an untried one and refresh its token.
    ///
    /// `Ok(false)` means no further candidate exists (or this is a
    /// pass-through request). A login failure on the fresh credential is a
    /// hard error; the credential stays held so release still returns it.
    pub(crate) async fn rotate(
        &mut self,
        client: &UpstreamClient,
        config: &ConfigStore,
    ) -> Result<bool, GatewayError> {
        let Some(pool) = self.pool.clone() else {
            return Ok(false);
        };

        if let Some(credential) = self.credential.take() {
            if let Some(id) = credential.identifier() {
                self.tried.insert(id.to_string());
            }
            pool.release(credential);
        }

        let Some(mut next) = pool.acquire(&self.tried) else {
            return Ok(false);
        };

        match pool.ensure_token(&mut next, client, config).await {
            Ok(token) => {
                self.token = token;
                self.credential = Some(next);
                Ok(true)
            }
            Err(_) => {
                self.credential = Some(next);
                Err(GatewayError::AccountLogin)
            }
        }
    }

    /// Return the held credential to the pool. Safe to call repeatedly;
    /// only the first call does anything.
    pub fn release(&mut self) {
        if let (Some(pool), Some(credential)) = (self.pool.as_ref(), self.credential.take()) {
            pool.release(credential);
        }
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::AuthContext;
    use dragoman_accounts::AccountPool;
    use dragoman_types::Credential;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn pool_with(emails: &[&str]) -> Arc<AccountPool> {
        let seeds = emails
            .iter()
            .map(|email| Credential {
                email: Some((*email).to_string()),
                password: "pw".to_string(),
                ..Credential::default()
            })
            .collect();
        Arc::new(AccountPool::new(seeds))
    }

    #[test]
    fn release_is_idempotent() {
        let pool = pool_with(&["a@x"]);
        let credential = pool.acquire(&HashSet::new()).unwrap();
        let mut ctx = AuthContext::pool_mode("tok".to_string(), credential, Arc::clone(&pool));

        ctx.release();
        ctx.release();

        // Exactly one credential came back.
        assert!(pool.acquire(&HashSet::new()).is_some());
        assert!(pool.acquire(&HashSet::new()).is_none());
    }

    #[test]
    fn drop_releases_the_credential() {
        let pool = pool_with(&["a@x"]);
        {
            let credential = pool.acquire(&HashSet::new()).unwrap();
            let _ctx = AuthContext::pool_mode("tok".to_string(), credential, Arc::clone(&pool));
            assert!(pool.acquire(&HashSet::new()).is_none());
        }
        assert!(pool.acquire(&HashSet::new()).is_some());
    }

    #[test]
    fn pass_through_has_nothing_to_release() {
        let mut ctx = AuthContext::pass_through("caller-token".to_string());
        assert!(!ctx.is_pool_mode());
        assert_eq!(ctx.token(), "caller-token");
        ctx.release();
    }
}

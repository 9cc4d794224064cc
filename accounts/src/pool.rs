//! The credential pool.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;

use dragoman_config::ConfigStore;
use dragoman_types::Credential;
use dragoman_upstream::UpstreamClient;

use crate::{AccountError, token};

#[derive(Debug, Default)]
struct PoolState {
    available: VecDeque<Credential>,
    in_use: HashSet<String>,
}

/// Pool of upstream credentials.
///
/// A credential's identifier is in `in_use` exactly while the credential
/// itself is held by a request; held credentials are moved out of the pool
/// by value, so token refreshes mutate them without any shared state. One
/// mutex guards the bookkeeping and is never held across an await point.
#[derive(Debug)]
pub struct AccountPool {
    state: Mutex<PoolState>,
}

impl AccountPool {
    /// Build a pool from credential seeds. The seed order is shuffled so
    /// account wear spreads across process restarts.
    #[must_use]
    pub fn new(mut seeds: Vec<Credential>) -> Self {
        seeds.shuffle(&mut rand::rng());
        Self {
            state: Mutex::new(PoolState {
                available: seeds.into(),
                in_use: HashSet::new(),
            }),
        }
    }

    /// Take the first eligible credential, skipping identifiers in
    /// `exclude` and anything already held.
    ///
    /// Scans the available queue at most once around its current length and
    /// never waits; `None` means the caller must surface a capacity
    /// condition. No fairness is promised, only mutual exclusion.
    #[must_use]
    pub fn acquire(&self, exclude: &HashSet<String>) -> Option<Credential> {
        let mut state = self.state.lock().expect("pool lock poisoned");

        for _ in 0..state.available.len() {
            let credential = state.available.pop_front()?;
            let Some(id) = credential.identifier().map(str::to_string) else {
                state.available.push_back(credential);
                continue;
            };
            if exclude.contains(&id) || state.in_use.contains(&id) {
                state.available.push_back(credential);
                continue;
            }

            state.in_use.insert(id.clone());
            tracing::info!(account = %id, "acquired credential");
            return Some(credential);
        }

        tracing::warn!("no credential available: pool empty or all in use");
        None
    }

    /// Return a credential to the pool. Unknown identifiers are a no-op on
    /// the in-use set; the credential itself is always requeued.
    pub fn release(&self, credential: Credential) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        if let Some(id) = credential.identifier() {
            state.in_use.remove(id);
            tracing::info!(account = %id, "released credential");
        }
        state.available.push_back(credential);
    }

    /// Return the credential's token, refreshing it first when it is
    /// missing or inside the expiry margin.
    ///
    /// A refresh logs in with the credential's secrets, stores the new
    /// token on the credential, and writes it back through the injected
    /// configuration store.
    pub async fn ensure_token(
        &self,
        credential: &mut Credential,
        client: &UpstreamClient,
        config: &ConfigStore,
    ) -> Result<String, AccountError> {
        let now = unix_now();
        if let Some(current) = credential.token()
            && !token::needs_refresh(Some(current), now)
        {
            return Ok(current.to_string());
        }

        let email = credential
            .email
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let mobile = credential
            .mobile
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let new_token = client
            .login(email, mobile, credential.password.trim())
            .await
            .map_err(|e| {
                tracing::error!(
                    account = credential.identifier().unwrap_or("<unidentified>"),
                    error = %e,
                    "login failed"
                );
                AccountError::Login(e)
            })?;

        credential.token = Some(new_token.clone());
        credential.token_obtained_at = Some(SystemTime::now());
        if let Some(id) = credential.identifier() {
            config.update_account_token(id, &new_token);
        }
        Ok(new_token)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

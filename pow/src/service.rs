//! Challenge-to-answer-header service: cache, solve, encode.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use sha2::{Digest, Sha256};

use dragoman_types::Challenge;

use crate::cache::{DEFAULT_TTL, NonceCache};
use crate::solver::{SolveError, Solver};
use crate::PowError;

/// Wire shape of the solved answer. Field order is the key order the
/// upstream expects inside the base64 payload; do not reorder.
#[derive(Serialize)]
struct PowAnswer<'a> {
    algorithm: &'a str,
    challenge: &'a str,
    salt: &'a str,
    answer: u64,
    signature: &'a str,
    target_path: &'a str,
}

/// Solves challenges through a [`Solver`], caching nonces keyed by the
/// (challenge, difficulty) pair.
pub struct PowService {
    solver: Arc<dyn Solver>,
    cache: NonceCache,
}

impl PowService {
    pub fn new(solver: Arc<dyn Solver>) -> Self {
        Self {
            solver,
            cache: NonceCache::new(),
        }
    }

    /// Produce the encoded answer header for a challenge.
    ///
    /// `Ok(None)` means "could not solve this one" - malformed challenge
    /// fields or a puzzle with no solution - and is retryable by fetching a
    /// fresh challenge (possibly on a rotated credential). An unsupported
    /// algorithm is an error: no amount of retrying changes what this build
    /// can solve.
    pub async fn answer_header(&self, challenge: &Challenge) -> Result<Option<String>, PowError> {
        let key = cache_key(challenge);
        if let Some(nonce) = self.cache.get(&key) {
            return Ok(Some(encode_answer(challenge, nonce)));
        }

        if challenge.challenge.is_empty()
            || challenge.salt.is_empty()
            || challenge.algorithm.is_empty()
            || challenge.expire_at <= 0
        {
            tracing::warn!("PoW challenge is missing required fields");
            return Ok(None);
        }

        let solver = Arc::clone(&self.solver);
        let owned = challenge.clone();
        let solved = tokio::task::spawn_blocking(move || solver.solve(&owned)).await;

        let nonce = match solved {
            Ok(Ok(Some(nonce))) => nonce,
            Ok(Ok(None)) => {
                tracing::warn!("puzzle reported no solution");
                return Ok(None);
            }
            Ok(Err(SolveError::UnsupportedAlgorithm(name))) => {
                return Err(PowError::UnsupportedAlgorithm(name));
            }
            Ok(Err(e)) => {
                tracing::error!(%e, "puzzle execution failed");
                return Ok(None);
            }
            Err(e) => {
                tracing::error!(%e, "puzzle worker task failed");
                return Ok(None);
            }
        };

        self.cache.set(key, nonce, entry_ttl(challenge.expire_at));
        Ok(Some(encode_answer(challenge, nonce)))
    }
}

/// Cache entries never outlive the challenge they answer: TTL is the
/// remaining challenge validity capped at the default, floored at 1s.
fn entry_ttl(expire_at: i64) -> Duration {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let remaining = (expire_at - now).clamp(1, DEFAULT_TTL.as_secs() as i64);
    Duration::from_secs(remaining as u64)
}

fn cache_key(challenge: &Challenge) -> String {
    let digest = Sha256::digest(format!("{}|{}", challenge.challenge, challenge.difficulty));
    format!("{digest:x}")
}

fn encode_answer(challenge: &Challenge, nonce: u64) -> String {
    let answer = PowAnswer {
        algorithm: &challenge.algorithm,
        challenge: &challenge.challenge,
        salt: &challenge.salt,
        answer: nonce,
        signature: &challenge.signature,
        target_path: &challenge.target_path,
    };
    let compact = serde_json::to_string(&answer).expect("answer serializes");
    BASE64.encode(compact)
}

#[cfg(test)]
mod tests {
    use super::{PowService, cache_key, encode_answer};
    use crate::solver::{SolveError, Solver};
    use crate::PowError;
    use dragoman_types::Challenge;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSolver {
        calls: AtomicUsize,
        result: Result<Option<u64>, fn() -> SolveError>,
    }

    impl StubSolver {
        fn returning(nonce: Option<u64>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: Ok(nonce),
            }
        }
    }

    impl Solver for StubSolver {
        fn solve(&self, _challenge: &Challenge) -> Result<Option<u64>, SolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(nonce) => Ok(*nonce),
                Err(make) => Err(make()),
            }
        }
    }

    fn challenge() -> Challenge {
        Challenge {
            algorithm: "DeepSeekHashV1".to_string(),
            challenge: "abc".to_string(),
            salt: "s1".to_string(),
            difficulty: 144_000,
            expire_at: far_future(),
            signature: "sig".to_string(),
            target_path: "/api/v0/chat/completion".to_string(),
        }
    }

    fn far_future() -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
            + 3600
    }

    #[tokio::test]
    async fn identical_challenges_solve_once() {
        let solver = Arc::new(StubSolver::returning(Some(42)));
        let service = PowService::new(Arc::clone(&solver) as Arc<dyn Solver>);

        let first = service.answer_header(&challenge()).await.unwrap();
        let second = service.answer_header(&challenge()).await.unwrap();

        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsolvable_puzzle_is_retryable_none() {
        let solver = Arc::new(StubSolver::returning(None));
        let service = PowService::new(Arc::clone(&solver) as Arc<dyn Solver>);
        assert!(service.answer_header(&challenge()).await.unwrap().is_none());
        // A later identical challenge solves again: no caching of failures.
        assert!(service.answer_header(&challenge()).await.unwrap().is_none());
        assert_eq!(solver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsupported_algorithm_is_an_error() {
        let solver = Arc::new(StubSolver {
            calls: AtomicUsize::new(0),
            result: Err(|| SolveError::UnsupportedAlgorithm("OtherHash".to_string())),
        });
        let service = PowService::new(solver as Arc<dyn Solver>);
        let err = service.answer_header(&challenge()).await.unwrap_err();
        assert!(matches!(err, PowError::UnsupportedAlgorithm(_)));
    }

    #[tokio::test]
    async fn incomplete_challenge_never_reaches_the_solver() {
        let solver = Arc::new(StubSolver::returning(Some(1)));
        let service = PowService::new(Arc::clone(&solver) as Arc<dyn Solver>);
        let mut bad = challenge();
        bad.salt = String::new();
        assert!(service.answer_header(&bad).await.unwrap().is_none());
        assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn answer_header_key_order_is_fixed() {
        use base64::Engine as _;
        let encoded = encode_answer(&challenge(), 42);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        let text = String::from_utf8(decoded).unwrap();
        let expected = concat!(
            "{\"algorithm\":\"DeepSeekHashV1\",\"challenge\":\"abc\",\"salt\":\"s1\",",
            "\"answer\":42,\"signature\":\"sig\",\"target_path\":\"/api/v0/chat/completion\"}"
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn cache_key_depends_on_challenge_and_difficulty() {
        let base = challenge();
        let mut harder = challenge();
        harder.difficulty = 288_000;
        assert_ne!(cache_key(&base), cache_key(&harder));

        let mut other_salt = challenge();
        other_salt.salt = "different".to_string();
        assert_eq!(cache_key(&base), cache_key(&other_salt));
    }
}

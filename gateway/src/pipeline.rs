//! The request pipeline: auth mode resolution, staged retries with
//! credential rotation, and hand-off to the protocol encoders.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::mpsc;

use dragoman_accounts::AccountPool;
use dragoman_config::ConfigStore;
use dragoman_pow::{PowError, PowService, Solver};
use dragoman_types::{
    ClaudeRequest, GatewayError, ModelModes, OpenAiRequest, resolve_model,
};
use dragoman_upstream::{CompletionPayload, UpstreamClient};

use crate::auth::AuthContext;
use crate::bridge::{self, StreamItem};
use crate::{claude, openai, prompt, tokens};

/// Attempts per pipeline stage (session creation, PoW acquisition).
const STAGE_ATTEMPTS: usize = 3;

/// Keep-alive cadence of the OpenAI streaming surface.
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Bound of the outbound frame channel handed to the HTTP layer.
const FRAME_CHANNEL_CAPACITY: usize = 16;

/// What a chat operation hands back to the HTTP layer.
#[derive(Debug)]
pub enum ChatOutcome {
    /// One JSON body.
    Buffered(Value),
    /// Ready-to-write SSE frames; serve under `text/event-stream`.
    Streaming(mpsc::Receiver<String>),
}

/// Composition root for the request pipeline.
pub struct Gateway {
    config: Arc<ConfigStore>,
    pool: Arc<AccountPool>,
    client: UpstreamClient,
    pow: Arc<PowService>,
    keep_alive: Duration,
}

impl Gateway {
    /// Build a gateway over a configuration store and a puzzle solver.
    pub fn new(config: Arc<ConfigStore>, solver: Arc<dyn Solver>) -> Result<Self, GatewayError> {
        let client = UpstreamClient::new().map_err(|e| {
            tracing::error!(%e, "failed to build upstream client");
            GatewayError::Internal
        })?;
        let pool = Arc::new(AccountPool::new(config.accounts()));
        Ok(Self {
            config,
            pool,
            client,
            pow: Arc::new(PowService::new(solver)),
            keep_alive: DEFAULT_KEEP_ALIVE,
        })
    }

    /// Swap the upstream client; used by tests to point at a mock origin.
    #[must_use]
    pub fn with_upstream_client(mut self, client: UpstreamClient) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Resolve the caller's auth mode from the Authorization header value.
    ///
    /// A gateway key selects pool mode: a credential is acquired and its
    /// token refreshed if needed. Anything else is pass-through: the bearer
    /// value itself is used as the upstream token.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
    ) -> Result<AuthContext, GatewayError> {
        let bearer = authorization
            .unwrap_or("")
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or(GatewayError::Auth)?;

        if !self.config.keys().iter().any(|key| key.as_str() == bearer) {
            return Ok(AuthContext::pass_through(bearer.to_string()));
        }

        let Some(mut credential) = self.pool.acquire(&HashSet::new()) else {
            return Err(GatewayError::Capacity);
        };
        match self
            .pool
            .ensure_token(&mut credential, &self.client, &self.config)
            .await
        {
            Ok(token) => Ok(AuthContext::pool_mode(
                token,
                credential,
                Arc::clone(&self.pool),
            )),
            Err(_) => {
                self.pool.release(credential);
                Err(GatewayError::AccountLogin)
            }
        }
    }

    async fn create_session_with_retry(
        &self,
        ctx: &mut AuthContext,
    ) -> Result<String, GatewayError> {
        for _ in 0..STAGE_ATTEMPTS {
            if let Some(session_id) = self.client.create_session(ctx.token()).await {
                return Ok(session_id);
            }
            if ctx.is_pool_mode() {
                ctx.rotate(&self.client, &self.config).await?;
            }
        }
        Err(GatewayError::Session)
    }

    async fn pow_header_with_retry(&self, ctx: &mut AuthContext) -> Result<String, GatewayError> {
        for _ in 0..STAGE_ATTEMPTS {
            let Some(challenge) = self.client.create_pow_challenge(ctx.token()).await else {
                if ctx.is_pool_mode() {
                    ctx.rotate(&self.client, &self.config).await?;
                }
                continue;
            };

            match self.pow.answer_header(&challenge).await {
                Ok(Some(header)) => return Ok(header),
                Ok(None) => {
                    // A solve failure counts the same as a fetch failure.
                    if ctx.is_pool_mode() {
                        ctx.rotate(&self.client, &self.config).await?;
                    }
                }
                Err(PowError::UnsupportedAlgorithm(name)) => {
                    return Err(GatewayError::UnsupportedAlgorithm(name));
                }
            }
        }
        Err(GatewayError::Pow)
    }

    /// Run the session/PoW/completion stages and return the completion id
    /// plus the bridged event stream.
    async fn run_completion(
        &self,
        ctx: &mut AuthContext,
        prompt_text: String,
        modes: ModelModes,
    ) -> Result<(String, mpsc::Receiver<StreamItem>), GatewayError> {
        let session_id = self.create_session_with_retry(ctx).await?;
        let pow_header = self.pow_header_with_retry(ctx).await?;

        let payload = CompletionPayload {
            chat_session_id: session_id.clone(),
            parent_message_id: None,
            prompt: prompt_text,
            ref_file_ids: Vec::new(),
            thinking_enabled: modes.thinking,
            search_enabled: modes.search,
        };

        let response = self
            .client
            .submit_completion(ctx.token(), &pow_header, &payload)
            .await
            .map_err(|e| {
                tracing::error!(%e, "completion submission failed");
                GatewayError::Completion
            })?;

        Ok((session_id, bridge::spawn_producer(response)))
    }

    /// OpenAI-style chat completion, streaming or buffered per the request.
    pub async fn openai_chat(
        &self,
        authorization: Option<&str>,
        request: OpenAiRequest,
    ) -> Result<ChatOutcome, GatewayError> {
        if request.model.is_empty() || request.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "Request must include 'model' and 'messages'.".to_string(),
            ));
        }
        let modes = resolve_model(&request.model)
            .ok_or_else(|| GatewayError::ModelUnavailable(request.model.clone()))?;

        let prompt_text = prompt::prepare_prompt(&request.messages);

        let mut ctx = self.authenticate(authorization).await?;
        let (completion_id, events) =
            match self.run_completion(&mut ctx, prompt_text.clone(), modes).await {
                Ok(started) => started,
                Err(e) => {
                    ctx.release();
                    return Err(e);
                }
            };

        let params = openai::OpenAiEncodeParams {
            model: request.model.clone(),
            completion_id,
            created: unix_now(),
            prompt: prompt_text,
            reasoning_requested: modes.thinking,
            search_enabled: modes.search,
            keep_alive: self.keep_alive,
        };

        if request.stream {
            let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
            tokio::spawn(async move {
                openai::stream_sse(events, params, frames_tx).await;
                // Credential goes back only after the stream has ended.
                ctx.release();
            });
            Ok(ChatOutcome::Streaming(frames_rx))
        } else {
            let body = openai::collect_buffered(events, &params).await;
            ctx.release();
            Ok(ChatOutcome::Buffered(body))
        }
    }

    /// Anthropic-style messages operation, streaming or buffered.
    pub async fn claude_messages(
        &self,
        authorization: Option<&str>,
        request: ClaudeRequest,
    ) -> Result<ChatOutcome, GatewayError> {
        if request.model.is_empty() || request.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "Request must include 'model' and 'messages'.".to_string(),
            ));
        }

        let mapping = self.config.claude_model_mapping();
        let (gateway_model, mut messages) = prompt::claude_to_upstream(&request, &mapping);
        if !request.tools.is_empty() && !prompt::has_system_message(&messages) {
            messages.insert(0, prompt::tool_system_message(&request.tools));
        }

        // Unknown mapped models fall back to plain chat on this surface.
        let modes = resolve_model(&gateway_model).unwrap_or_default();
        let prompt_text = prompt::prepare_prompt(&messages);
        let input_tokens = tokens::estimate_messages(&request.messages);

        let mut ctx = self.authenticate(authorization).await?;
        let (_session_id, events) =
            match self.run_completion(&mut ctx, prompt_text, modes).await {
                Ok(started) => started,
                Err(e) => {
                    ctx.release();
                    return Err(e);
                }
            };

        let params = claude::ClaudeEncodeParams {
            model: request.model.clone(),
            input_tokens,
            reasoning_requested: modes.thinking,
        };

        if request.stream {
            let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
            let tools = request.tools.clone();
            tokio::spawn(async move {
                claude::stream_sse(events, params, tools, frames_tx).await;
                ctx.release();
            });
            Ok(ChatOutcome::Streaming(frames_rx))
        } else {
            let body = claude::buffered_response(events, &params, &request.tools).await;
            ctx.release();
            Ok(ChatOutcome::Buffered(body))
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

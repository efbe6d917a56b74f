//! Sync Push Client
//!
//! Pushes newly-ledgered signals to the downstream receiver. Transient
//! transport failures are retried with jittered exponential backoff; an
//! authentication failure or hash mismatch is never retried automatically
//! and is surfaced for operator attention.

use anyhow::{bail, Context, Result};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::models::Signal;

use super::{sign_content_hash, SIGNATURE_HEADER, STATUS_DUPLICATE, STATUS_STORED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,
    DuplicateIgnored,
}

#[derive(Debug, Deserialize)]
struct AckBody {
    status: String,
}

pub struct SyncClient {
    client: Client,
    receiver_url: String,
    shared_secret: String,
    retry_attempts: u32,
    retry_backoff_ms: u64,
}

impl SyncClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent("signalgrid/1.0")
            .build()
            .context("Failed to build sync HTTP client")?;

        Ok(Self {
            client,
            receiver_url: config.receiver_url.trim_end_matches('/').to_string(),
            shared_secret: config.shared_secret.clone(),
            retry_attempts: config.retry_attempts.max(1),
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    /// Push one ledgered signal. Safe to retry: the receiver treats a
    /// duplicate content hash as success.
    pub async fn push(&self, signal: &Signal) -> Result<PushOutcome> {
        let url = format!("{}/signal", self.receiver_url);
        let signature = sign_content_hash(&self.shared_secret, &signal.content_hash);

        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            let response = self
                .client
                .post(&url)
                .header(SIGNATURE_HEADER, &signature)
                .json(signal)
                .send()
                .await;

            match response {
                Ok(response) => match response.status() {
                    StatusCode::OK => {
                        let ack: AckBody = response
                            .json()
                            .await
                            .context("Failed to parse sync receiver ack")?;
                        return match ack.status.as_str() {
                            STATUS_STORED => {
                                info!(
                                    hash = %signal.content_hash,
                                    instrument = %signal.instrument,
                                    "signal synced downstream"
                                );
                                Ok(PushOutcome::Stored)
                            }
                            STATUS_DUPLICATE => {
                                info!(
                                    hash = %signal.content_hash,
                                    "receiver already held this signal"
                                );
                                Ok(PushOutcome::DuplicateIgnored)
                            }
                            other => bail!("sync receiver returned unknown status '{other}'"),
                        };
                    }
                    StatusCode::UNAUTHORIZED => {
                        bail!("sync authentication failed; check the shared secret")
                    }
                    StatusCode::UNPROCESSABLE_ENTITY => {
                        bail!(
                            "sync receiver reported a content hash mismatch for {}",
                            signal.content_hash
                        )
                    }
                    status => {
                        warn!(attempt, %status, "sync push rejected, will retry");
                        last_error = Some(anyhow::anyhow!("receiver returned {status}"));
                    }
                },
                Err(e) => {
                    warn!(attempt, error = %e, "sync push transport failure, will retry");
                    last_error = Some(e.into());
                }
            }

            if attempt < self.retry_attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("sync push failed"))
            .context(format!(
                "sync push exhausted {} attempts",
                self.retry_attempts
            )))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .retry_backoff_ms
            .saturating_mul(1u64 << (attempt - 1).min(6));
        let jitter = rand::thread_rng().gen_range(0..=self.retry_backoff_ms.max(1) / 2);
        Duration::from_millis(base + jitter)
    }
}

//! Source Connectors
//! Mission: Pull provider opinions without ever blocking the cycle
//!
//! Every provider call is independently bounded by a short timeout and the
//! per-cycle fan-out is a bounded join: a slow or failing provider becomes
//! an abstention for that cycle, never an error.

pub mod marketmind;
pub mod pulsefeed;
pub mod tapefeed;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::warn;

use crate::config::{ProviderConfig, ProviderKind};
use crate::models::Vote;

#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Fetch a snapshot and emit this provider's directional opinion.
    /// No side effects beyond the network call.
    async fn fetch(&self, instrument: &str) -> Result<Vote>;
}

/// Instantiate the configured provider connectors
pub fn build_connectors(
    providers: &[ProviderConfig],
    timeout: Duration,
) -> Vec<Arc<dyn SourceConnector>> {
    providers
        .iter()
        .map(|p| -> Arc<dyn SourceConnector> {
            match p.kind {
                ProviderKind::Pulsefeed => Arc::new(pulsefeed::PulsefeedConnector::new(p, timeout)),
                ProviderKind::Marketmind => {
                    Arc::new(marketmind::MarketmindConnector::new(p, timeout))
                }
                ProviderKind::Tapefeed => Arc::new(tapefeed::TapefeedConnector::new(p, timeout)),
            }
        })
        .collect()
}

/// Invoke all connectors concurrently and collect the votes that arrived
/// within the per-call timeout. Timeouts and transport errors are logged
/// abstentions; the cycle proceeds with whoever responded.
pub async fn gather_votes(
    connectors: &[Arc<dyn SourceConnector>],
    instrument: &str,
    per_call_timeout: Duration,
) -> Vec<Vote> {
    let calls = connectors.iter().map(|connector| {
        let connector = connector.clone();
        let instrument = instrument.to_string();
        async move {
            match tokio::time::timeout(per_call_timeout, connector.fetch(&instrument)).await {
                Ok(Ok(vote)) => Some(vote),
                Ok(Err(e)) => {
                    warn!(
                        provider = connector.provider_id(),
                        instrument = %instrument,
                        error = %e,
                        "provider abstained (fetch failed)"
                    );
                    None
                }
                Err(_) => {
                    warn!(
                        provider = connector.provider_id(),
                        instrument = %instrument,
                        timeout_ms = per_call_timeout.as_millis() as u64,
                        "provider abstained (timeout)"
                    );
                    None
                }
            }
        }
    });

    join_all(calls).await.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::Utc;

    struct StubConnector {
        id: &'static str,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl SourceConnector for StubConnector {
        fn provider_id(&self) -> &str {
            self.id
        }

        async fn fetch(&self, _instrument: &str) -> Result<Vote> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                anyhow::bail!("transport error");
            }
            Ok(Vote {
                provider_id: self.id.to_string(),
                direction: Direction::Long,
                raw_confidence: 80.0,
                observed_price: 100.0,
                observed_at: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn slow_and_failing_providers_abstain() {
        let connectors: Vec<Arc<dyn SourceConnector>> = vec![
            Arc::new(StubConnector {
                id: "fast",
                delay: Duration::from_millis(1),
                fail: false,
            }),
            Arc::new(StubConnector {
                id: "slow",
                delay: Duration::from_secs(10),
                fail: false,
            }),
            Arc::new(StubConnector {
                id: "broken",
                delay: Duration::from_millis(1),
                fail: true,
            }),
        ];

        let votes = gather_votes(&connectors, "BTC-USD", Duration::from_millis(100)).await;
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].provider_id, "fast");
    }

    #[tokio::test]
    async fn all_connectors_polled_concurrently() {
        let connectors: Vec<Arc<dyn SourceConnector>> = (0..4)
            .map(|i| -> Arc<dyn SourceConnector> {
                Arc::new(StubConnector {
                    id: Box::leak(format!("p{i}").into_boxed_str()),
                    delay: Duration::from_millis(50),
                    fail: false,
                })
            })
            .collect();

        let started = std::time::Instant::now();
        let votes = gather_votes(&connectors, "BTC-USD", Duration::from_millis(500)).await;
        assert_eq!(votes.len(), 4);
        // Sequential calls would take ~200ms; the bounded join overlaps them
        assert!(started.elapsed() < Duration::from_millis(180));
    }
}

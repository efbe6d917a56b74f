//! Sync Receiver
//!
//! The downstream end of the two-ledger sync. Verifies the request
//! signature (constant-time) and the signal's content hash before storing
//! into its own append-only ledger. Four distinct outcomes: stored,
//! duplicate-ignored, authentication failed, hash mismatch.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::ledger::{self, Appended, LedgerStore};
use crate::models::Signal;

use super::{
    verify_signature, SIGNATURE_HEADER, STATUS_AUTH_FAILED, STATUS_DUPLICATE,
    STATUS_HASH_MISMATCH, STATUS_STORED,
};

pub struct ReceiverState {
    pub store: Arc<LedgerStore>,
    pub shared_secret: String,
}

#[derive(Debug, Serialize)]
pub struct SyncAck {
    pub status: &'static str,
}

pub fn router(state: Arc<ReceiverState>) -> Router {
    Router::new()
        .route("/signal", post(receive_signal))
        .with_state(state)
}

/// POST /signal
pub async fn receive_signal(
    State(state): State<Arc<ReceiverState>>,
    headers: HeaderMap,
    Json(signal): Json<Signal>,
) -> (StatusCode, Json<SyncAck>) {
    let presented = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !verify_signature(&state.shared_secret, &signal.content_hash, presented) {
        warn!(
            hash = %signal.content_hash,
            "sync request failed authentication"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(SyncAck {
                status: STATUS_AUTH_FAILED,
            }),
        );
    }

    // Independently re-verify integrity before storing. A mismatch is a
    // security-relevant event, rejected outright and never corrected.
    let recomputed = ledger::content_hash(&signal.as_draft());
    if recomputed != signal.content_hash {
        error!(
            claimed = %signal.content_hash,
            recomputed = %recomputed,
            instrument = %signal.instrument,
            "🚨 content hash mismatch on sync receipt"
        );
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(SyncAck {
                status: STATUS_HASH_MISMATCH,
            }),
        );
    }

    match state.store.append(&signal.as_draft()) {
        Ok(Appended::Inserted(stored)) => {
            info!(
                hash = %stored.content_hash,
                sequence = stored.sequence_index,
                "sync signal stored"
            );
            (
                StatusCode::OK,
                Json(SyncAck {
                    status: STATUS_STORED,
                }),
            )
        }
        Ok(Appended::Duplicate(_)) => (
            StatusCode::OK,
            Json(SyncAck {
                status: STATUS_DUPLICATE,
            }),
        ),
        Err(e) => {
            error!(error = %e, "failed to store synced signal");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SyncAck { status: "error" }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::content_hash;
    use crate::models::{Regime, SignalAction, SignalDraft};
    use crate::sync::sign_content_hash;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn state() -> Arc<ReceiverState> {
        Arc::new(ReceiverState {
            store: Arc::new(LedgerStore::new(":memory:").expect("store")),
            shared_secret: "test-secret".to_string(),
        })
    }

    fn signal() -> Signal {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let draft = SignalDraft {
            id: Uuid::new_v4(),
            instrument: "BTC-USD".to_string(),
            action: SignalAction::Buy,
            entry_price: 100.0,
            stop_price: 98.0,
            target_price: 104.0,
            position_size: 0.02,
            confidence: 84.25,
            regime: Regime::TrendingUp,
            rationale: "test".to_string(),
            created_at: created,
            retention_expires_at: created + chrono::Duration::days(90),
        };
        let hash = content_hash(&draft);
        Signal {
            id: draft.id,
            instrument: draft.instrument.clone(),
            action: draft.action,
            entry_price: draft.entry_price,
            stop_price: draft.stop_price,
            target_price: draft.target_price,
            position_size: draft.position_size,
            confidence: draft.confidence,
            regime: draft.regime,
            rationale: draft.rationale.clone(),
            content_hash: hash,
            previous_hash: "sender-side-link".to_string(),
            sequence_index: 42,
            created_at: draft.created_at,
            retention_expires_at: draft.retention_expires_at,
        }
    }

    fn signed_headers(secret: &str, hash: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            sign_content_hash(secret, hash).parse().unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn valid_push_is_stored() {
        let state = state();
        let signal = signal();
        let headers = signed_headers("test-secret", &signal.content_hash);

        let (code, ack) = receive_signal(State(state.clone()), headers, Json(signal)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(ack.status, STATUS_STORED);
        assert_eq!(state.store.len(), 1);
    }

    #[tokio::test]
    async fn repeated_push_is_duplicate_ignored() {
        let state = state();
        let signal = signal();
        let headers = signed_headers("test-secret", &signal.content_hash);

        let (first, ack) =
            receive_signal(State(state.clone()), headers.clone(), Json(signal.clone())).await;
        assert_eq!(first, StatusCode::OK);
        assert_eq!(ack.status, STATUS_STORED);

        let (second, ack) = receive_signal(State(state.clone()), headers, Json(signal)).await;
        assert_eq!(second, StatusCode::OK);
        assert_eq!(ack.status, STATUS_DUPLICATE);

        // Storage still contains exactly one record
        assert_eq!(state.store.len(), 1);
    }

    #[tokio::test]
    async fn bad_secret_is_rejected() {
        let state = state();
        let signal = signal();
        let headers = signed_headers("wrong-secret", &signal.content_hash);

        let (code, ack) = receive_signal(State(state.clone()), headers, Json(signal)).await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
        assert_eq!(ack.status, STATUS_AUTH_FAILED);
        assert_eq!(state.store.len(), 0);
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let state = state();
        let (code, _) = receive_signal(State(state.clone()), HeaderMap::new(), Json(signal())).await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn tampered_body_is_hash_mismatch() {
        let state = state();
        let mut signal = signal();
        let headers = signed_headers("test-secret", &signal.content_hash);
        signal.entry_price = 999.0;

        let (code, ack) = receive_signal(State(state.clone()), headers, Json(signal)).await;
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ack.status, STATUS_HASH_MISMATCH);
        assert_eq!(state.store.len(), 0);
    }
}

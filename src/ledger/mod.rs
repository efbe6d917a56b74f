//! Signal Ledger
//! Mission: Tamper-evident, append-only record of every finalized signal
//!
//! Every signal's content hash is a SHA-256 over a canonical serialization
//! of its draft fields; each entry links to the previous entry's hash,
//! forming a verifiable chain back to a fixed genesis sentinel.

pub mod store;

pub use store::{Appended, LedgerStore, RejectionRecord};

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

use crate::models::{Signal, SignalDraft};

/// Sentinel `previous_hash` of the first chain entry
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Deterministic serialization of the hashed field set.
///
/// Field order is fixed and floats use fixed-precision formatting so the
/// same draft always canonicalizes to the same bytes. The ledger-assigned
/// fields (hash, chain link, sequence) are outside the hashed content.
pub fn canonical_content(draft: &SignalDraft) -> String {
    format!(
        "id={}|instrument={}|action={}|entry={:.8}|stop={:.8}|target={:.8}|size={:.8}|confidence={:.4}|regime={}|rationale={}|created_at={}|retention_expires_at={}",
        draft.id,
        draft.instrument,
        draft.action.as_str(),
        draft.entry_price,
        draft.stop_price,
        draft.target_price,
        draft.position_size,
        draft.confidence,
        draft.regime.as_str(),
        draft.rationale,
        draft.created_at.to_rfc3339(),
        draft.retention_expires_at.to_rfc3339(),
    )
}

/// Hex SHA-256 of the canonical content
pub fn content_hash(draft: &SignalDraft) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_content(draft).as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify an entire chain in ascending sequence order: every stored hash
/// must match a recomputation over the entry's fields, and every entry's
/// `previous_hash` must equal its predecessor's `content_hash`.
pub fn verify_chain(entries: &[Signal]) -> Result<()> {
    let mut expected_previous = GENESIS_HASH.to_string();

    for entry in entries {
        let recomputed = content_hash(&entry.as_draft());
        if recomputed != entry.content_hash {
            bail!(
                "content hash mismatch at sequence {}: stored {} recomputed {}",
                entry.sequence_index,
                entry.content_hash,
                recomputed
            );
        }
        if entry.previous_hash != expected_previous {
            bail!(
                "broken chain link at sequence {}: previous_hash {} expected {}",
                entry.sequence_index,
                entry.previous_hash,
                expected_previous
            );
        }
        expected_previous = entry.content_hash.clone();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Regime, SignalAction};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn draft(instrument: &str) -> SignalDraft {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        SignalDraft {
            id: Uuid::nil(),
            instrument: instrument.to_string(),
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
        }
    }

    fn chain_entry(instrument: &str, sequence: i64, previous: &str) -> Signal {
        let d = draft(instrument);
        let hash = content_hash(&d);
        Signal {
            id: d.id,
            instrument: d.instrument,
            action: d.action,
            entry_price: d.entry_price,
            stop_price: d.stop_price,
            target_price: d.target_price,
            position_size: d.position_size,
            confidence: d.confidence,
            regime: d.regime,
            rationale: d.rationale,
            content_hash: hash,
            previous_hash: previous.to_string(),
            sequence_index: sequence,
            created_at: d.created_at,
            retention_expires_at: d.retention_expires_at,
        }
    }

    #[test]
    fn canonical_content_is_deterministic() {
        assert_eq!(canonical_content(&draft("BTC-USD")), canonical_content(&draft("BTC-USD")));
        assert_eq!(content_hash(&draft("BTC-USD")), content_hash(&draft("BTC-USD")));
    }

    #[test]
    fn any_field_change_changes_the_hash() {
        let base = draft("BTC-USD");
        let mut modified = base.clone();
        modified.entry_price += 0.000001;
        assert_ne!(content_hash(&base), content_hash(&modified));

        let mut modified = base.clone();
        modified.rationale.push('!');
        assert_ne!(content_hash(&base), content_hash(&modified));
    }

    #[test]
    fn intact_chain_verifies() {
        let first = chain_entry("BTC-USD", 1, GENESIS_HASH);
        let second = chain_entry("ETH-USD", 2, &first.content_hash);
        verify_chain(&[first, second]).expect("chain should verify");
    }

    #[test]
    fn tampered_entry_is_detected() {
        let first = chain_entry("BTC-USD", 1, GENESIS_HASH);
        let mut second = chain_entry("ETH-USD", 2, &first.content_hash);
        second.entry_price = 999.0;
        assert!(verify_chain(&[first, second]).is_err());
    }

    #[test]
    fn broken_link_is_detected() {
        let first = chain_entry("BTC-USD", 1, GENESIS_HASH);
        let second = chain_entry("ETH-USD", 2, GENESIS_HASH);
        assert!(verify_chain(&[first, second]).is_err());
    }
}

//! Consensus determination over a finalized vote set.

use std::collections::BTreeMap;

use witness_crypto::WitnessActor;
use witness_types::EvidenceKey;

use crate::session::Vote;

/// Votes required before a summary can be trusted, regardless of agreement.
pub const QUORUM_FLOOR: usize = 3;

/// All votes that carried the same evidence bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct Evidence {
    pub key: EvidenceKey,
    pub evidence: Vec<u8>,
    /// Sorted by actor name.
    pub supporters: Vec<WitnessActor>,
    /// Share of all votes, 0..=100.
    pub percent: f64,
}

impl Evidence {
    pub fn support(&self) -> usize {
        self.supporters.len()
    }
}

/// Outcome of one election session.
///
/// `is_trustable` and `is_adoptable` are independent: one unanimous vote is
/// adoptable but not trustable, and a well-attended tie is trustable but not
/// adoptable.
#[derive(Clone, Debug, PartialEq)]
pub struct ElectionSummary {
    /// Descending by support; ties ordered by key.
    pub evidences: Vec<Evidence>,
    pub total_votes: usize,
    pub is_trustable: bool,
    pub is_adoptable: bool,
    /// The leading evidence, present iff `is_adoptable`.
    pub adopted_evidence: Option<Vec<u8>>,
}

impl ElectionSummary {
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        let mut buckets: BTreeMap<EvidenceKey, Evidence> = BTreeMap::new();
        let mut total_votes = 0usize;
        for vote in votes {
            total_votes += 1;
            buckets
                .entry(vote.key)
                .or_insert_with(|| Evidence {
                    key: vote.key,
                    evidence: vote.evidence.clone(),
                    supporters: Vec::new(),
                    percent: 0.0,
                })
                .supporters
                .push(vote.actor.clone());
        }

        let mut evidences: Vec<Evidence> = buckets.into_values().collect();
        for bucket in &mut evidences {
            bucket.supporters.sort_by(|a, b| a.name.cmp(&b.name));
            bucket.percent = bucket.support() as f64 / total_votes as f64 * 100.0;
        }
        evidences.sort_by(|a, b| b.support().cmp(&a.support()).then(a.key.cmp(&b.key)));

        let is_trustable = !evidences.is_empty() && total_votes >= QUORUM_FLOOR;
        let is_adoptable = match evidences.as_slice() {
            [] => false,
            [_] => true,
            [first, second, ..] => first.support() > second.support(),
        };
        let adopted_evidence = if is_adoptable {
            evidences.first().map(|e| e.evidence.clone())
        } else {
            None
        };

        Self {
            evidences,
            total_votes,
            is_trustable,
            is_adoptable,
            adopted_evidence,
        }
    }

    /// Summary of a session with no votes, e.g. one that was canceled.
    pub fn empty() -> Self {
        Self::from_votes(std::iter::empty())
    }
}

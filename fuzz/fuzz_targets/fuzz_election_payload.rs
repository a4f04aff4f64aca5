#![no_main]

use libfuzzer_sys::fuzz_target;
use witness_election::{ElectionSummary, IssuePayload, Vote, VotePayload};

// Election payloads arrive inside authenticated messages but are still
// untrusted. Decoding and summarizing must never panic.
fuzz_target!(|data: &[u8]| {
    if let Ok(issue) = IssuePayload::decode(data) {
        let _ = issue.is_valid();
    }
    if let Ok(vote) = VotePayload::decode(data) {
        let _ = vote.is_valid();
        let summary = ElectionSummary::from_votes(&[Vote::new(vote.voter, vote.evidence)]);
        assert_eq!(summary.total_votes, 1);
        assert!(summary.is_adoptable);
    }
});

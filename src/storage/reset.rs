//! Administrative resets
//!
//! Terminal transitions of the election document. Only the full reset is an
//! overwrite; selective resets derive from the current document and go
//! through the transactional update so they cannot drop a ballot that lands
//! while they run.

use crate::admin::AdminGate;
use crate::storage::store::ElectionStore;
use crate::types::{ElectionDocument, VotingPhase};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// What a reset wipes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetScope {
    /// Everything, config included
    All,
    /// Roster and both ballot sets; candidates stay
    VotersOnly,
    /// Phase 1 candidates, ballots and flags
    Phase1,
    /// Phase 2 candidates, ballots and flags
    Phase2,
}

impl ResetScope {
    /// Confirmation text shown before the reset runs
    pub fn description(self) -> &'static str {
        match self {
            ResetScope::All => {
                "Permanently deletes every voter, candidate and ballot and restores the default configuration."
            }
            ResetScope::VotersOnly => {
                "Deletes the voter roster and all current ballots. Candidate lists are kept."
            }
            ResetScope::Phase1 => {
                "Deletes all Phase 1 candidates and ratings. Every voter's Phase 1 status is cleared."
            }
            ResetScope::Phase2 => {
                "Deletes all Phase 2 candidates and selections. Every voter's Phase 2 status is cleared."
            }
        }
    }
}

/// Clear one phase: its candidates, its ballots and every voter's flag for it.
pub fn clear_phase(doc: &mut ElectionDocument, phase: VotingPhase) {
    match phase {
        VotingPhase::One => {
            doc.candidates_phase1.clear();
            doc.ballots_phase1.clear();
        }
        VotingPhase::Two => {
            doc.candidates_phase2.clear();
            doc.ballots_phase2.clear();
        }
    }
    for voter in &mut doc.voters {
        voter.set_voted(phase, false);
    }
}

/// Clear the roster and both ballot sets, which reference voter ids.
pub fn clear_voters(doc: &mut ElectionDocument) {
    doc.voters.clear();
    doc.ballots_phase1.clear();
    doc.ballots_phase2.clear();
}

impl ElectionStore {
    pub async fn reset_all(&self) -> Result<()> {
        tracing::warn!("🧹 Full reset: overwriting election document with defaults");
        self.save_snapshot(ElectionDocument::default()).await
    }

    pub async fn reset_phase1(&self) -> Result<()> {
        tracing::warn!("🧹 Resetting Phase 1 candidates and ballots");
        self.update(|doc| {
            clear_phase(doc, VotingPhase::One);
            Ok(true)
        })
        .await
        .map(|_| ())
    }

    pub async fn reset_phase2(&self) -> Result<()> {
        tracing::warn!("🧹 Resetting Phase 2 candidates and ballots");
        self.update(|doc| {
            clear_phase(doc, VotingPhase::Two);
            Ok(true)
        })
        .await
        .map(|_| ())
    }

    pub async fn reset_voters_only(&self) -> Result<()> {
        tracing::warn!("🧹 Resetting voter roster and all ballots");
        self.update(|doc| {
            clear_voters(doc);
            Ok(true)
        })
        .await
        .map(|_| ())
    }

    pub async fn reset(&self, scope: ResetScope) -> Result<()> {
        match scope {
            ResetScope::All => self.reset_all().await,
            ResetScope::VotersOnly => self.reset_voters_only().await,
            ResetScope::Phase1 => self.reset_phase1().await,
            ResetScope::Phase2 => self.reset_phase2().await,
        }
    }

    /// Reset after re-confirming the admin secret.
    pub async fn reset_with_gate(
        &self,
        gate: &AdminGate,
        secret: &str,
        scope: ResetScope,
    ) -> Result<()> {
        if !gate.verify(secret) {
            tracing::warn!("Reset {:?} refused: admin secret mismatch", scope);
            return Err(Error::AdminDenied);
        }
        self.reset(scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BallotPhase1, BallotPhase2, CandidatePhase1, CandidatePhase2, PersonRecord, RatingLevel,
        Voter,
    };

    fn populated() -> ElectionDocument {
        let mut doc = ElectionDocument::default();
        let mut voter = Voter::new(PersonRecord::new("A", "Voter A"));
        voter.has_voted_phase1 = true;
        voter.has_voted_phase2 = true;
        doc.voters.push(voter);
        doc.candidates_phase1
            .push(CandidatePhase1::new(PersonRecord::new("X", "X")));
        doc.candidates_phase2
            .push(CandidatePhase2::new(PersonRecord::new("X", "X")));
        doc.ballots_phase1.push(BallotPhase1 {
            voter_id: "A".into(),
            candidate_id: "X".into(),
            level: RatingLevel::Complete,
        });
        doc.ballots_phase2.push(BallotPhase2 {
            voter_id: "A".into(),
            candidate_id: "X".into(),
        });
        doc.config.max_excellent_votes = 2;
        doc
    }

    #[test]
    fn test_clear_phase1_isolated() {
        let mut doc = populated();
        clear_phase(&mut doc, VotingPhase::One);

        assert!(doc.candidates_phase1.is_empty());
        assert!(doc.ballots_phase1.is_empty());
        assert!(!doc.voters[0].has_voted_phase1);

        assert_eq!(doc.candidates_phase2.len(), 1);
        assert_eq!(doc.ballots_phase2.len(), 1);
        assert!(doc.voters[0].has_voted_phase2);
        assert_eq!(doc.config.max_excellent_votes, 2);
    }

    #[test]
    fn test_clear_phase2_isolated() {
        let mut doc = populated();
        clear_phase(&mut doc, VotingPhase::Two);

        assert!(doc.candidates_phase2.is_empty());
        assert!(doc.ballots_phase2.is_empty());
        assert!(!doc.voters[0].has_voted_phase2);
        assert!(doc.voters[0].has_voted_phase1);
        assert_eq!(doc.ballots_phase1.len(), 1);
    }

    #[test]
    fn test_clear_voters_keeps_candidates() {
        let mut doc = populated();
        clear_voters(&mut doc);

        assert!(doc.voters.is_empty());
        assert!(doc.ballots_phase1.is_empty());
        assert!(doc.ballots_phase2.is_empty());
        assert_eq!(doc.candidates_phase1.len(), 1);
        assert_eq!(doc.candidates_phase2.len(), 1);
    }

    #[test]
    fn test_scope_descriptions_distinct() {
        let scopes = [
            ResetScope::All,
            ResetScope::VotersOnly,
            ResetScope::Phase1,
            ResetScope::Phase2,
        ];
        let texts: std::collections::HashSet<_> = scopes.iter().map(|s| s.description()).collect();
        assert_eq!(texts.len(), 4);
    }
}

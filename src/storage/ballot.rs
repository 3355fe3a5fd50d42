//! Ballot casting protocol
//!
//! A ballot is applied as one atomic update of the election document:
//! 1. Locate the voter by normalized id (absent voter aborts, nothing written)
//! 2. Check the phase is open and the submission is well formed
//! 3. Set the voter's `has_voted` flag for the phase
//! 4. Drop every earlier ballot record of that voter for the phase
//! 5. Append one record per rating / selection
//!
//! Replacing rather than merging makes resubmission idempotent. Concurrent
//! ballots from different voters touch disjoint records and both survive the
//! optimistic retry of the remote transaction. Two concurrent ballots from the
//! same voter race and one of them wins; which one is not defined.

use crate::storage::store::ElectionStore;
use crate::types::{
    BallotPhase1, BallotPhase2, CandidatePhase1, ElectionDocument, Rating, RatingLevel,
    VotingPhase, normalize_id,
};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Normalize ratings, keeping the last level given for a repeated candidate.
fn collapse_ratings(ratings: &[Rating]) -> Result<Vec<(String, RatingLevel)>> {
    let mut collapsed: Vec<(String, RatingLevel)> = Vec::with_capacity(ratings.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for rating in ratings {
        let candidate_id = normalize_id(&rating.candidate_id);
        if candidate_id.is_empty() {
            return Err(Error::validation("candidate_id"));
        }
        match positions.get(&candidate_id) {
            Some(&idx) => collapsed[idx].1 = rating.level,
            None => {
                positions.insert(candidate_id.clone(), collapsed.len());
                collapsed.push((candidate_id, rating.level));
            }
        }
    }
    Ok(collapsed)
}

/// Normalize selections, keeping the first occurrence of each candidate.
fn collapse_selection(selected: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut collapsed = Vec::with_capacity(selected.len());
    for raw in selected {
        let candidate_id = normalize_id(raw);
        if candidate_id.is_empty() {
            return Err(Error::validation("candidate_id"));
        }
        if seen.insert(candidate_id.clone()) {
            collapsed.push(candidate_id);
        }
    }
    Ok(collapsed)
}

/// Apply one Phase 1 ballot to `doc`. `Ok(false)` when the voter is unknown.
pub fn apply_phase1(doc: &mut ElectionDocument, voter_id: &str, ratings: &[Rating]) -> Result<bool> {
    let voter_id = normalize_id(voter_id);
    if doc.find_voter(&voter_id).is_none() {
        return Ok(false);
    }
    if !doc.config.is_open(VotingPhase::One) {
        return Err(Error::PhaseClosed { phase: 1 });
    }
    let ratings = collapse_ratings(ratings)?;

    if let Some(voter) = doc.find_voter_mut(&voter_id) {
        voter.set_voted(VotingPhase::One, true);
    }
    doc.ballots_phase1
        .retain(|b| normalize_id(&b.voter_id) != voter_id);
    doc.ballots_phase1
        .extend(ratings.into_iter().map(|(candidate_id, level)| BallotPhase1 {
            voter_id: voter_id.clone(),
            candidate_id,
            level,
        }));
    Ok(true)
}

/// Apply one Phase 2 ballot to `doc`. An empty selection is a blank ballot.
pub fn apply_phase2(
    doc: &mut ElectionDocument,
    voter_id: &str,
    selected: &[String],
) -> Result<bool> {
    let voter_id = normalize_id(voter_id);
    if doc.find_voter(&voter_id).is_none() {
        return Ok(false);
    }
    if !doc.config.is_open(VotingPhase::Two) {
        return Err(Error::PhaseClosed { phase: 2 });
    }
    let selected = collapse_selection(selected)?;
    let limit = doc.config.max_excellent_votes;
    if selected.len() > limit as usize {
        return Err(Error::SelectionLimitExceeded {
            selected: selected.len(),
            limit,
        });
    }

    if let Some(voter) = doc.find_voter_mut(&voter_id) {
        voter.set_voted(VotingPhase::Two, true);
    }
    doc.ballots_phase2
        .retain(|b| normalize_id(&b.voter_id) != voter_id);
    doc.ballots_phase2
        .extend(selected.into_iter().map(|candidate_id| BallotPhase2 {
            voter_id: voter_id.clone(),
            candidate_id,
        }));
    Ok(true)
}

/// Complete a voter's ratings: every candidate left unrated gets `Complete`.
pub fn fill_missing_ratings(candidates: &[CandidatePhase1], ratings: &[Rating]) -> Vec<Rating> {
    let rated: HashSet<String> = ratings
        .iter()
        .map(|r| normalize_id(&r.candidate_id))
        .collect();
    let mut completed = ratings.to_vec();
    completed.extend(
        candidates
            .iter()
            .map(|c| c.person.normalized_id())
            .filter(|id| !rated.contains(id))
            .map(|id| Rating::new(id, RatingLevel::Complete)),
    );
    completed
}

impl ElectionStore {
    /// Record a voter's Phase 1 ratings, replacing any earlier ones.
    ///
    /// Returns `Ok(false)` when the voter is not on the roster.
    pub async fn cast_ballot_phase1(&self, voter_id: &str, ratings: &[Rating]) -> Result<bool> {
        let voter = normalize_id(voter_id);
        let applied = self
            .update(|doc| apply_phase1(doc, &voter, ratings))
            .await?;

        if applied {
            tracing::info!(
                "✅ Phase 1 ballot recorded: voter={}, ratings={}",
                voter,
                ratings.len()
            );
        } else {
            tracing::warn!("Phase 1 ballot rejected: voter {} not on roster", voter);
        }
        Ok(applied)
    }

    /// Record a voter's Phase 2 selection, replacing any earlier one.
    ///
    /// An empty selection still marks the voter as having voted.
    pub async fn cast_ballot_phase2(&self, voter_id: &str, selected: &[String]) -> Result<bool> {
        let voter = normalize_id(voter_id);
        let applied = self
            .update(|doc| apply_phase2(doc, &voter, selected))
            .await?;

        if applied {
            tracing::info!(
                "✅ Phase 2 ballot recorded: voter={}, selected={}",
                voter,
                selected.len()
            );
        } else {
            tracing::warn!("Phase 2 ballot rejected: voter {} not on roster", voter);
        }
        Ok(applied)
    }
}

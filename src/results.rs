//! Read-side views over a snapshot: tallies, voter history and the voting flow

use crate::types::{ElectionConfig, ElectionDocument, RatingLevel, Voter, VotingPhase, normalize_id};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Phase 1 level counts for one candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Phase1Stats {
    pub incomplete: usize,
    pub complete: usize,
    pub complete_well: usize,
    pub total: usize,
}

impl Phase1Stats {
    pub fn count(&self, level: RatingLevel) -> usize {
        match level {
            RatingLevel::Incomplete => self.incomplete,
            RatingLevel::Complete => self.complete,
            RatingLevel::CompleteWell => self.complete_well,
        }
    }

    /// Share of ballots at `level`, in percent. An empty tally divides by one.
    pub fn percentage(&self, level: RatingLevel) -> f64 {
        let total = self.total.max(1) as f64;
        self.count(level) as f64 / total * 100.0
    }
}

/// Phase 2 tally for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResult {
    pub candidate_id: String,
    pub candidate_name: Option<String>,
    pub vote_count: usize,
    /// Votes over the number of voters who cast a Phase 2 ballot
    pub percentage: f64,
}

/// Voting participation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turnout {
    pub voters: usize,
    pub voted_phase1: usize,
    pub voted_phase2: usize,
}

pub fn phase1_stats(doc: &ElectionDocument, candidate_id: &str) -> Phase1Stats {
    let wanted = normalize_id(candidate_id);
    let mut stats = Phase1Stats::default();
    for ballot in doc
        .ballots_phase1
        .iter()
        .filter(|b| normalize_id(&b.candidate_id) == wanted)
    {
        match ballot.level {
            RatingLevel::Incomplete => stats.incomplete += 1,
            RatingLevel::Complete => stats.complete += 1,
            RatingLevel::CompleteWell => stats.complete_well += 1,
        }
        stats.total += 1;
    }
    stats
}

/// Votes for every Phase 2 candidate, most votes first.
pub fn phase2_results(doc: &ElectionDocument) -> Vec<VoteResult> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for ballot in &doc.ballots_phase2 {
        *counts.entry(normalize_id(&ballot.candidate_id)).or_default() += 1;
    }
    let ballots_cast = doc.voters.iter().filter(|v| v.has_voted_phase2).count().max(1) as f64;

    let mut results: Vec<VoteResult> = doc
        .candidates_phase2
        .iter()
        .map(|c| {
            let candidate_id = c.person().normalized_id();
            let vote_count = counts.get(&candidate_id).copied().unwrap_or(0);
            VoteResult {
                candidate_name: Some(c.person().full_name.clone()).filter(|n| !n.is_empty()),
                percentage: vote_count as f64 / ballots_cast * 100.0,
                candidate_id,
                vote_count,
            }
        })
        .collect();
    // Stable sort keeps import order among ties
    results.sort_by(|a, b| b.vote_count.cmp(&a.vote_count));
    results
}

pub fn turnout(doc: &ElectionDocument) -> Turnout {
    Turnout {
        voters: doc.voters.len(),
        voted_phase1: doc.voters.iter().filter(|v| v.has_voted_phase1).count(),
        voted_phase2: doc.voters.iter().filter(|v| v.has_voted_phase2).count(),
    }
}

/// One line of a voter's ballot history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub candidate_id: String,
    /// Candidate's name, or the id when the candidate is no longer listed
    pub candidate_name: String,
    pub level: Option<RatingLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoterHistory {
    pub phase1: Vec<HistoryEntry>,
    pub phase2: Vec<HistoryEntry>,
}

/// Ballots cast by one voter, with candidate names resolved.
pub fn voter_history(doc: &ElectionDocument, voter_id: &str) -> VoterHistory {
    let voter_id = normalize_id(voter_id);
    let name_or_id = |name: Option<&str>, id: &str| {
        name.filter(|n| !n.is_empty())
            .unwrap_or(id)
            .to_string()
    };

    let phase1 = doc
        .ballots_phase1
        .iter()
        .filter(|b| normalize_id(&b.voter_id) == voter_id)
        .map(|b| HistoryEntry {
            candidate_name: name_or_id(
                doc.candidate_phase1(&b.candidate_id)
                    .map(|c| c.person.full_name.as_str()),
                &b.candidate_id,
            ),
            candidate_id: b.candidate_id.clone(),
            level: Some(b.level),
        })
        .collect();

    let phase2 = doc
        .ballots_phase2
        .iter()
        .filter(|b| normalize_id(&b.voter_id) == voter_id)
        .map(|b| HistoryEntry {
            candidate_name: name_or_id(
                doc.candidate_phase2(&b.candidate_id)
                    .map(|c| c.person().full_name.as_str()),
                &b.candidate_id,
            ),
            candidate_id: b.candidate_id.clone(),
            level: None,
        })
        .collect();

    VoterHistory { phase1, phase2 }
}

/// A voter's earlier ratings and selections, for resuming a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorBallots {
    pub ratings: HashMap<String, RatingLevel>,
    pub selections: Vec<String>,
}

pub fn voter_ballots(doc: &ElectionDocument, voter_id: &str) -> PriorBallots {
    let voter_id = normalize_id(voter_id);
    PriorBallots {
        ratings: doc
            .ballots_phase1
            .iter()
            .filter(|b| normalize_id(&b.voter_id) == voter_id)
            .map(|b| (normalize_id(&b.candidate_id), b.level))
            .collect(),
        selections: doc
            .ballots_phase2
            .iter()
            .filter(|b| normalize_id(&b.voter_id) == voter_id)
            .map(|b| normalize_id(&b.candidate_id))
            .collect(),
    }
}

/// Find the voter a login id refers to: national id, or student id ignoring case.
pub fn find_voter<'a>(doc: &'a ElectionDocument, login_id: &str) -> Option<&'a Voter> {
    let cleaned = login_id.trim();
    if cleaned.is_empty() {
        return None;
    }
    let lowered = cleaned.to_lowercase();
    doc.voters.iter().find(|v| {
        v.person.has_id(cleaned) || v.person.student_id.trim().to_lowercase() == lowered
    })
}

/// Login lookup: the voter for `login_id`, or [`Error::VoterNotFound`].
pub fn login<'a>(doc: &'a ElectionDocument, login_id: &str) -> Result<&'a Voter> {
    find_voter(doc, login_id).ok_or_else(|| {
        tracing::info!("Login rejected for unknown id {:?}", login_id.trim());
        Error::voter_not_found(login_id.trim())
    })
}

/// Where a voter lands after logging in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VotingStep {
    Phase1,
    Phase2,
    Done,
    /// Both phases closed and the voter has not finished
    Closed,
}

pub fn next_step(voter: &Voter, config: &ElectionConfig) -> VotingStep {
    let p1_open = config.is_open(VotingPhase::One);
    let p2_open = config.is_open(VotingPhase::Two);

    if voter.has_voted_phase1 && voter.has_voted_phase2 {
        VotingStep::Done
    } else if p1_open && !voter.has_voted_phase1 {
        VotingStep::Phase1
    } else if p2_open && !voter.has_voted_phase2 {
        VotingStep::Phase2
    } else if (voter.has_voted_phase1 && !p2_open) || (!p1_open && voter.has_voted_phase2) {
        VotingStep::Done
    } else if !p1_open && !p2_open {
        VotingStep::Closed
    } else {
        VotingStep::Done
    }
}

/// Step after a successful Phase 1 submission
pub fn step_after_phase1(config: &ElectionConfig) -> VotingStep {
    if config.is_open(VotingPhase::Two) {
        VotingStep::Phase2
    } else {
        VotingStep::Done
    }
}

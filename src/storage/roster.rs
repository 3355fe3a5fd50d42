//! Roster and candidate list replacement
//!
//! Imports replace whole lists. Voting flags are derived state, so a roster
//! re-import carries them over for ids already present; new ids start clean.
//! Rows sharing a normalized id collapse into one entry holding the last
//! row's data at the first row's position.

use crate::Result;
use crate::storage::store::ElectionStore;
use crate::types::{CandidatePhase1, CandidatePhase2, Voter, normalize_id};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Collapse entries with the same id; later entries overwrite earlier ones in place.
fn collapse_by_id<T>(items: Vec<T>, id: impl Fn(&T) -> String) -> Vec<T> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(items.len());
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        match slots.entry(id(&item)) {
            Entry::Occupied(slot) => {
                tracing::debug!("Duplicate id {:?} in import, keeping the later row", slot.key());
                kept[*slot.get()] = item;
            }
            Entry::Vacant(slot) => {
                slot.insert(kept.len());
                kept.push(item);
            }
        }
    }
    kept
}

/// Normalize candidate ids and drop duplicates.
pub fn dedupe_candidates_phase1(candidates: Vec<CandidatePhase1>) -> Vec<CandidatePhase1> {
    let normalized: Vec<_> = candidates
        .into_iter()
        .map(|mut c| {
            c.person.national_id = normalize_id(&c.person.national_id);
            c
        })
        .collect();
    collapse_by_id(normalized, |c: &CandidatePhase1| c.person.national_id.clone())
}

/// Normalize candidate ids and drop duplicates.
pub fn dedupe_candidates_phase2(candidates: Vec<CandidatePhase2>) -> Vec<CandidatePhase2> {
    let normalized: Vec<_> = candidates
        .into_iter()
        .map(|mut c| {
            c.profile.person.national_id = normalize_id(&c.profile.person.national_id);
            c
        })
        .collect();
    collapse_by_id(normalized, |c: &CandidatePhase2| c.person().national_id.clone())
}

/// Merge an imported roster with the current one, preserving voting flags.
pub fn merge_roster(existing: &[Voter], imported: Vec<Voter>) -> Vec<Voter> {
    let flags: HashMap<String, (bool, bool)> = existing
        .iter()
        .map(|v| {
            (
                v.person.normalized_id(),
                (v.has_voted_phase1, v.has_voted_phase2),
            )
        })
        .collect();

    let merged: Vec<Voter> = imported
        .into_iter()
        .map(|mut voter| {
            voter.person.national_id = normalize_id(&voter.person.national_id);
            let (p1, p2) = flags
                .get(&voter.person.national_id)
                .copied()
                .unwrap_or((false, false));
            voter.has_voted_phase1 = p1;
            voter.has_voted_phase2 = p2;
            voter
        })
        .collect();
    collapse_by_id(merged, |v: &Voter| v.person.national_id.clone())
}

impl ElectionStore {
    /// Replace the roster, keeping voting flags of returning voters.
    pub async fn import_roster(&self, imported: Vec<Voter>) -> Result<()> {
        let mut count = 0;
        self.update(|doc| {
            doc.voters = merge_roster(&doc.voters, imported.clone());
            count = doc.voters.len();
            Ok(true)
        })
        .await?;
        tracing::info!("📥 Roster imported: voters={}", count);
        Ok(())
    }

    pub async fn import_candidates_phase1(&self, candidates: Vec<CandidatePhase1>) -> Result<()> {
        let candidates = dedupe_candidates_phase1(candidates);
        let count = candidates.len();
        self.update(|doc| {
            doc.candidates_phase1 = candidates.clone();
            Ok(true)
        })
        .await?;
        tracing::info!("📥 Phase 1 candidates imported: candidates={}", count);
        Ok(())
    }

    pub async fn import_candidates_phase2(&self, candidates: Vec<CandidatePhase2>) -> Result<()> {
        let candidates = dedupe_candidates_phase2(candidates);
        let count = candidates.len();
        self.update(|doc| {
            doc.candidates_phase2 = candidates.clone();
            Ok(true)
        })
        .await?;
        tracing::info!("📥 Phase 2 candidates imported: candidates={}", count);
        Ok(())
    }
}

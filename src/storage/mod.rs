//! Election document storage: backends, the store, and the mutation protocols

pub mod ballot;
pub mod local;
pub mod notify;
pub mod remote;
pub mod reset;
pub mod roster;
pub mod store;

pub use ballot::{apply_phase1, apply_phase2, fill_missing_ratings};
pub use local::{FileLocalCache, LocalCache, MemoryLocalCache};
pub use notify::{ChangeNotifier, ChangeSubscription};
pub use remote::{
    InMemoryRemote, RemoteEvent, RemoteStore, RemoteSubscription, TransactionOutcome, TxnStep,
    UpdateFn, document_digest,
};
pub use reset::{ResetScope, clear_phase, clear_voters};
pub use roster::{dedupe_candidates_phase1, dedupe_candidates_phase2, merge_roster};
pub use store::{ElectionStore, SyncStatus};

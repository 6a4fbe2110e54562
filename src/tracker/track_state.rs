use serde::{Deserialize, Serialize};

/// Track state enumeration for the identity lifecycle.
///
/// Newly created tracks are `Tentative` until enough evidence has been
/// collected, then `Confirmed`. Tracks that are no longer alive are `Deleted`
/// and get removed from the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackState {
    /// Newly created track, not yet confirmed
    #[default]
    Tentative,
    /// Track with `n_init` consecutive matches
    Confirmed,
    /// Terminal state, removed at the end of the update
    Deleted,
}

//! Store lifecycle states.

use std::fmt;

/// The lifecycle state machine every backend implements.
///
/// `Uninitialized → (init) → Ready → (close) → Closed`, with
/// `MigrationNeeded` entered from `init` when the persisted schema is behind
/// current. Any method other than `init` served outside `Ready` fails with a
/// lifecycle error; in `MigrationNeeded`, everything except an explicit
/// migration request fails with `NeedsMigration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created but not yet opened.
    Uninitialized,
    /// Open and serving requests.
    Ready,
    /// Opened over an older schema; only migration is admitted.
    MigrationNeeded,
    /// Closed; no further requests are admitted.
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Ready => "ready",
            LifecycleState::MigrationNeeded => "migration-needed",
            LifecycleState::Closed => "closed",
        };
        f.write_str(name)
    }
}

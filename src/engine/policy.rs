use serde::{Deserialize, Serialize};

/// Who keeps a started request alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// The engine holds the request until the execution settles, so the
    /// caller may drop its handle right after `start`.
    #[default]
    Hold,
    /// The engine holds the request weakly. Once the caller drops its last
    /// handle the execution is cancelled and nothing is delivered.
    NoHold,
}

/// What a start does when an execution with the same identifier is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Identical requests run independently.
    #[default]
    AllAllowed,
    /// The new start is rejected with `DuplicateSuppressed`.
    FirstWins,
    /// Running executions are cancelled (`Superseded`) and the new one proceeds.
    LastWins,
}

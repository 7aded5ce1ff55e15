/// Sync coordinator state machine.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Not syncing: local chain is at least as high as every established peer,
    /// or no sync source is available.
    #[default]
    Idle,

    /// Fetching headers from the designated peer up to the next checkpoint,
    /// then fetching the blocks for those headers.
    ///
    /// Relay is suspended while in this state.
    HeadersFirst,

    /// Fetching blocks directly by locator from the designated peer.
    BlocksFirst,
}

impl SyncState {
    /// Check if a transition to the target state is valid.
    ///
    /// A sync attempt always starts from and ends in `Idle`. A headers-first
    /// attempt whose peer runs out of headers below the checkpoint finishes
    /// blocks-first.
    pub fn can_transition_to(&self, target: SyncState) -> bool {
        match self {
            SyncState::Idle => matches!(target, SyncState::HeadersFirst | SyncState::BlocksFirst),
            SyncState::HeadersFirst => matches!(target, SyncState::Idle | SyncState::BlocksFirst),
            SyncState::BlocksFirst => matches!(target, SyncState::Idle),
        }
    }

    pub fn is_syncing(&self) -> bool {
        *self != SyncState::Idle
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::HeadersFirst => "headers_first",
            SyncState::BlocksFirst => "blocks_first",
        }
    }
}

//! Sync session stage machine.
//!
//! A pure, side-effect-free state machine sequencing one sync session:
//! own account download, then every linked notebook, then sending local
//! changes. It takes events as input and produces a new stage plus a list
//! of actions to execute.
//!
//! The actual work (running processors, sending) is performed by the
//! engine in `sync-engine`, not by this module.

/// Stage of a sync session - NO I/O, just transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStage {
    /// No session running.
    Idle,
    /// Processing the own account's chunks.
    DownloadingOwn {
        /// Whether the send stage runs after downloading.
        send_enabled: bool,
    },
    /// Processing the chunks of one linked notebook.
    DownloadingLinked {
        /// Index of the linked notebook being processed.
        index: usize,
        /// Number of linked notebooks in this session.
        total: usize,
        /// Whether the send stage runs after downloading.
        send_enabled: bool,
    },
    /// Sending local changes.
    Sending,
    /// Session completed.
    Finished,
    /// Session aborted.
    Failed {
        /// What went wrong.
        error: String,
    },
}

impl SyncStage {
    /// Create a stage machine in the Idle stage.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DownloadingOwn { .. } => "downloading_own",
            Self::DownloadingLinked { .. } => "downloading_linked",
            Self::Sending => "sending",
            Self::Finished => "finished",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether a session is in progress.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::DownloadingOwn { .. } | Self::DownloadingLinked { .. } | Self::Sending
        )
    }

    /// Process an event and return the new stage plus actions to execute.
    pub fn on_event(self, event: StageEvent) -> (Self, Vec<StageAction>) {
        match (self, event) {
            // Starting (again)
            (Self::Idle | Self::Finished | Self::Failed { .. }, StageEvent::SyncRequested { send_enabled }) => (
                Self::DownloadingOwn { send_enabled },
                vec![
                    StageAction::EmitEvent(SyncEvent::Started),
                    StageAction::DownloadOwn,
                ],
            ),

            // From DownloadingOwn
            (Self::DownloadingOwn { send_enabled }, StageEvent::OwnDownloaded { linked_notebooks }) => {
                if linked_notebooks > 0 {
                    linked_stage(0, linked_notebooks, send_enabled)
                } else {
                    after_download(send_enabled)
                }
            }

            // From DownloadingLinked
            (
                Self::DownloadingLinked {
                    index,
                    total,
                    send_enabled,
                },
                StageEvent::LinkedDownloaded,
            ) => {
                let next = index + 1;
                if next < total {
                    linked_stage(next, total, send_enabled)
                } else {
                    after_download(send_enabled)
                }
            }

            // From Sending
            (Self::Sending, StageEvent::SendCompleted) => (
                Self::Finished,
                vec![StageAction::EmitEvent(SyncEvent::Finished)],
            ),

            // Failures abort any running stage
            (state, StageEvent::StageFailed { error }) if state.is_running() => (
                Self::Failed {
                    error: error.clone(),
                },
                vec![StageAction::EmitEvent(SyncEvent::Failed { error })],
            ),

            // Invalid transitions - stay in current stage
            (state, _) => (state, vec![]),
        }
    }
}

impl Default for SyncStage {
    fn default() -> Self {
        Self::new()
    }
}

fn linked_stage(index: usize, total: usize, send_enabled: bool) -> (SyncStage, Vec<StageAction>) {
    (
        SyncStage::DownloadingLinked {
            index,
            total,
            send_enabled,
        },
        vec![
            StageAction::EmitEvent(SyncEvent::LinkedNotebookStarted { index, total }),
            StageAction::DownloadLinked { index },
        ],
    )
}

fn after_download(send_enabled: bool) -> (SyncStage, Vec<StageAction>) {
    if send_enabled {
        (
            SyncStage::Sending,
            vec![
                StageAction::EmitEvent(SyncEvent::SendingStarted),
                StageAction::SendLocalChanges,
            ],
        )
    } else {
        (
            SyncStage::Finished,
            vec![StageAction::EmitEvent(SyncEvent::Finished)],
        )
    }
}

/// Events driving the stage machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// Caller asked for a sync session.
    SyncRequested {
        /// Whether local changes should be sent afterwards.
        send_enabled: bool,
    },
    /// Own account chunks are processed.
    OwnDownloaded {
        /// Number of linked notebooks to process next.
        linked_notebooks: usize,
    },
    /// The current linked notebook is processed.
    LinkedDownloaded,
    /// Local changes are sent.
    SendCompleted,
    /// The current stage failed.
    StageFailed {
        /// What went wrong.
        error: String,
    },
}

/// Actions to be executed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageAction {
    /// Fetch and process the own account's chunks.
    DownloadOwn,
    /// Fetch and process the chunks of a linked notebook.
    DownloadLinked {
        /// Index into the session's linked notebook list.
        index: usize,
    },
    /// Send dirty local entities.
    SendLocalChanges,
    /// Emit an event to the application.
    EmitEvent(SyncEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A session started.
    Started,
    /// Processing of a linked notebook started.
    LinkedNotebookStarted {
        /// Index of the linked notebook.
        index: usize,
        /// Number of linked notebooks.
        total: usize,
    },
    /// Sending local changes started.
    SendingStarted,
    /// The session completed.
    Finished,
    /// The session aborted.
    Failed {
        /// What went wrong.
        error: String,
    },
}

pub mod batch;
pub mod company;
pub mod contingency_event;
pub mod environment;
pub mod queue_item;

pub use batch::{BatchStatus, ContingencyBatch, NewBatch};
pub use company::{CompanyProfile, Credentials};
pub use contingency_event::{ContingencyEvent, EventStatus, NewContingencyEvent};
pub use environment::Environment;
pub use queue_item::{DocumentRef, FailureStage, NewQueueItem, QueueItem, QueueStatus};

/// A stored enum column held a value this build does not know.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

use thiserror::Error;

use crate::live::HolderId;

pub type Result<T> = std::result::Result<T, LiveError>;

/// Failures of value-holder operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LiveError {
    /// The holder is already a source of this mediator.
    #[error("{holder} is already a source of this mediator")]
    SourceAlreadyAdded { holder: HolderId },
}

//! Typed errors for callers that validate frames before entering them.

use thiserror::Error;

use crate::arena::FrameId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame {0} is stale or was never allocated")]
    Stale(FrameId),
    #[error("frame {0} has malformed code metadata")]
    Malformed(FrameId),
    #[error("frame {0} is already the current frame")]
    AlreadyCurrent(FrameId),
    #[error("frame {0} is still linked under frame {1}")]
    Linked(FrameId, FrameId),
    #[error("frame {0} is already on the stack")]
    OnStack(FrameId),
}

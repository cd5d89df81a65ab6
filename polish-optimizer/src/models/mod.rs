//! Data models for polish-optimizer
//!
//! - Session lifecycle and per-segment state machine
//! - Start options and export artifacts

pub mod export;
pub mod options;
pub mod segment;
pub mod session;

pub use export::{ExportArtifact, ExportConfirmation, ExportTerms};
pub use options::{OptimizationMode, OptimizationOptions};
pub use polish_common::events::{SegmentStatus, SessionStatus};
pub use segment::Segment;
pub use session::{Lease, Session, SessionSnapshot, SessionSummary, TransitionError};

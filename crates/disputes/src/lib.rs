//! Disputes domain module (event-sourced).
//!
//! A dispute, its message thread, and its evidence references form one
//! aggregate. The dispute references its booking by identity only (a weak
//! back-reference); the caller validates the booking's status under that
//! aggregate's own consistent snapshot before filing. Business rules are
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod dispute;

pub use dispute::{
    AttachEvidence, Dispute, DisputeCommand, DisputeEvent, DisputeEvidenceAttached, DisputeFiled,
    DisputeId, DisputeMessage, DisputeMessageId, DisputeMessagePosted, DisputeOutcome,
    DisputeResolved, DisputeReviewTarget, DisputeReviewTransitioned, DisputeStatus, DisputeType,
    EvidenceRef, FileDispute, PostMessage, Resolve, TransitionReview,
};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use super::domain::{
    CertificateArtifact, Decision, Department, ObligationId, ReportId, RequestId, StudentId,
};

/// Domain events emitted by workflow transitions. They are derived output;
/// the store remains the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    ObligationAdded {
        obligation_id: ObligationId,
        student_id: StudentId,
        department: Department,
        amount: u64,
    },
    RequestSubmitted {
        request_id: RequestId,
        student_id: StudentId,
        department: Department,
    },
    RequestDecided {
        request_id: RequestId,
        student_id: StudentId,
        department: Department,
        decision: Decision,
        comment: Option<String>,
    },
    ClearanceAchieved {
        student_id: StudentId,
        certificate: CertificateArtifact,
    },
    ReportFiled {
        report_id: ReportId,
        student_id: StudentId,
        department: Department,
    },
    ReportResolved {
        report_id: ReportId,
        student_id: StudentId,
        department: Department,
    },
}

impl DomainEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ObligationAdded { .. } => "obligation_added",
            Self::RequestSubmitted { .. } => "request_submitted",
            Self::RequestDecided { .. } => "request_decided",
            Self::ClearanceAchieved { .. } => "clearance_achieved",
            Self::ReportFiled { .. } => "report_filed",
            Self::ReportResolved { .. } => "report_resolved",
        }
    }
}

/// Outbound hook for domain events. Implementations must not block; callers
/// log and drop failures instead of failing the transition.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DomainEvent) -> Result<(), PublishError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("event queue closed")]
    QueueClosed,
    #[error("event transport unavailable: {0}")]
    Transport(String),
}

/// Publisher that hands events to the dispatcher over an unbounded queue.
#[derive(Debug, Clone)]
pub struct QueuedPublisher {
    sender: mpsc::UnboundedSender<DomainEvent>,
}

impl QueuedPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventPublisher for QueuedPublisher {
    fn publish(&self, event: DomainEvent) -> Result<(), PublishError> {
        self.sender
            .send(event)
            .map_err(|_| PublishError::QueueClosed)
    }
}

/// Fire-and-forget delivery used by every transition.
pub(crate) fn emit<P: EventPublisher + ?Sized>(publisher: &P, event: DomainEvent) {
    let name = event.name();
    if let Err(err) = publisher.publish(event) {
        warn!(event = name, error = %err, "dropped domain event");
    }
}

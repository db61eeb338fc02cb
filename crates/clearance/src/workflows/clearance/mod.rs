//! University clearance workflow.
//!
//! Students accumulate obligations per department, request clearance from each
//! of the five departments, and receive a certificate once every department
//! has approved. Composition happens in [`ClearanceService`]; persistence sits
//! behind [`ClearanceStore`] and outbound events behind [`EventPublisher`].

pub mod accounts;
pub mod aggregator;
pub mod certificate;
pub mod domain;
pub mod error;
pub mod events;
pub mod ledger;
pub mod memory;
pub mod notifications;
pub mod reports;
pub mod repository;
pub mod requests;
pub mod router;
pub mod service;
pub mod tracker;
pub mod verification;

#[cfg(test)]
mod tests;

pub use accounts::{AccountRegistry, NewStaff, NewStudent, Session};
pub use aggregator::{overall_status_of, AggregateOutcome, ClearanceAggregator};
pub use certificate::{CertificateError, CertificateOutcome, CertificateRenderer};
pub use domain::{
    department_channel, CertificateArtifact, CertificateState, ClearanceRequest, Decision,
    Department, DepartmentStatus, Notification, NotificationId, NotificationKind, Obligation,
    ObligationId, ObligationKind, OverallStatus, Report, ReportId, ReportStatus, RequestId,
    RequestStatus, Role, Staff, StaffId, StatusHistoryEntry, Student, StudentId, UnknownValue,
};
pub use error::ClearanceError;
pub use events::{DomainEvent, EventPublisher, PublishError, QueuedPublisher};
pub use ledger::{
    ImportRow, ImportSkip, NewObligation, ObligationImportError, ObligationImportSummary,
    ObligationLedger,
};
pub use memory::InMemoryClearanceStore;
pub use notifications::{NotificationDispatcher, NotificationHub};
pub use reports::ReportDesk;
pub use repository::{
    ClearanceStore, RepositoryError, RequestFilter, RequestTransition, StaffFilter,
};
pub use requests::{DecisionOutcome, RequestWorkflow, SubmitOutcome};
pub use router::clearance_router;
pub use service::{ClearanceService, ClearanceStatusView};
pub use tracker::{DepartmentAssessment, DepartmentStatusTracker};
pub use verification::{DepartmentSnapshot, VerificationService, VerificationView};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::domain::{
    CertificateArtifact, ClearanceRequest, Department, DepartmentStatus, Notification,
    NotificationId, Obligation, ObligationId, Report, ReportId, RequestId, RequestStatus, Role,
    Staff, StaffId, StatusHistoryEntry, Student, StudentId,
};

/// Filter applied when listing clearance requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RequestFilter {
    #[serde(default)]
    pub department: Option<Department>,
    #[serde(default)]
    pub status: Option<RequestStatus>,
    #[serde(default)]
    pub student_id: Option<StudentId>,
}

impl RequestFilter {
    pub fn matches(&self, request: &ClearanceRequest) -> bool {
        self.department.map_or(true, |d| d == request.department)
            && self.status.map_or(true, |s| s == request.status)
            && self
                .student_id
                .as_ref()
                .map_or(true, |id| id == &request.student_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StaffFilter {
    #[serde(default)]
    pub department: Option<Department>,
    #[serde(default)]
    pub role: Option<Role>,
}

impl StaffFilter {
    pub fn matches(&self, staff: &Staff) -> bool {
        self.department
            .map_or(true, |d| staff.department == Some(d))
            && self.role.map_or(true, |r| r == staff.role)
    }
}

/// Terminal state written by a compare-and-set request transition.
#[derive(Debug, Clone)]
pub struct RequestTransition {
    pub to: RequestStatus,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
    pub comment: Option<String>,
}

/// Record store backing the clearance workflow.
///
/// Every mutating call is atomic per record and touches only the named
/// fields, so two approvals for different departments of one student cannot
/// overwrite each other.
pub trait ClearanceStore: Send + Sync {
    /// Fails with `Conflict` when the id or email is already taken.
    fn insert_student(&self, student: Student) -> Result<Student, RepositoryError>;
    fn fetch_student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError>;
    fn find_student_by_email(&self, email: &str) -> Result<Option<Student>, RepositoryError>;
    /// Writes one entry of the status map and appends the history entry.
    fn set_department_status(
        &self,
        id: &StudentId,
        department: Department,
        status: DepartmentStatus,
        entry: StatusHistoryEntry,
    ) -> Result<Student, RepositoryError>;
    /// Moves the certificate from `NotIssued` to `Issuing`. Returns `false`
    /// when another caller already holds or completed the issuance.
    fn claim_certificate(&self, id: &StudentId) -> Result<bool, RepositoryError>;
    fn complete_certificate(
        &self,
        id: &StudentId,
        artifact: CertificateArtifact,
    ) -> Result<Student, RepositoryError>;
    /// Drops an `Issuing` claim after a failed render.
    fn release_certificate(&self, id: &StudentId) -> Result<(), RepositoryError>;
    fn update_student_credential(
        &self,
        id: &StudentId,
        credential_hash: String,
    ) -> Result<(), RepositoryError>;

    fn insert_obligation(&self, obligation: Obligation) -> Result<Obligation, RepositoryError>;
    fn fetch_obligation(&self, id: &ObligationId) -> Result<Option<Obligation>, RepositoryError>;
    /// Stamps `resolved_at` only on the first call; later calls return the record unchanged.
    fn resolve_obligation(
        &self,
        id: &ObligationId,
        at: DateTime<Utc>,
    ) -> Result<Obligation, RepositoryError>;
    /// Insertion order, optionally narrowed to one department.
    fn obligations_for(
        &self,
        student: &StudentId,
        department: Option<Department>,
    ) -> Result<Vec<Obligation>, RepositoryError>;

    /// Fails with `Conflict` when a pending request already exists for the
    /// same student and department.
    fn insert_request(&self, request: ClearanceRequest) -> Result<ClearanceRequest, RepositoryError>;
    fn fetch_request(&self, id: &RequestId) -> Result<Option<ClearanceRequest>, RepositoryError>;
    fn open_request(
        &self,
        student: &StudentId,
        department: Department,
    ) -> Result<Option<ClearanceRequest>, RepositoryError>;
    /// Moves a pending request to its terminal state and writes the
    /// department status plus a history entry on the student in the same
    /// step. Fails with `StaleState` once the request is no longer pending
    /// and with `NotFound` when the student is missing; neither record
    /// changes on failure.
    fn apply_decision(
        &self,
        id: &RequestId,
        transition: RequestTransition,
        status: DepartmentStatus,
    ) -> Result<(ClearanceRequest, Student), RepositoryError>;
    fn requests(&self, filter: &RequestFilter) -> Result<Vec<ClearanceRequest>, RepositoryError>;

    fn insert_staff(&self, staff: Staff) -> Result<Staff, RepositoryError>;
    fn fetch_staff(&self, id: &StaffId) -> Result<Option<Staff>, RepositoryError>;
    fn find_staff_by_email(&self, email: &str) -> Result<Option<Staff>, RepositoryError>;
    fn list_staff(&self, filter: &StaffFilter) -> Result<Vec<Staff>, RepositoryError>;
    fn update_staff_credential(
        &self,
        id: &StaffId,
        credential_hash: String,
    ) -> Result<(), RepositoryError>;

    fn insert_report(&self, report: Report) -> Result<Report, RepositoryError>;
    fn fetch_report(&self, id: &ReportId) -> Result<Option<Report>, RepositoryError>;
    fn reports(&self, department: Option<Department>) -> Result<Vec<Report>, RepositoryError>;
    fn resolve_report(&self, id: &ReportId, at: DateTime<Utc>) -> Result<Report, RepositoryError>;

    fn insert_notification(
        &self,
        notification: Notification,
    ) -> Result<Notification, RepositoryError>;
    fn notifications_for(&self, recipient: &str) -> Result<Vec<Notification>, RepositoryError>;
    fn mark_notification_read(
        &self,
        id: &NotificationId,
    ) -> Result<Notification, RepositoryError>;
    fn mark_all_read(&self, recipient: &str) -> Result<usize, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },
    #[error("record changed concurrently: {0}")]
    StaleState(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

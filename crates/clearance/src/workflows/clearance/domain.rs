use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The five organizational units every student must clear before graduation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    Finance,
    Library,
    #[serde(alias = "department")]
    Academic,
    Hostel,
    Administration,
}

impl Department {
    pub const ALL: [Self; 5] = [
        Self::Finance,
        Self::Library,
        Self::Academic,
        Self::Hostel,
        Self::Administration,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Finance => "finance",
            Self::Library => "library",
            Self::Academic => "academic",
            Self::Hostel => "hostel",
            Self::Administration => "administration",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Finance => "Finance",
            Self::Library => "Library",
            Self::Academic => "Academic Department",
            Self::Hostel => "Hostel",
            Self::Administration => "Administration",
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a department or status string is outside the closed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Department {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "finance" => Ok(Self::Finance),
            "library" => Ok(Self::Library),
            "academic" | "department" => Ok(Self::Academic),
            "hostel" => Ok(Self::Hostel),
            "administration" | "admin" => Ok(Self::Administration),
            _ => Err(UnknownValue {
                kind: "department",
                value: value.to_string(),
            }),
        }
    }
}

/// Per-department clearance status. `cleared` is reserved for the aggregate;
/// legacy records spelling a department sign-off as `cleared` read as `approved`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepartmentStatus {
    #[default]
    Pending,
    #[serde(alias = "cleared")]
    Approved,
    Rejected,
}

impl DepartmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for DepartmentStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" | "cleared" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(UnknownValue {
                kind: "status",
                value: value.to_string(),
            }),
        }
    }
}

/// Aggregate across all departments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Pending,
    Cleared,
}

impl OverallStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Cleared => "cleared",
        }
    }
}

/// Student identifier (matriculation number); unique and immutable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StudentId(pub String);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaffId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObligationId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub String);

pub(crate) fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Sign-off history kept on the student record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub department: Department,
    pub status: DepartmentStatus,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// Durable reference returned by the certificate renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateArtifact {
    pub reference: String,
    pub issued_at: DateTime<Utc>,
}

/// Issuance progress. `Issuing` is held while the renderer runs so that a
/// concurrent recomputation cannot start a second generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum CertificateState {
    #[default]
    NotIssued,
    Issuing,
    Issued { artifact: CertificateArtifact },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing)]
    pub credential_hash: String,
    pub departments: BTreeMap<Department, DepartmentStatus>,
    pub history: Vec<StatusHistoryEntry>,
    pub certificate: CertificateState,
    pub registered_at: DateTime<Utc>,
}

impl Student {
    pub fn new(id: StudentId, name: String, email: String, credential_hash: String) -> Self {
        let departments = Department::ALL
            .into_iter()
            .map(|department| (department, DepartmentStatus::Pending))
            .collect();

        Self {
            id,
            name,
            email,
            credential_hash,
            departments,
            history: Vec::new(),
            certificate: CertificateState::NotIssued,
            registered_at: Utc::now(),
        }
    }

    /// Missing map entries read as `pending`.
    pub fn status_of(&self, department: Department) -> DepartmentStatus {
        self.departments
            .get(&department)
            .copied()
            .unwrap_or_default()
    }

    pub fn certificate_issued(&self) -> bool {
        matches!(self.certificate, CertificateState::Issued { .. })
    }

    pub fn certificate_artifact(&self) -> Option<&CertificateArtifact> {
        match &self.certificate {
            CertificateState::Issued { artifact } => Some(artifact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationKind {
    Fee,
    LostItem,
    Fine,
    HostelCharge,
    Other,
}

impl FromStr for ObligationKind {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace(&[' ', '-'][..], "_").as_str() {
            "fee" | "fees" => Ok(Self::Fee),
            "lost_item" | "lost_book" => Ok(Self::LostItem),
            "fine" => Ok(Self::Fine),
            "hostel_charge" | "hostel" => Ok(Self::HostelCharge),
            "other" => Ok(Self::Other),
            _ => Err(UnknownValue {
                kind: "obligation kind",
                value: value.to_string(),
            }),
        }
    }
}

/// One due item in a student's department bucket. `amount` is in minor
/// currency units; zero marks an informational entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: ObligationId,
    pub student_id: StudentId,
    pub department: Department,
    pub kind: ObligationKind,
    pub description: String,
    pub amount: u64,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Obligation {
    /// Only unresolved items with a cost hold up a department.
    pub fn is_blocking(&self) -> bool {
        !self.resolved && self.amount > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Staff verdict on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub const fn request_status(self) -> RequestStatus {
        match self {
            Self::Approved => RequestStatus::Approved,
            Self::Rejected => RequestStatus::Rejected,
        }
    }

    pub const fn department_status(self) -> DepartmentStatus {
        match self {
            Self::Approved => DepartmentStatus::Approved,
            Self::Rejected => DepartmentStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearanceRequest {
    pub id: RequestId,
    pub student_id: StudentId,
    pub department: Department,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ClearanceRequest {
    pub fn new(student_id: StudentId, department: Department) -> Self {
        Self {
            id: RequestId(generate_id("req")),
            student_id,
            department,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
            decided_by: None,
            comment: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Staff,
    Admin,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Staff => "staff",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: StaffId,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing)]
    pub credential_hash: String,
    pub role: Role,
    /// `None` only for administrators.
    pub department: Option<Department>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Resolved,
}

/// Student complaint routed to a department queue; independent of clearance state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub student_id: StudentId,
    pub department: Department,
    pub message: String,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ObligationAdded,
    RequestSubmitted,
    RequestDecided,
    ClearanceAchieved,
    ReportFiled,
    ReportResolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: String,
    pub message: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Broadcast channel name for a department's staff queue.
pub fn department_channel(department: Department) -> String {
    format!("department:{}", department.as_str())
}

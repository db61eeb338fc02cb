use std::io::Read;
use std::sync::Arc;

use serde::Serialize;

use super::accounts::{AccountRegistry, NewStaff, NewStudent, Session};
use super::aggregator::{overall_status_of, ClearanceAggregator};
use super::certificate::CertificateRenderer;
use super::domain::{
    department_channel, CertificateArtifact, ClearanceRequest, Decision, Department,
    Notification, NotificationId, Obligation, ObligationId, OverallStatus, Report, ReportId,
    RequestId, Role, Staff, StatusHistoryEntry, Student, StudentId,
};
use super::error::ClearanceError;
use super::events::EventPublisher;
use super::ledger::{parse_rows, NewObligation, ObligationImportSummary, ObligationLedger};
use super::repository::{ClearanceStore, RequestFilter, StaffFilter};
use super::reports::ReportDesk;
use super::requests::{DecisionOutcome, RequestWorkflow, SubmitOutcome};
use super::tracker::{DepartmentAssessment, DepartmentStatusTracker};
use super::verification::{VerificationService, VerificationView};
use crate::auth::{Authenticator, Principal};

/// Student-facing status page: every department with what is holding it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearanceStatusView {
    pub student_id: StudentId,
    pub name: String,
    pub overall: OverallStatus,
    pub departments: Vec<DepartmentAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateArtifact>,
    pub history: Vec<StatusHistoryEntry>,
}

/// Facade composing the clearance components. Every operation takes the
/// caller's [`Principal`] and enforces who may do what before delegating.
pub struct ClearanceService<S, P, C> {
    store: Arc<S>,
    accounts: AccountRegistry<S>,
    ledger: ObligationLedger<S, P>,
    tracker: Arc<DepartmentStatusTracker<S>>,
    aggregator: Arc<ClearanceAggregator<S, P, C>>,
    requests: RequestWorkflow<S, P, C>,
    verification: VerificationService<S>,
    reports: ReportDesk<S, P>,
}

impl<S, P, C> ClearanceService<S, P, C>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    pub fn new(store: Arc<S>, events: Arc<P>, renderer: Arc<C>, auth: Authenticator) -> Self {
        let tracker = Arc::new(DepartmentStatusTracker::new(store.clone()));
        let aggregator = Arc::new(ClearanceAggregator::new(
            store.clone(),
            events.clone(),
            renderer,
        ));

        Self {
            accounts: AccountRegistry::new(store.clone(), auth),
            ledger: ObligationLedger::new(store.clone(), events.clone()),
            requests: RequestWorkflow::new(
                store.clone(),
                events.clone(),
                tracker.clone(),
                aggregator.clone(),
            ),
            verification: VerificationService::new(store.clone()),
            reports: ReportDesk::new(store.clone(), events),
            tracker,
            aggregator,
            store,
        }
    }

    pub fn login(&self, identifier: &str, password: &str) -> Result<Session, ClearanceError> {
        self.accounts.login(identifier, password)
    }

    /// Resolves a bearer token into the principal it was issued for.
    pub fn authenticate(&self, token: &str) -> Result<Principal, ClearanceError> {
        self.accounts.authenticate(token)
    }

    pub fn register_student(
        &self,
        principal: &Principal,
        input: NewStudent,
    ) -> Result<Student, ClearanceError> {
        require_admin(principal, "register students")?;
        self.accounts.register_student(input)
    }

    pub fn register_staff(
        &self,
        principal: &Principal,
        input: NewStaff,
    ) -> Result<Staff, ClearanceError> {
        require_admin(principal, "register staff")?;
        self.accounts.register_staff(input)
    }

    /// Creates the first administrator at startup. An existing account with
    /// the same email is returned as is.
    pub fn bootstrap_admin(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Staff, ClearanceError> {
        if let Some(existing) = self.store.find_staff_by_email(email.trim())? {
            if existing.role != Role::Admin {
                return Err(ClearanceError::Conflict(format!(
                    "'{email}' belongs to a non-admin account"
                )));
            }
            return Ok(existing);
        }
        self.accounts.register_staff(NewStaff {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: Role::Admin,
            department: None,
        })
    }

    pub fn list_staff(
        &self,
        principal: &Principal,
        filter: &StaffFilter,
    ) -> Result<Vec<Staff>, ClearanceError> {
        require_admin(principal, "list staff")?;
        self.accounts.list_staff(filter)
    }

    pub fn update_credential(
        &self,
        principal: &Principal,
        current: &str,
        new: &str,
    ) -> Result<(), ClearanceError> {
        self.accounts.update_credential(principal, current, new)
    }

    pub fn fetch_student(
        &self,
        principal: &Principal,
        student_id: &StudentId,
    ) -> Result<Student, ClearanceError> {
        require_self_or_staff(principal, student_id)?;
        self.load_student(student_id)
    }

    pub fn add_obligation(
        &self,
        principal: &Principal,
        input: NewObligation,
    ) -> Result<Obligation, ClearanceError> {
        require_department(principal, input.department, "record obligations")?;
        self.ledger.add(input)
    }

    pub fn resolve_obligation(
        &self,
        principal: &Principal,
        id: &ObligationId,
    ) -> Result<Obligation, ClearanceError> {
        let obligation = self.ledger.fetch(id)?;
        require_department(principal, obligation.department, "resolve obligations")?;
        self.ledger.resolve(id)
    }

    /// Students read their own buckets. Staff are narrowed to their department.
    pub fn list_obligations(
        &self,
        principal: &Principal,
        student_id: &StudentId,
        department: Option<Department>,
    ) -> Result<Vec<Obligation>, ClearanceError> {
        require_self_or_staff(principal, student_id)?;
        let department = match principal.department_scope() {
            Some(own) if department.is_some_and(|d| d != own) => {
                return Err(ClearanceError::forbidden(format!(
                    "'{}' cannot read {} obligations",
                    principal.id,
                    department.map_or("other", Department::as_str)
                )))
            }
            Some(own) => Some(own),
            None => department,
        };
        self.ledger.list(student_id, department)
    }

    /// Bulk obligation import from a CSV export. Staff may only import rows
    /// for their own department; other rows are skipped and reported.
    pub fn import_obligations<R: Read>(
        &self,
        principal: &Principal,
        reader: R,
    ) -> Result<ObligationImportSummary, ClearanceError> {
        if principal.role == Role::Student {
            return Err(ClearanceError::forbidden("students cannot import obligations"));
        }
        let rows = parse_rows(reader).map_err(|err| ClearanceError::invalid(err.to_string()))?;
        Ok(self
            .ledger
            .import(rows, |department| principal.acts_for(department)))
    }

    /// Advisory per-department gate shown before a student files requests.
    pub fn eligibility(
        &self,
        principal: &Principal,
        student_id: &StudentId,
    ) -> Result<Vec<DepartmentAssessment>, ClearanceError> {
        require_self_or_staff(principal, student_id)?;
        let student = self.load_student(student_id)?;
        let mut assessments = self.tracker.assess_all(&student)?;
        redact_for_staff(principal, &mut assessments);
        Ok(assessments)
    }

    pub fn clearance_status(
        &self,
        principal: &Principal,
        student_id: &StudentId,
    ) -> Result<ClearanceStatusView, ClearanceError> {
        require_self_or_staff(principal, student_id)?;
        let student = self.load_student(student_id)?;
        let mut departments = self.tracker.assess_all(&student)?;
        redact_for_staff(principal, &mut departments);

        Ok(ClearanceStatusView {
            overall: overall_status_of(&student),
            certificate: student.certificate_artifact().cloned(),
            student_id: student.id,
            name: student.name,
            departments,
            history: student.history,
        })
    }

    /// Students submit for themselves; administrators may submit on a
    /// student's behalf.
    pub fn submit_request(
        &self,
        principal: &Principal,
        student_id: &StudentId,
        department: Department,
    ) -> Result<SubmitOutcome, ClearanceError> {
        match principal.role {
            Role::Student if principal.id == student_id.0 => {}
            Role::Admin => {}
            _ => {
                return Err(ClearanceError::forbidden(format!(
                    "'{}' cannot submit requests for '{student_id}'",
                    principal.id
                )))
            }
        }
        self.requests.submit(student_id, department)
    }

    pub fn decide_request(
        &self,
        principal: &Principal,
        request_id: &RequestId,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<DecisionOutcome, ClearanceError> {
        self.requests.decide(request_id, principal, decision, comment)
    }

    pub fn fetch_request(
        &self,
        principal: &Principal,
        request_id: &RequestId,
    ) -> Result<ClearanceRequest, ClearanceError> {
        let request = self.requests.fetch(request_id)?;
        let visible = match principal.role {
            Role::Student => principal.id == request.student_id.0,
            Role::Staff | Role::Admin => principal.acts_for(request.department),
        };
        if !visible {
            return Err(ClearanceError::forbidden(format!(
                "'{}' cannot read request '{}'",
                principal.id, request_id.0
            )));
        }
        Ok(request)
    }

    /// The filter is narrowed to what the caller may see: a student's own
    /// requests, or a staff member's department queue.
    pub fn list_requests(
        &self,
        principal: &Principal,
        filter: RequestFilter,
    ) -> Result<Vec<ClearanceRequest>, ClearanceError> {
        let mut filter = filter;
        match principal.role {
            Role::Student => {
                let own = StudentId(principal.id.clone());
                if filter.student_id.as_ref().is_some_and(|id| id != &own) {
                    return Err(ClearanceError::forbidden(
                        "students can only list their own requests",
                    ));
                }
                filter.student_id = Some(own);
            }
            Role::Staff => {
                let own = principal.department;
                if filter.department.is_some() && filter.department != own {
                    return Err(ClearanceError::forbidden(format!(
                        "'{}' can only list their department's requests",
                        principal.id
                    )));
                }
                filter.department = own;
            }
            Role::Admin => {}
        }
        self.requests.list(&filter)
    }

    pub fn overall_status(
        &self,
        principal: &Principal,
        student_id: &StudentId,
    ) -> Result<OverallStatus, ClearanceError> {
        require_self_or_staff(principal, student_id)?;
        self.aggregator.overall_status(student_id)
    }

    pub fn retry_certificate(
        &self,
        principal: &Principal,
        student_id: &StudentId,
    ) -> Result<CertificateArtifact, ClearanceError> {
        let allowed = match principal.role {
            Role::Student => principal.id == student_id.0,
            Role::Admin => true,
            Role::Staff => false,
        };
        if !allowed {
            return Err(ClearanceError::forbidden(format!(
                "'{}' cannot reissue certificates for '{student_id}'",
                principal.id
            )));
        }
        self.aggregator.retry_certificate(student_id)
    }

    pub fn verify(
        &self,
        principal: &Principal,
        student_id: &StudentId,
    ) -> Result<VerificationView, ClearanceError> {
        self.verification.verify(principal, student_id)
    }

    pub fn file_report(
        &self,
        principal: &Principal,
        department: Department,
        message: &str,
    ) -> Result<Report, ClearanceError> {
        if principal.role != Role::Student {
            return Err(ClearanceError::forbidden("only students file reports"));
        }
        self.reports
            .file(&StudentId(principal.id.clone()), department, message)
    }

    pub fn report_queue(
        &self,
        principal: &Principal,
        department: Option<Department>,
    ) -> Result<Vec<Report>, ClearanceError> {
        match principal.role {
            Role::Student => Err(ClearanceError::forbidden("students cannot read report queues")),
            Role::Staff => {
                if department.is_some() && department != principal.department {
                    return Err(ClearanceError::forbidden(format!(
                        "'{}' can only read their department's reports",
                        principal.id
                    )));
                }
                self.reports.queue(principal.department)
            }
            Role::Admin => self.reports.queue(department),
        }
    }

    pub fn resolve_report(
        &self,
        principal: &Principal,
        id: &ReportId,
    ) -> Result<Report, ClearanceError> {
        let report = self.reports.fetch(id)?;
        require_department(principal, report.department, "resolve reports")?;
        self.reports.resolve(id)
    }

    /// Newest first. Staff also receive their department channel.
    pub fn notifications(&self, principal: &Principal) -> Result<Vec<Notification>, ClearanceError> {
        let mut all = Vec::new();
        for recipient in recipients_of(principal) {
            all.extend(self.store.notifications_for(&recipient)?);
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    /// Idempotent. Unknown ids and notifications addressed to someone else
    /// both read as `NotFound`.
    pub fn mark_notification_read(
        &self,
        principal: &Principal,
        id: &NotificationId,
    ) -> Result<Notification, ClearanceError> {
        let owned = self
            .notifications(principal)?
            .into_iter()
            .find(|notification| &notification.id == id)
            .ok_or_else(|| ClearanceError::not_found("notification", id.0.clone()))?;
        if owned.read {
            return Ok(owned);
        }
        Ok(self.store.mark_notification_read(id)?)
    }

    pub fn mark_all_read(&self, principal: &Principal) -> Result<usize, ClearanceError> {
        let mut marked = 0;
        for recipient in recipients_of(principal) {
            marked += self.store.mark_all_read(&recipient)?;
        }
        Ok(marked)
    }

    fn load_student(&self, id: &StudentId) -> Result<Student, ClearanceError> {
        self.store
            .fetch_student(id)?
            .ok_or_else(|| ClearanceError::not_found("student", id.0.clone()))
    }
}

fn recipients_of(principal: &Principal) -> Vec<String> {
    let mut recipients = vec![principal.id.clone()];
    if let (Role::Staff, Some(department)) = (principal.role, principal.department) {
        recipients.push(department_channel(department));
    }
    recipients
}

/// Staff see every department's status but only their own obligations.
fn redact_for_staff(principal: &Principal, assessments: &mut [DepartmentAssessment]) {
    if principal.role != Role::Staff {
        return;
    }
    for assessment in assessments
        .iter_mut()
        .filter(|a| principal.department != Some(a.department))
    {
        assessment.blocking.clear();
        assessment.outstanding_amount = 0;
    }
}

fn require_admin(principal: &Principal, action: &str) -> Result<(), ClearanceError> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(ClearanceError::forbidden(format!(
            "only administrators may {action}"
        )))
    }
}

fn require_department(
    principal: &Principal,
    department: Department,
    action: &str,
) -> Result<(), ClearanceError> {
    if principal.acts_for(department) {
        Ok(())
    } else {
        Err(ClearanceError::forbidden(format!(
            "'{}' cannot {action} for {department}",
            principal.id
        )))
    }
}

fn require_self_or_staff(principal: &Principal, student_id: &StudentId) -> Result<(), ClearanceError> {
    if principal.role == Role::Student && principal.id != student_id.0 {
        return Err(ClearanceError::forbidden(format!(
            "'{}' cannot read records of '{student_id}'",
            principal.id
        )));
    }
    Ok(())
}

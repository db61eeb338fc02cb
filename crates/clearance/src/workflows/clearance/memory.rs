use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::{
    CertificateArtifact, CertificateState, ClearanceRequest, Department, DepartmentStatus,
    Notification, NotificationId, Obligation, ObligationId, Report, ReportId, ReportStatus,
    RequestId, RequestStatus, Staff, StaffId, StatusHistoryEntry, Student, StudentId,
};
use super::repository::{
    ClearanceStore, RepositoryError, RequestFilter, RequestTransition, StaffFilter,
};

#[derive(Debug, Default)]
struct StoreState {
    students: HashMap<StudentId, Student>,
    obligations: Vec<Obligation>,
    requests: Vec<ClearanceRequest>,
    staff: HashMap<StaffId, Staff>,
    reports: Vec<Report>,
    notifications: Vec<Notification>,
}

/// Mutex-backed store used by the API binary and the test suites. One lock
/// guards all collections so every trait call is a single atomic step.
#[derive(Debug, Default, Clone)]
pub struct InMemoryClearanceStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryClearanceStore {
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

impl StoreState {
    fn email_taken(&self, email: &str) -> bool {
        let key = email_key(email);
        self.students
            .values()
            .any(|student| email_key(&student.email) == key)
            || self.staff.values().any(|staff| email_key(&staff.email) == key)
    }

    fn student_mut(&mut self, id: &StudentId) -> Result<&mut Student, RepositoryError> {
        self.students
            .get_mut(id)
            .ok_or_else(|| RepositoryError::not_found("student", id.0.clone()))
    }
}

impl ClearanceStore for InMemoryClearanceStore {
    fn insert_student(&self, student: Student) -> Result<Student, RepositoryError> {
        let mut state = self.lock()?;
        if state.students.contains_key(&student.id) {
            return Err(RepositoryError::Conflict(format!(
                "student '{}' already registered",
                student.id
            )));
        }
        if state.email_taken(&student.email) {
            return Err(RepositoryError::Conflict(format!(
                "email '{}' already registered",
                student.email
            )));
        }
        state.students.insert(student.id.clone(), student.clone());
        Ok(student)
    }

    fn fetch_student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        Ok(self.lock()?.students.get(id).cloned())
    }

    fn find_student_by_email(&self, email: &str) -> Result<Option<Student>, RepositoryError> {
        let key = email_key(email);
        Ok(self
            .lock()?
            .students
            .values()
            .find(|student| email_key(&student.email) == key)
            .cloned())
    }

    fn set_department_status(
        &self,
        id: &StudentId,
        department: Department,
        status: DepartmentStatus,
        entry: StatusHistoryEntry,
    ) -> Result<Student, RepositoryError> {
        let mut state = self.lock()?;
        let student = state.student_mut(id)?;
        student.departments.insert(department, status);
        student.history.push(entry);
        Ok(student.clone())
    }

    fn claim_certificate(&self, id: &StudentId) -> Result<bool, RepositoryError> {
        let mut state = self.lock()?;
        let student = state.student_mut(id)?;
        if student.certificate != CertificateState::NotIssued {
            return Ok(false);
        }
        student.certificate = CertificateState::Issuing;
        Ok(true)
    }

    fn complete_certificate(
        &self,
        id: &StudentId,
        artifact: CertificateArtifact,
    ) -> Result<Student, RepositoryError> {
        let mut state = self.lock()?;
        let student = state.student_mut(id)?;
        if student.certificate != CertificateState::Issuing {
            return Err(RepositoryError::StaleState(format!(
                "certificate for '{id}' is not being issued"
            )));
        }
        student.certificate = CertificateState::Issued { artifact };
        Ok(student.clone())
    }

    fn release_certificate(&self, id: &StudentId) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let student = state.student_mut(id)?;
        if student.certificate == CertificateState::Issuing {
            student.certificate = CertificateState::NotIssued;
        }
        Ok(())
    }

    fn update_student_credential(
        &self,
        id: &StudentId,
        credential_hash: String,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        state.student_mut(id)?.credential_hash = credential_hash;
        Ok(())
    }

    fn insert_obligation(&self, obligation: Obligation) -> Result<Obligation, RepositoryError> {
        let mut state = self.lock()?;
        if state.obligations.iter().any(|o| o.id == obligation.id) {
            return Err(RepositoryError::Conflict(format!(
                "obligation '{}' already exists",
                obligation.id.0
            )));
        }
        state.obligations.push(obligation.clone());
        Ok(obligation)
    }

    fn fetch_obligation(&self, id: &ObligationId) -> Result<Option<Obligation>, RepositoryError> {
        Ok(self
            .lock()?
            .obligations
            .iter()
            .find(|o| &o.id == id)
            .cloned())
    }

    fn resolve_obligation(
        &self,
        id: &ObligationId,
        at: DateTime<Utc>,
    ) -> Result<Obligation, RepositoryError> {
        let mut state = self.lock()?;
        let obligation = state
            .obligations
            .iter_mut()
            .find(|o| &o.id == id)
            .ok_or_else(|| RepositoryError::not_found("obligation", id.0.clone()))?;
        if !obligation.resolved {
            obligation.resolved = true;
            obligation.resolved_at = Some(at);
        }
        Ok(obligation.clone())
    }

    fn obligations_for(
        &self,
        student: &StudentId,
        department: Option<Department>,
    ) -> Result<Vec<Obligation>, RepositoryError> {
        Ok(self
            .lock()?
            .obligations
            .iter()
            .filter(|o| &o.student_id == student)
            .filter(|o| department.map_or(true, |d| d == o.department))
            .cloned()
            .collect())
    }

    fn insert_request(&self, request: ClearanceRequest) -> Result<ClearanceRequest, RepositoryError> {
        let mut state = self.lock()?;
        let duplicate = state.requests.iter().any(|existing| {
            existing.student_id == request.student_id
                && existing.department == request.department
                && existing.status == RequestStatus::Pending
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "pending {} request already exists for '{}'",
                request.department, request.student_id
            )));
        }
        state.requests.push(request.clone());
        Ok(request)
    }

    fn fetch_request(&self, id: &RequestId) -> Result<Option<ClearanceRequest>, RepositoryError> {
        Ok(self
            .lock()?
            .requests
            .iter()
            .find(|r| &r.id == id)
            .cloned())
    }

    fn open_request(
        &self,
        student: &StudentId,
        department: Department,
    ) -> Result<Option<ClearanceRequest>, RepositoryError> {
        Ok(self
            .lock()?
            .requests
            .iter()
            .find(|r| {
                &r.student_id == student
                    && r.department == department
                    && r.status == RequestStatus::Pending
            })
            .cloned())
    }

    fn apply_decision(
        &self,
        id: &RequestId,
        transition: RequestTransition,
        status: DepartmentStatus,
    ) -> Result<(ClearanceRequest, Student), RepositoryError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let request = state
            .requests
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| RepositoryError::not_found("request", id.0.clone()))?;
        if request.status != RequestStatus::Pending {
            return Err(RepositoryError::StaleState(format!(
                "request '{}' is already {}",
                id.0,
                request.status.label()
            )));
        }
        let student = state
            .students
            .get_mut(&request.student_id)
            .ok_or_else(|| RepositoryError::not_found("student", request.student_id.0.clone()))?;

        request.status = transition.to;
        request.decided_at = Some(transition.decided_at);
        request.decided_by = Some(transition.decided_by.clone());
        request.comment = transition.comment.clone();

        student.departments.insert(request.department, status);
        student.history.push(StatusHistoryEntry {
            department: request.department,
            status,
            at: transition.decided_at,
            comment: transition.comment,
            actor: Some(transition.decided_by),
        });
        Ok((request.clone(), student.clone()))
    }

    fn requests(&self, filter: &RequestFilter) -> Result<Vec<ClearanceRequest>, RepositoryError> {
        Ok(self
            .lock()?
            .requests
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn insert_staff(&self, staff: Staff) -> Result<Staff, RepositoryError> {
        let mut state = self.lock()?;
        if state.staff.contains_key(&staff.id) || state.email_taken(&staff.email) {
            return Err(RepositoryError::Conflict(format!(
                "email '{}' already registered",
                staff.email
            )));
        }
        state.staff.insert(staff.id.clone(), staff.clone());
        Ok(staff)
    }

    fn fetch_staff(&self, id: &StaffId) -> Result<Option<Staff>, RepositoryError> {
        Ok(self.lock()?.staff.get(id).cloned())
    }

    fn find_staff_by_email(&self, email: &str) -> Result<Option<Staff>, RepositoryError> {
        let key = email_key(email);
        Ok(self
            .lock()?
            .staff
            .values()
            .find(|staff| email_key(&staff.email) == key)
            .cloned())
    }

    fn list_staff(&self, filter: &StaffFilter) -> Result<Vec<Staff>, RepositoryError> {
        let mut staff: Vec<Staff> = self
            .lock()?
            .staff
            .values()
            .filter(|member| filter.matches(member))
            .cloned()
            .collect();
        staff.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
        Ok(staff)
    }

    fn update_staff_credential(
        &self,
        id: &StaffId,
        credential_hash: String,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let staff = state
            .staff
            .get_mut(id)
            .ok_or_else(|| RepositoryError::not_found("staff", id.0.clone()))?;
        staff.credential_hash = credential_hash;
        Ok(())
    }

    fn insert_report(&self, report: Report) -> Result<Report, RepositoryError> {
        self.lock()?.reports.push(report.clone());
        Ok(report)
    }

    fn fetch_report(&self, id: &ReportId) -> Result<Option<Report>, RepositoryError> {
        Ok(self.lock()?.reports.iter().find(|r| &r.id == id).cloned())
    }

    fn reports(&self, department: Option<Department>) -> Result<Vec<Report>, RepositoryError> {
        Ok(self
            .lock()?
            .reports
            .iter()
            .filter(|r| department.map_or(true, |d| d == r.department))
            .cloned()
            .collect())
    }

    fn resolve_report(&self, id: &ReportId, at: DateTime<Utc>) -> Result<Report, RepositoryError> {
        let mut state = self.lock()?;
        let report = state
            .reports
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| RepositoryError::not_found("report", id.0.clone()))?;
        if report.status == ReportStatus::Pending {
            report.status = ReportStatus::Resolved;
            report.resolved_at = Some(at);
        }
        Ok(report.clone())
    }

    fn insert_notification(
        &self,
        notification: Notification,
    ) -> Result<Notification, RepositoryError> {
        self.lock()?.notifications.push(notification.clone());
        Ok(notification)
    }

    fn notifications_for(&self, recipient: &str) -> Result<Vec<Notification>, RepositoryError> {
        let mut found: Vec<Notification> = self
            .lock()?
            .notifications
            .iter()
            .filter(|n| n.recipient == recipient)
            .cloned()
            .collect();
        found.reverse();
        Ok(found)
    }

    fn mark_notification_read(
        &self,
        id: &NotificationId,
    ) -> Result<Notification, RepositoryError> {
        let mut state = self.lock()?;
        let notification = state
            .notifications
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or_else(|| RepositoryError::not_found("notification", id.0.clone()))?;
        notification.read = true;
        Ok(notification.clone())
    }

    fn mark_all_read(&self, recipient: &str) -> Result<usize, RepositoryError> {
        let mut state = self.lock()?;
        let mut updated = 0;
        for notification in state
            .notifications
            .iter_mut()
            .filter(|n| n.recipient == recipient && !n.read)
        {
            notification.read = true;
            updated += 1;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::clearance::domain::{ObligationKind, Role};

    fn student(id: &str, email: &str) -> Student {
        Student::new(
            StudentId(id.to_string()),
            "Test Student".to_string(),
            email.to_string(),
            String::new(),
        )
    }

    #[test]
    fn rejects_duplicate_student_id_and_email() {
        let store = InMemoryClearanceStore::default();
        store
            .insert_student(student("U1", "one@uni.test"))
            .expect("first insert");

        assert!(matches!(
            store.insert_student(student("U1", "other@uni.test")),
            Err(RepositoryError::Conflict(_))
        ));
        assert!(matches!(
            store.insert_student(student("U2", "ONE@uni.test")),
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[test]
    fn staff_email_collides_with_student_email() {
        let store = InMemoryClearanceStore::default();
        store
            .insert_student(student("U1", "shared@uni.test"))
            .expect("insert");
        let staff = Staff {
            id: StaffId("stf-1".to_string()),
            name: "Bursar".to_string(),
            email: "shared@uni.test".to_string(),
            credential_hash: String::new(),
            role: Role::Staff,
            department: Some(Department::Finance),
            created_at: Utc::now(),
        };
        assert!(matches!(
            store.insert_staff(staff),
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[test]
    fn department_updates_do_not_clobber_each_other() {
        let store = InMemoryClearanceStore::default();
        let id = StudentId("U1".to_string());
        store
            .insert_student(student("U1", "one@uni.test"))
            .expect("insert");

        let entry = |department| StatusHistoryEntry {
            department,
            status: DepartmentStatus::Approved,
            at: Utc::now(),
            comment: None,
            actor: None,
        };

        std::thread::scope(|scope| {
            for department in Department::ALL {
                let store = store.clone();
                let id = id.clone();
                scope.spawn(move || {
                    store
                        .set_department_status(
                            &id,
                            department,
                            DepartmentStatus::Approved,
                            entry(department),
                        )
                        .expect("update");
                });
            }
        });

        let stored = store.fetch_student(&id).expect("fetch").expect("present");
        assert!(stored
            .departments
            .values()
            .all(|status| *status == DepartmentStatus::Approved));
        assert_eq!(stored.history.len(), 5);
    }

    #[test]
    fn certificate_claim_is_exclusive() {
        let store = InMemoryClearanceStore::default();
        let id = StudentId("U1".to_string());
        store
            .insert_student(student("U1", "one@uni.test"))
            .expect("insert");

        assert!(store.claim_certificate(&id).expect("claim"));
        assert!(!store.claim_certificate(&id).expect("second claim"));
        store.release_certificate(&id).expect("release");
        assert!(store.claim_certificate(&id).expect("claim after release"));
    }

    #[test]
    fn obligations_keep_insertion_order() {
        let store = InMemoryClearanceStore::default();
        let owner = StudentId("U1".to_string());
        for (index, department) in [Department::Library, Department::Finance, Department::Library]
            .into_iter()
            .enumerate()
        {
            store
                .insert_obligation(Obligation {
                    id: ObligationId(format!("obl-{index}")),
                    student_id: owner.clone(),
                    department,
                    kind: ObligationKind::Fee,
                    description: format!("item {index}"),
                    amount: 100,
                    resolved: false,
                    resolved_at: None,
                    created_at: Utc::now(),
                })
                .expect("insert");
        }

        let library: Vec<String> = store
            .obligations_for(&owner, Some(Department::Library))
            .expect("list")
            .into_iter()
            .map(|o| o.id.0)
            .collect();
        assert_eq!(library, vec!["obl-0".to_string(), "obl-2".to_string()]);
        assert_eq!(store.obligations_for(&owner, None).expect("list").len(), 3);
    }

    fn approve_by(actor: &str) -> RequestTransition {
        RequestTransition {
            to: RequestStatus::Approved,
            decided_by: actor.to_string(),
            decided_at: Utc::now(),
            comment: Some("books returned".to_string()),
        }
    }

    #[test]
    fn decision_moves_request_and_department_together() {
        let store = InMemoryClearanceStore::default();
        let id = StudentId("U1".to_string());
        store
            .insert_student(student("U1", "one@uni.test"))
            .expect("insert");
        let request = store
            .insert_request(ClearanceRequest::new(id.clone(), Department::Library))
            .expect("request");

        let (decided, updated) = store
            .apply_decision(&request.id, approve_by("stf-lib"), DepartmentStatus::Approved)
            .expect("decision");

        assert_eq!(decided.status, RequestStatus::Approved);
        assert_eq!(updated.status_of(Department::Library), DepartmentStatus::Approved);
        assert_eq!(updated.history.len(), 1);
        assert_eq!(updated.history[0].actor.as_deref(), Some("stf-lib"));
        assert_eq!(updated.history[0].comment.as_deref(), Some("books returned"));

        assert!(matches!(
            store.apply_decision(&request.id, approve_by("stf-lib"), DepartmentStatus::Approved),
            Err(RepositoryError::StaleState(_))
        ));
        let stored = store.fetch_student(&id).expect("fetch").expect("present");
        assert_eq!(stored.history.len(), 1);
    }

    #[test]
    fn failed_status_write_leaves_request_pending() {
        let store = InMemoryClearanceStore::default();
        let request = store
            .insert_request(ClearanceRequest::new(
                StudentId("U-missing".to_string()),
                Department::Finance,
            ))
            .expect("request");

        assert!(matches!(
            store.apply_decision(&request.id, approve_by("stf-fin"), DepartmentStatus::Approved),
            Err(RepositoryError::NotFound { entity: "student", .. })
        ));

        let stored = store
            .fetch_request(&request.id)
            .expect("fetch")
            .expect("present");
        assert_eq!(stored.status, RequestStatus::Pending);
        assert!(stored.decided_at.is_none());
        assert!(stored.decided_by.is_none());
    }
}

//! Department status tracking.
//!
//! The recorded status of a department only changes through staff decisions
//! (and the reset on resubmission). Outstanding obligations are reported
//! alongside it: they gate what a student is told they can request, but a
//! staff approval is accepted even while they are outstanding.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    ClearanceRequest, Department, DepartmentStatus, Obligation, StatusHistoryEntry, Student,
    StudentId,
};
use super::error::ClearanceError;
use super::repository::{ClearanceStore, RequestTransition};

/// Status of one department for one student, with the obligations holding it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentAssessment {
    pub department: Department,
    pub status: DepartmentStatus,
    pub blocking: Vec<Obligation>,
    pub outstanding_amount: u64,
    pub has_open_request: bool,
    /// Student-facing gate: nothing outstanding, no open request, not yet approved.
    pub can_request: bool,
}

/// Sum of blocking amounts, saturating at `u64::MAX`.
pub fn outstanding_total(obligations: &[Obligation]) -> u64 {
    obligations
        .iter()
        .filter(|o| o.is_blocking())
        .map(|o| o.amount)
        .fold(0, u64::saturating_add)
}

pub struct DepartmentStatusTracker<S> {
    store: Arc<S>,
}

impl<S> DepartmentStatusTracker<S>
where
    S: ClearanceStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn student(&self, id: &StudentId) -> Result<Student, ClearanceError> {
        self.store
            .fetch_student(id)?
            .ok_or_else(|| ClearanceError::not_found("student", id.0.clone()))
    }

    pub fn status(
        &self,
        student_id: &StudentId,
        department: Department,
    ) -> Result<DepartmentStatus, ClearanceError> {
        Ok(self.student(student_id)?.status_of(department))
    }

    pub fn assess(
        &self,
        student_id: &StudentId,
        department: Department,
    ) -> Result<DepartmentAssessment, ClearanceError> {
        let student = self.student(student_id)?;
        self.assess_loaded(&student, department)
    }

    pub fn assess_all(&self, student: &Student) -> Result<Vec<DepartmentAssessment>, ClearanceError> {
        Department::ALL
            .into_iter()
            .map(|department| self.assess_loaded(student, department))
            .collect()
    }

    fn assess_loaded(
        &self,
        student: &Student,
        department: Department,
    ) -> Result<DepartmentAssessment, ClearanceError> {
        let blocking: Vec<Obligation> = self
            .store
            .obligations_for(&student.id, Some(department))?
            .into_iter()
            .filter(Obligation::is_blocking)
            .collect();
        let outstanding_amount = outstanding_total(&blocking);
        let has_open_request = self.store.open_request(&student.id, department)?.is_some();
        let status = student.status_of(department);

        Ok(DepartmentAssessment {
            department,
            status,
            can_request: blocking.is_empty()
                && !has_open_request
                && status != DepartmentStatus::Approved,
            blocking,
            outstanding_amount,
            has_open_request,
        })
    }

    /// Applies a staff decision to the request and the status map in one
    /// store step.
    pub fn record_decision(
        &self,
        request: &ClearanceRequest,
        transition: RequestTransition,
        status: DepartmentStatus,
    ) -> Result<(ClearanceRequest, Student), ClearanceError> {
        if status == DepartmentStatus::Approved {
            let outstanding = outstanding_total(
                &self
                    .store
                    .obligations_for(&request.student_id, Some(request.department))?,
            );
            if outstanding > 0 {
                warn!(
                    student = %request.student_id,
                    department = %request.department,
                    outstanding,
                    actor = %transition.decided_by,
                    "approval overrides outstanding obligations"
                );
            }
        }

        let (decided, student) = self.store.apply_decision(&request.id, transition, status)?;
        info!(
            student = %decided.student_id,
            department = %decided.department,
            status = status.label(),
            "department status recorded"
        );
        Ok((decided, student))
    }

    /// Puts a rejected department back to pending for a fresh request.
    pub fn reopen(
        &self,
        student_id: &StudentId,
        department: Department,
    ) -> Result<Student, ClearanceError> {
        let entry = StatusHistoryEntry {
            department,
            status: DepartmentStatus::Pending,
            at: Utc::now(),
            comment: Some("request resubmitted".to_string()),
            actor: Some(student_id.0.clone()),
        };
        Ok(self.store.set_department_status(
            student_id,
            department,
            DepartmentStatus::Pending,
            entry,
        )?)
    }
}

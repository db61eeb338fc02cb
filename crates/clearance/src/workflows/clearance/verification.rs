use std::sync::Arc;

use serde::Serialize;

use super::domain::{ClearanceRequest, Department, DepartmentStatus, Obligation, Role, StudentId};
use super::error::ClearanceError;
use super::repository::ClearanceStore;
use crate::auth::Principal;

/// What the scanning staff member may see for one department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentSnapshot {
    pub department: Department,
    pub status: DepartmentStatus,
    pub obligations: Vec<Obligation>,
    pub open_request: Option<ClearanceRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationView {
    pub student_id: StudentId,
    pub name: String,
    pub departments: Vec<DepartmentSnapshot>,
}

/// Read-only projection behind the QR on-the-spot check.
pub struct VerificationService<S> {
    store: Arc<S>,
}

impl<S> VerificationService<S>
where
    S: ClearanceStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Staff see only their own department; admins see every department.
    /// Fails `NotFound` unless the student has an open request in scope.
    pub fn verify(
        &self,
        principal: &Principal,
        student_id: &StudentId,
    ) -> Result<VerificationView, ClearanceError> {
        if principal.role == Role::Student {
            return Err(ClearanceError::forbidden("students cannot verify clearance"));
        }
        let scope: Vec<Department> = match principal.department_scope() {
            Some(department) => vec![department],
            None => Department::ALL.to_vec(),
        };

        let student = self
            .store
            .fetch_student(student_id)?
            .ok_or_else(|| ClearanceError::not_found("student", student_id.0.clone()))?;

        let mut departments = Vec::with_capacity(scope.len());
        for department in scope {
            departments.push(DepartmentSnapshot {
                department,
                status: student.status_of(department),
                obligations: self.store.obligations_for(student_id, Some(department))?,
                open_request: self.store.open_request(student_id, department)?,
            });
        }

        if departments.iter().all(|snapshot| snapshot.open_request.is_none()) {
            return Err(ClearanceError::not_found(
                "open request",
                student_id.0.clone(),
            ));
        }

        Ok(VerificationView {
            student_id: student.id,
            name: student.name,
            departments,
        })
    }
}

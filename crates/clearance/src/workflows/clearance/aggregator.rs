use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::certificate::{CertificateOutcome, CertificateRenderer};
use super::domain::{
    CertificateArtifact, Department, DepartmentStatus, OverallStatus, Student, StudentId,
};
use super::error::ClearanceError;
use super::events::{emit, DomainEvent, EventPublisher};
use super::repository::ClearanceStore;

/// `cleared` iff all five departments have individually approved.
pub fn overall_status_of(student: &Student) -> OverallStatus {
    let all_approved = Department::ALL
        .iter()
        .all(|department| student.status_of(*department) == DepartmentStatus::Approved);
    if all_approved {
        OverallStatus::Cleared
    } else {
        OverallStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateOutcome {
    pub overall: OverallStatus,
    pub certificate: CertificateOutcome,
}

/// Derives the overall status and gates one-time certificate issuance.
pub struct ClearanceAggregator<S, P, C> {
    store: Arc<S>,
    events: Arc<P>,
    renderer: Arc<C>,
}

impl<S, P, C> ClearanceAggregator<S, P, C>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    pub fn new(store: Arc<S>, events: Arc<P>, renderer: Arc<C>) -> Self {
        Self {
            store,
            events,
            renderer,
        }
    }

    fn student(&self, id: &StudentId) -> Result<Student, ClearanceError> {
        self.store
            .fetch_student(id)?
            .ok_or_else(|| ClearanceError::not_found("student", id.0.clone()))
    }

    pub fn overall_status(&self, student_id: &StudentId) -> Result<OverallStatus, ClearanceError> {
        Ok(overall_status_of(&self.student(student_id)?))
    }

    /// Recomputes the aggregate and, on first reaching `cleared`, issues the
    /// certificate. Safe to call repeatedly and concurrently: only the caller
    /// that wins the store-level claim renders. A render failure keeps the
    /// student cleared and releases the claim for a later retry.
    pub fn evaluate(&self, student_id: &StudentId) -> Result<AggregateOutcome, ClearanceError> {
        let student = self.student(student_id)?;
        let overall = overall_status_of(&student);
        if overall != OverallStatus::Cleared {
            return Ok(AggregateOutcome {
                overall,
                certificate: CertificateOutcome::NotEligible,
            });
        }

        let certificate = match self.issue(&student)? {
            Some(Ok(artifact)) => CertificateOutcome::Issued { artifact },
            Some(Err(reason)) => CertificateOutcome::Failed { reason },
            None => CertificateOutcome::AlreadyIssued,
        };
        Ok(AggregateOutcome {
            overall,
            certificate,
        })
    }

    /// Re-runs issuance for a cleared student whose certificate is missing.
    pub fn retry_certificate(
        &self,
        student_id: &StudentId,
    ) -> Result<CertificateArtifact, ClearanceError> {
        let student = self.student(student_id)?;
        if let Some(artifact) = student.certificate_artifact() {
            return Ok(artifact.clone());
        }
        if overall_status_of(&student) != OverallStatus::Cleared {
            return Err(ClearanceError::InvalidTransition(format!(
                "student '{student_id}' is not cleared yet"
            )));
        }

        match self.issue(&student)? {
            Some(Ok(artifact)) => Ok(artifact),
            Some(Err(reason)) => Err(ClearanceError::UpstreamFailure(reason)),
            None => self
                .student(student_id)?
                .certificate_artifact()
                .cloned()
                .ok_or_else(|| {
                    ClearanceError::Conflict(format!(
                        "certificate for '{student_id}' is already being issued"
                    ))
                }),
        }
    }

    /// `None` when another caller holds or completed the claim.
    fn issue(
        &self,
        student: &Student,
    ) -> Result<Option<Result<CertificateArtifact, String>>, ClearanceError> {
        if !self.store.claim_certificate(&student.id)? {
            debug!(student = %student.id, "certificate already issued or in progress");
            return Ok(None);
        }

        match self.renderer.render(student) {
            Ok(artifact) => {
                self.store
                    .complete_certificate(&student.id, artifact.clone())?;
                info!(
                    student = %student.id,
                    reference = %artifact.reference,
                    "clearance certificate issued"
                );
                emit(
                    self.events.as_ref(),
                    DomainEvent::ClearanceAchieved {
                        student_id: student.id.clone(),
                        certificate: artifact.clone(),
                    },
                );
                Ok(Some(Ok(artifact)))
            }
            Err(err) => {
                self.store.release_certificate(&student.id)?;
                warn!(student = %student.id, error = %err, "certificate rendering failed");
                Ok(Some(Err(err.to_string())))
            }
        }
    }
}

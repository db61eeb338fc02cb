//! Clearance request state machine: `pending -> approved | rejected`.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use super::aggregator::{AggregateOutcome, ClearanceAggregator};
use super::certificate::CertificateRenderer;
use super::domain::{
    ClearanceRequest, Decision, Department, DepartmentStatus, RequestId, Role, StudentId,
};
use super::error::ClearanceError;
use super::events::{emit, DomainEvent, EventPublisher};
use super::repository::{ClearanceStore, RepositoryError, RequestFilter, RequestTransition};
use super::tracker::DepartmentStatusTracker;
use crate::auth::Principal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub request: ClearanceRequest,
    /// `false` when an identical pending request already existed.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionOutcome {
    pub request: ClearanceRequest,
    pub aggregate: AggregateOutcome,
}

pub struct RequestWorkflow<S, P, C> {
    store: Arc<S>,
    events: Arc<P>,
    tracker: Arc<DepartmentStatusTracker<S>>,
    aggregator: Arc<ClearanceAggregator<S, P, C>>,
}

impl<S, P, C> RequestWorkflow<S, P, C>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    pub fn new(
        store: Arc<S>,
        events: Arc<P>,
        tracker: Arc<DepartmentStatusTracker<S>>,
        aggregator: Arc<ClearanceAggregator<S, P, C>>,
    ) -> Self {
        Self {
            store,
            events,
            tracker,
            aggregator,
        }
    }

    /// Opens a pending request. A duplicate while one is pending returns the
    /// existing request; a rejected department is reset to pending.
    pub fn submit(
        &self,
        student_id: &StudentId,
        department: Department,
    ) -> Result<SubmitOutcome, ClearanceError> {
        let student = self
            .store
            .fetch_student(student_id)?
            .ok_or_else(|| ClearanceError::not_found("student", student_id.0.clone()))?;

        if let Some(existing) = self.store.open_request(student_id, department)? {
            debug!(student = %student_id, department = %department, "request already pending");
            return Ok(SubmitOutcome {
                request: existing,
                created: false,
            });
        }

        match student.status_of(department) {
            DepartmentStatus::Approved => {
                return Err(ClearanceError::InvalidTransition(format!(
                    "{department} already approved for '{student_id}'"
                )))
            }
            DepartmentStatus::Rejected => {
                self.tracker.reopen(student_id, department)?;
            }
            DepartmentStatus::Pending => {}
        }

        let request = match self
            .store
            .insert_request(ClearanceRequest::new(student_id.clone(), department))
        {
            Ok(request) => request,
            Err(RepositoryError::Conflict(_)) => {
                let existing = self
                    .store
                    .open_request(student_id, department)?
                    .ok_or_else(|| {
                        ClearanceError::Conflict(format!(
                            "{department} request for '{student_id}' changed concurrently"
                        ))
                    })?;
                return Ok(SubmitOutcome {
                    request: existing,
                    created: false,
                });
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            request = %request.id.0,
            student = %student_id,
            department = %department,
            "clearance request submitted"
        );
        emit(
            self.events.as_ref(),
            DomainEvent::RequestSubmitted {
                request_id: request.id.clone(),
                student_id: student_id.clone(),
                department,
            },
        );
        Ok(SubmitOutcome {
            request,
            created: true,
        })
    }

    pub fn fetch(&self, id: &RequestId) -> Result<ClearanceRequest, ClearanceError> {
        self.store
            .fetch_request(id)?
            .ok_or_else(|| ClearanceError::not_found("request", id.0.clone()))
    }

    /// Applies a staff verdict to a pending request, records it on the
    /// student and recomputes the aggregate.
    pub fn decide(
        &self,
        request_id: &RequestId,
        principal: &Principal,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<DecisionOutcome, ClearanceError> {
        let request = self.fetch(request_id)?;
        if principal.role == Role::Student || !principal.acts_for(request.department) {
            return Err(ClearanceError::forbidden(format!(
                "'{}' cannot decide {} requests",
                principal.id, request.department
            )));
        }
        if request.status.is_terminal() {
            return Err(ClearanceError::InvalidTransition(format!(
                "request '{}' is already {}",
                request_id.0,
                request.status.label()
            )));
        }

        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let (decided, _) = self.tracker.record_decision(
            &request,
            RequestTransition {
                to: decision.request_status(),
                decided_by: principal.id.clone(),
                decided_at: Utc::now(),
                comment: comment.clone(),
            },
            decision.department_status(),
        )?;

        info!(
            request = %request_id.0,
            student = %decided.student_id,
            department = %decided.department,
            decision = decided.status.label(),
            actor = %principal.id,
            "clearance request decided"
        );
        emit(
            self.events.as_ref(),
            DomainEvent::RequestDecided {
                request_id: decided.id.clone(),
                student_id: decided.student_id.clone(),
                department: decided.department,
                decision,
                comment,
            },
        );

        let aggregate = self.aggregator.evaluate(&decided.student_id)?;
        Ok(DecisionOutcome {
            request: decided,
            aggregate,
        })
    }

    pub fn list(&self, filter: &RequestFilter) -> Result<Vec<ClearanceRequest>, ClearanceError> {
        Ok(self.store.requests(filter)?)
    }
}

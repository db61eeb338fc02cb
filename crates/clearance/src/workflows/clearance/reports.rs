use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::domain::{generate_id, Department, Report, ReportId, ReportStatus, StudentId};
use super::error::ClearanceError;
use super::events::{emit, DomainEvent, EventPublisher};
use super::repository::ClearanceStore;

const MAX_MESSAGE_LEN: usize = 2000;

/// Student complaints routed to department queues. Has no effect on clearance state.
pub struct ReportDesk<S, P> {
    store: Arc<S>,
    events: Arc<P>,
}

impl<S, P> ReportDesk<S, P>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
{
    pub fn new(store: Arc<S>, events: Arc<P>) -> Self {
        Self { store, events }
    }

    pub fn file(
        &self,
        student_id: &StudentId,
        department: Department,
        message: &str,
    ) -> Result<Report, ClearanceError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ClearanceError::invalid("report message is required"));
        }
        if message.chars().count() > MAX_MESSAGE_LEN {
            return Err(ClearanceError::invalid(format!(
                "report message exceeds {MAX_MESSAGE_LEN} characters"
            )));
        }
        if self.store.fetch_student(student_id)?.is_none() {
            return Err(ClearanceError::not_found("student", student_id.0.clone()));
        }

        let report = self.store.insert_report(Report {
            id: ReportId(generate_id("rep")),
            student_id: student_id.clone(),
            department,
            message: message.to_string(),
            status: ReportStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        })?;

        info!(report = %report.id.0, department = %department, "report filed");
        emit(
            self.events.as_ref(),
            DomainEvent::ReportFiled {
                report_id: report.id.clone(),
                student_id: report.student_id.clone(),
                department,
            },
        );
        Ok(report)
    }

    pub fn fetch(&self, id: &ReportId) -> Result<Report, ClearanceError> {
        self.store
            .fetch_report(id)?
            .ok_or_else(|| ClearanceError::not_found("report", id.0.clone()))
    }

    pub fn queue(&self, department: Option<Department>) -> Result<Vec<Report>, ClearanceError> {
        Ok(self.store.reports(department)?)
    }

    /// Idempotent: resolving a resolved report returns it unchanged.
    pub fn resolve(&self, id: &ReportId) -> Result<Report, ClearanceError> {
        let current = self.fetch(id)?;
        if current.status == ReportStatus::Resolved {
            debug!(report = %id.0, "report already resolved");
            return Ok(current);
        }

        let resolved = self.store.resolve_report(id, Utc::now())?;
        emit(
            self.events.as_ref(),
            DomainEvent::ReportResolved {
                report_id: resolved.id.clone(),
                student_id: resolved.student_id.clone(),
                department: resolved.department,
            },
        );
        Ok(resolved)
    }
}

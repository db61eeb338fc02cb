//! Per-student, per-department obligation buckets.

mod import;

pub use import::{ImportRow, ImportSkip, ObligationImportError, ObligationImportSummary};
pub(crate) use import::parse_rows;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::domain::{
    generate_id, Department, Obligation, ObligationId, ObligationKind, StudentId,
};
use super::error::ClearanceError;
use super::events::{emit, DomainEvent, EventPublisher};
use super::repository::ClearanceStore;

/// Input for a new obligation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct NewObligation {
    pub student_id: StudentId,
    pub department: Department,
    pub kind: ObligationKind,
    pub description: String,
    #[serde(default)]
    pub amount: u64,
}

pub struct ObligationLedger<S, P> {
    store: Arc<S>,
    events: Arc<P>,
}

impl<S, P> ObligationLedger<S, P>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
{
    pub fn new(store: Arc<S>, events: Arc<P>) -> Self {
        Self { store, events }
    }

    /// Records an unresolved obligation in the student's department bucket.
    pub fn add(&self, input: NewObligation) -> Result<Obligation, ClearanceError> {
        let description = input.description.trim();
        if description.is_empty() {
            return Err(ClearanceError::invalid("obligation description is required"));
        }
        if self.store.fetch_student(&input.student_id)?.is_none() {
            return Err(ClearanceError::not_found("student", input.student_id.0));
        }

        let obligation = self.store.insert_obligation(Obligation {
            id: ObligationId(generate_id("obl")),
            student_id: input.student_id,
            department: input.department,
            kind: input.kind,
            description: description.to_string(),
            amount: input.amount,
            resolved: false,
            resolved_at: None,
            created_at: Utc::now(),
        })?;

        info!(
            student = %obligation.student_id,
            department = %obligation.department,
            amount = obligation.amount,
            "obligation recorded"
        );
        emit(
            self.events.as_ref(),
            DomainEvent::ObligationAdded {
                obligation_id: obligation.id.clone(),
                student_id: obligation.student_id.clone(),
                department: obligation.department,
                amount: obligation.amount,
            },
        );
        Ok(obligation)
    }

    pub fn fetch(&self, id: &ObligationId) -> Result<Obligation, ClearanceError> {
        self.store
            .fetch_obligation(id)?
            .ok_or_else(|| ClearanceError::not_found("obligation", id.0.clone()))
    }

    /// Marks the obligation resolved. Calling it again leaves the first
    /// `resolved_at` untouched.
    pub fn resolve(&self, id: &ObligationId) -> Result<Obligation, ClearanceError> {
        let current = self.fetch(id)?;
        if current.resolved {
            debug!(obligation = %id.0, "obligation already resolved");
            return Ok(current);
        }
        let resolved = self.store.resolve_obligation(id, Utc::now())?;
        info!(
            obligation = %id.0,
            student = %resolved.student_id,
            department = %resolved.department,
            "obligation resolved"
        );
        Ok(resolved)
    }

    /// Insertion-ordered obligations, optionally for one department.
    pub fn list(
        &self,
        student_id: &StudentId,
        department: Option<Department>,
    ) -> Result<Vec<Obligation>, ClearanceError> {
        if self.store.fetch_student(student_id)?.is_none() {
            return Err(ClearanceError::not_found("student", student_id.0.clone()));
        }
        Ok(self.store.obligations_for(student_id, department)?)
    }

    /// Unresolved obligations with a cost in one department.
    pub fn blocking(
        &self,
        student_id: &StudentId,
        department: Department,
    ) -> Result<Vec<Obligation>, ClearanceError> {
        Ok(self
            .store
            .obligations_for(student_id, Some(department))?
            .into_iter()
            .filter(Obligation::is_blocking)
            .collect())
    }

    /// Adds every importable row; rows that fail validation or fall outside
    /// `allowed` are reported with their line number instead.
    pub fn import(
        &self,
        rows: Vec<ImportRow>,
        allowed: impl Fn(Department) -> bool,
    ) -> ObligationImportSummary {
        let mut summary = ObligationImportSummary::default();
        for row in rows {
            let line = row.line;
            let input = match row.into_obligation() {
                Ok(input) => input,
                Err(reason) => {
                    summary.skipped.push(ImportSkip { line, reason });
                    continue;
                }
            };
            if !allowed(input.department) {
                summary.skipped.push(ImportSkip {
                    line,
                    reason: format!("not permitted to record {} obligations", input.department),
                });
                continue;
            }
            match self.add(input) {
                Ok(obligation) => summary.created.push(obligation),
                Err(err) => summary.skipped.push(ImportSkip {
                    line,
                    reason: err.to_string(),
                }),
            }
        }
        info!(
            created = summary.created.len(),
            skipped = summary.skipped.len(),
            "obligation import finished"
        );
        summary
    }
}

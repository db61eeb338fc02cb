use std::sync::Arc;

use chrono::Utc;

use super::common::*;
use crate::workflows::clearance::aggregator::{overall_status_of, ClearanceAggregator};
use crate::workflows::clearance::certificate::CertificateOutcome;
use crate::workflows::clearance::domain::{
    CertificateState, Decision, Department, DepartmentStatus, ObligationKind, OverallStatus,
    StatusHistoryEntry, StudentId,
};
use crate::workflows::clearance::error::ClearanceError;
use crate::workflows::clearance::ledger::NewObligation;
use crate::workflows::clearance::memory::InMemoryClearanceStore;
use crate::workflows::clearance::repository::ClearanceStore;

fn force_status(
    store: &InMemoryClearanceStore,
    id: &StudentId,
    department: Department,
    status: DepartmentStatus,
) {
    store
        .set_department_status(
            id,
            department,
            status,
            StatusHistoryEntry {
                department,
                status,
                at: Utc::now(),
                comment: None,
                actor: Some("fixture".to_string()),
            },
        )
        .expect("set status");
}

#[test]
fn overall_is_cleared_only_when_every_department_approved() {
    let store = InMemoryClearanceStore::default();
    let id = seed_student(&store, "U300");

    for (index, department) in Department::ALL.into_iter().enumerate() {
        let student = store.fetch_student(&id).expect("fetch").expect("present");
        assert_eq!(overall_status_of(&student), OverallStatus::Pending, "after {index} approvals");
        force_status(&store, &id, department, DepartmentStatus::Approved);
    }
    let student = store.fetch_student(&id).expect("fetch").expect("present");
    assert_eq!(overall_status_of(&student), OverallStatus::Cleared);

    force_status(&store, &id, Department::Hostel, DepartmentStatus::Rejected);
    let student = store.fetch_student(&id).expect("fetch").expect("present");
    assert_eq!(overall_status_of(&student), OverallStatus::Pending);
}

#[test]
fn fifth_approval_issues_certificate_exactly_once() {
    let harness = build_harness();
    let id = seed_student(&harness.store, "U301");
    approve_all_but(&harness, &id, &[Department::Administration]);
    assert_eq!(harness.renderer.calls(), 0);

    let request = submit(&harness, &id, Department::Administration);
    let outcome = harness
        .service
        .decide_request(
            &staff(Department::Administration),
            &request,
            Decision::Approved,
            None,
        )
        .expect("final approval");

    assert_eq!(outcome.aggregate.overall, OverallStatus::Cleared);
    assert!(matches!(
        outcome.aggregate.certificate,
        CertificateOutcome::Issued { .. }
    ));
    assert_eq!(harness.renderer.calls(), 1);
    assert_eq!(harness.events.count("clearance_achieved"), 1);

    let artifact = harness
        .service
        .retry_certificate(&student(&id), &id)
        .expect("existing artifact returned");
    assert_eq!(artifact.reference, "certificates/U301.pdf");
    assert_eq!(harness.renderer.calls(), 1);
}

#[test]
fn concurrent_recomputations_render_once() {
    let store = Arc::new(InMemoryClearanceStore::default());
    let events = Arc::new(RecordingPublisher::default());
    let renderer = Arc::new(CountingRenderer::default());
    let aggregator = ClearanceAggregator::new(store.clone(), events.clone(), renderer.clone());
    let id = seed_student(&store, "U302");
    for department in Department::ALL {
        force_status(&store, &id, department, DepartmentStatus::Approved);
    }

    let outcomes: Vec<CertificateOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| aggregator.evaluate(&id).expect("evaluate")))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread").certificate)
            .collect()
    });

    let issued = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, CertificateOutcome::Issued { .. }))
        .count();
    assert_eq!(issued, 1);
    assert!(outcomes.iter().all(|outcome| matches!(
        outcome,
        CertificateOutcome::Issued { .. } | CertificateOutcome::AlreadyIssued
    )));
    assert_eq!(renderer.calls(), 1);
    assert_eq!(events.count("clearance_achieved"), 1);
}

#[test]
fn concurrent_final_approvals_across_departments_clear_once() {
    let harness = build_harness();
    let id = seed_student(&harness.store, "U303");
    let requests: Vec<_> = Department::ALL
        .into_iter()
        .map(|department| (department, submit(&harness, &id, department)))
        .collect();

    std::thread::scope(|scope| {
        for (department, request) in &requests {
            let service = harness.service.clone();
            scope.spawn(move || {
                service
                    .decide_request(&staff(*department), request, Decision::Approved, None)
                    .expect("approve");
            });
        }
    });

    let record = harness.store.fetch_student(&id).expect("fetch").expect("present");
    assert!(Department::ALL
        .iter()
        .all(|department| record.status_of(*department) == DepartmentStatus::Approved));
    assert!(record.certificate_issued());
    assert_eq!(harness.renderer.calls(), 1);
}

#[test]
fn render_failure_keeps_clearance_and_allows_retry() {
    let harness = build_harness_with(CountingRenderer::failing(1));
    let id = seed_student(&harness.store, "U304");
    approve_all_but(&harness, &id, &[Department::Finance]);

    let request = submit(&harness, &id, Department::Finance);
    let outcome = harness
        .service
        .decide_request(&staff(Department::Finance), &request, Decision::Approved, None)
        .expect("decision stands even if rendering fails");
    assert_eq!(outcome.aggregate.overall, OverallStatus::Cleared);
    assert!(matches!(
        outcome.aggregate.certificate,
        CertificateOutcome::Failed { .. }
    ));
    let record = harness.store.fetch_student(&id).expect("fetch").expect("present");
    assert_eq!(record.certificate, CertificateState::NotIssued);
    assert_eq!(harness.events.count("clearance_achieved"), 0);

    let artifact = harness
        .service
        .retry_certificate(&admin(), &id)
        .expect("retry succeeds");
    assert_eq!(artifact.reference, "certificates/U304.pdf");
    assert_eq!(harness.renderer.calls(), 2);
    assert_eq!(harness.events.count("clearance_achieved"), 1);
}

#[test]
fn retry_reports_upstream_failure_and_requires_clearance() {
    let harness = build_harness_with(CountingRenderer::failing(2));
    let id = seed_student(&harness.store, "U305");

    assert!(matches!(
        harness.service.retry_certificate(&student(&id), &id),
        Err(ClearanceError::InvalidTransition(_))
    ));
    assert!(matches!(
        harness
            .service
            .retry_certificate(&staff(Department::Library), &id),
        Err(ClearanceError::Forbidden(_))
    ));

    approve_all_but(&harness, &id, &[]);
    assert_eq!(harness.renderer.calls(), 1);
    assert!(matches!(
        harness.service.retry_certificate(&student(&id), &id),
        Err(ClearanceError::UpstreamFailure(_))
    ));
    harness
        .service
        .retry_certificate(&student(&id), &id)
        .expect("third render succeeds");
    assert_eq!(harness.renderer.calls(), 3);
}

/// Student with `[{finance, 50, unresolved}]` and nothing elsewhere: four
/// approvals and a finance rejection leave them pending; approving finance
/// over the outstanding due clears them and issues once.
#[test]
fn finance_override_scenario() {
    let harness = build_harness();
    let id = seed_student(&harness.store, "U306");
    harness
        .service
        .add_obligation(
            &staff(Department::Finance),
            NewObligation {
                student_id: id.clone(),
                department: Department::Finance,
                kind: ObligationKind::Fee,
                description: "Library levy arrears".to_string(),
                amount: 50,
            },
        )
        .expect("obligation");

    approve_all_but(&harness, &id, &[Department::Finance]);
    let first = submit(&harness, &id, Department::Finance);
    harness
        .service
        .decide_request(
            &staff(Department::Finance),
            &first,
            Decision::Rejected,
            Some("settle the $50 due".to_string()),
        )
        .expect("reject");
    assert_eq!(
        harness.service.overall_status(&student(&id), &id).expect("overall"),
        OverallStatus::Pending
    );
    assert_eq!(harness.renderer.calls(), 0);

    let second = submit(&harness, &id, Department::Finance);
    let outcome = harness
        .service
        .decide_request(&staff(Department::Finance), &second, Decision::Approved, None)
        .expect("override approval");

    assert_eq!(outcome.aggregate.overall, OverallStatus::Cleared);
    assert_eq!(harness.renderer.calls(), 1);
    assert_eq!(harness.events.count("clearance_achieved"), 1);
    let view = harness
        .service
        .clearance_status(&student(&id), &id)
        .expect("status");
    assert!(view.certificate.is_some());
}

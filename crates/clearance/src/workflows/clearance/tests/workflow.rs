use super::common::*;
use crate::workflows::clearance::domain::{
    Decision, Department, DepartmentStatus, ObligationKind, OverallStatus, RequestStatus,
};
use crate::workflows::clearance::error::ClearanceError;
use crate::workflows::clearance::ledger::NewObligation;
use crate::workflows::clearance::repository::{ClearanceStore, RequestFilter};
use crate::workflows::clearance::service::ClearanceService;
use std::sync::Arc;

#[test]
fn duplicate_submit_returns_the_pending_request() {
    let harness = build_harness();
    let id = seed_student(&harness.store, "U200");

    let first = harness
        .service
        .submit_request(&student(&id), &id, Department::Library)
        .expect("first submit");
    let second = harness
        .service
        .submit_request(&student(&id), &id, Department::Library)
        .expect("second submit");

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.request.id, second.request.id);
    assert_eq!(first.request.status, RequestStatus::Pending);
    assert_eq!(harness.events.count("request_submitted"), 1);
}

#[test]
fn students_cannot_submit_for_someone_else() {
    let harness = build_harness();
    let ada = seed_student(&harness.store, "U201");
    let bo = seed_student(&harness.store, "U202");

    assert!(matches!(
        harness
            .service
            .submit_request(&student(&bo), &ada, Department::Hostel),
        Err(ClearanceError::Forbidden(_))
    ));
    assert!(matches!(
        harness
            .service
            .submit_request(&staff(Department::Hostel), &ada, Department::Hostel),
        Err(ClearanceError::Forbidden(_))
    ));
    let on_behalf = harness
        .service
        .submit_request(&admin(), &ada, Department::Hostel)
        .expect("admin submits on behalf");
    assert!(on_behalf.created);
}

#[test]
fn approval_updates_status_map_and_history() {
    let harness = build_harness();
    let id = seed_student(&harness.store, "U203");
    let request = submit(&harness, &id, Department::Hostel);
    let hostel = staff(Department::Hostel);

    let outcome = harness
        .service
        .decide_request(&hostel, &request, Decision::Approved, Some("room inspected".to_string()))
        .expect("approve");

    assert_eq!(outcome.request.status, RequestStatus::Approved);
    assert_eq!(outcome.request.decided_by.as_deref(), Some(hostel.id.as_str()));
    assert_eq!(outcome.aggregate.overall, OverallStatus::Pending);

    let record = harness.service.fetch_student(&admin(), &id).expect("student");
    assert_eq!(record.status_of(Department::Hostel), DepartmentStatus::Approved);
    let entry = record.history.last().expect("history entry");
    assert_eq!(entry.department, Department::Hostel);
    assert_eq!(entry.status, DepartmentStatus::Approved);
    assert_eq!(entry.comment.as_deref(), Some("room inspected"));
    assert_eq!(entry.actor.as_deref(), Some(hostel.id.as_str()));
    assert_eq!(harness.events.count("request_decided"), 1);
}

#[test]
fn deciding_twice_is_an_invalid_transition_and_changes_nothing() {
    let harness = build_harness();
    let id = seed_student(&harness.store, "U204");
    let request = submit(&harness, &id, Department::Library);
    let library = staff(Department::Library);

    harness
        .service
        .decide_request(&library, &request, Decision::Rejected, Some("lost atlas".to_string()))
        .expect("first decision");
    let before = harness.service.fetch_student(&admin(), &id).expect("student");

    let second = harness
        .service
        .decide_request(&library, &request, Decision::Approved, None);
    assert!(matches!(second, Err(ClearanceError::InvalidTransition(_))));

    let after = harness.service.fetch_student(&admin(), &id).expect("student");
    assert_eq!(before.departments, after.departments);
    assert_eq!(before.history, after.history);
    let stored = harness
        .service
        .fetch_request(&admin(), &request)
        .expect("request");
    assert_eq!(stored.status, RequestStatus::Rejected);
    assert_eq!(stored.comment.as_deref(), Some("lost atlas"));
}

#[test]
fn staff_of_another_department_are_forbidden_but_admin_is_not() {
    let harness = build_harness();
    let id = seed_student(&harness.store, "U205");
    let request = submit(&harness, &id, Department::Finance);

    let denied = harness
        .service
        .decide_request(&staff(Department::Library), &request, Decision::Approved, None);
    assert!(matches!(denied, Err(ClearanceError::Forbidden(_))));
    let by_student = harness
        .service
        .decide_request(&student(&id), &request, Decision::Approved, None);
    assert!(matches!(by_student, Err(ClearanceError::Forbidden(_))));

    let untouched = harness.service.fetch_student(&admin(), &id).expect("student");
    assert_eq!(untouched.status_of(Department::Finance), DepartmentStatus::Pending);

    harness
        .service
        .decide_request(&admin(), &request, Decision::Approved, None)
        .expect("admin decides any department");
}

#[test]
fn unknown_request_is_not_found() {
    let harness = build_harness();
    let missing = crate::workflows::clearance::domain::RequestId("req-missing".to_string());
    assert!(matches!(
        harness
            .service
            .decide_request(&admin(), &missing, Decision::Approved, None),
        Err(ClearanceError::NotFound { entity: "request", .. })
    ));
}

#[test]
fn resubmitting_after_rejection_resets_department_to_pending() {
    let harness = build_harness();
    let id = seed_student(&harness.store, "U206");
    let library = staff(Department::Library);
    let request = submit(&harness, &id, Department::Library);
    harness
        .service
        .decide_request(&library, &request, Decision::Rejected, None)
        .expect("reject");

    let resubmitted = harness
        .service
        .submit_request(&student(&id), &id, Department::Library)
        .expect("resubmit");
    assert!(resubmitted.created);
    assert_ne!(resubmitted.request.id, request);

    let record = harness.service.fetch_student(&admin(), &id).expect("student");
    assert_eq!(record.status_of(Department::Library), DepartmentStatus::Pending);
    let entry = record.history.last().expect("history");
    assert_eq!(entry.comment.as_deref(), Some("request resubmitted"));
}

#[test]
fn approved_department_rejects_new_requests() {
    let harness = build_harness();
    let id = seed_student(&harness.store, "U207");
    let request = submit(&harness, &id, Department::Academic);
    harness
        .service
        .decide_request(&staff(Department::Academic), &request, Decision::Approved, None)
        .expect("approve");

    assert!(matches!(
        harness
            .service
            .submit_request(&student(&id), &id, Department::Academic),
        Err(ClearanceError::InvalidTransition(_))
    ));
}

#[test]
fn approval_overrides_outstanding_obligation_while_gate_stays_advisory() {
    let harness = build_harness();
    let id = seed_student(&harness.store, "U208");
    harness
        .service
        .add_obligation(
            &staff(Department::Finance),
            NewObligation {
                student_id: id.clone(),
                department: Department::Finance,
                kind: ObligationKind::Fee,
                description: "Unpaid tuition".to_string(),
                amount: 5000,
            },
        )
        .expect("obligation");

    let gate = harness
        .service
        .eligibility(&student(&id), &id)
        .expect("eligibility");
    let finance = gate
        .iter()
        .find(|assessment| assessment.department == Department::Finance)
        .expect("finance assessment");
    assert!(!finance.can_request);
    assert_eq!(finance.outstanding_amount, 5000);
    assert!(gate
        .iter()
        .filter(|assessment| assessment.department != Department::Finance)
        .all(|assessment| assessment.can_request));

    let request = submit(&harness, &id, Department::Finance);
    harness
        .service
        .decide_request(&staff(Department::Finance), &request, Decision::Approved, None)
        .expect("staff override accepted");

    let status = harness
        .service
        .clearance_status(&student(&id), &id)
        .expect("status view");
    let finance = status
        .departments
        .iter()
        .find(|assessment| assessment.department == Department::Finance)
        .expect("finance");
    assert_eq!(finance.status, DepartmentStatus::Approved);
    assert_eq!(finance.blocking.len(), 1);
}

#[test]
fn request_listing_is_scoped_to_the_caller() {
    let harness = build_harness();
    let ada = seed_student(&harness.store, "U209");
    let bo = seed_student(&harness.store, "U210");
    submit(&harness, &ada, Department::Hostel);
    submit(&harness, &ada, Department::Library);
    submit(&harness, &bo, Department::Hostel);

    let hostel_queue = harness
        .service
        .list_requests(&staff(Department::Hostel), RequestFilter::default())
        .expect("hostel queue");
    assert_eq!(hostel_queue.len(), 2);
    assert!(hostel_queue
        .iter()
        .all(|request| request.department == Department::Hostel));

    let own = harness
        .service
        .list_requests(&student(&ada), RequestFilter::default())
        .expect("own requests");
    assert_eq!(own.len(), 2);
    assert!(own.iter().all(|request| request.student_id == ada));

    let peeking = RequestFilter {
        student_id: Some(bo.clone()),
        ..RequestFilter::default()
    };
    assert!(matches!(
        harness.service.list_requests(&student(&ada), peeking),
        Err(ClearanceError::Forbidden(_))
    ));

    let foreign = RequestFilter {
        department: Some(Department::Library),
        ..RequestFilter::default()
    };
    assert!(matches!(
        harness
            .service
            .list_requests(&staff(Department::Hostel), foreign),
        Err(ClearanceError::Forbidden(_))
    ));

    let pending = RequestFilter {
        status: Some(RequestStatus::Pending),
        ..RequestFilter::default()
    };
    assert_eq!(
        harness
            .service
            .list_requests(&admin(), pending)
            .expect("admin")
            .len(),
        3
    );
}

#[test]
fn dropped_events_do_not_fail_transitions() {
    let store = Arc::new(crate::workflows::clearance::memory::InMemoryClearanceStore::default());
    let service = ClearanceService::new(
        store.clone(),
        Arc::new(ClosedPublisher),
        Arc::new(CountingRenderer::default()),
        authenticator(),
    );
    let id = seed_student(&store, "U211");

    let outcome = service
        .submit_request(&student(&id), &id, Department::Hostel)
        .expect("submit despite closed queue");
    service
        .decide_request(
            &staff(Department::Hostel),
            &outcome.request.id,
            Decision::Approved,
            None,
        )
        .expect("decide despite closed queue");

    let record = store.fetch_student(&id).expect("fetch").expect("present");
    assert_eq!(record.status_of(Department::Hostel), DepartmentStatus::Approved);
}

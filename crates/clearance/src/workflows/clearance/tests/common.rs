use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::{header, Request};
use axum::response::Response;
use chrono::Utc;
use serde_json::Value;

use crate::auth::{Authenticator, Principal};
use crate::config::AuthConfig;
use crate::workflows::clearance::certificate::{CertificateError, CertificateRenderer};
use crate::workflows::clearance::domain::{
    CertificateArtifact, Decision, Department, RequestId, Student, StudentId,
};
use crate::workflows::clearance::events::{DomainEvent, EventPublisher, PublishError};
use crate::workflows::clearance::memory::InMemoryClearanceStore;
use crate::workflows::clearance::repository::ClearanceStore;
use crate::workflows::clearance::service::ClearanceService;

pub(super) type TestService =
    ClearanceService<InMemoryClearanceStore, RecordingPublisher, CountingRenderer>;

pub(super) const PASSWORD: &str = "correct horse battery";

#[derive(Default, Clone)]
pub(super) struct RecordingPublisher {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl RecordingPublisher {
    pub(super) fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().expect("publisher mutex poisoned").clone()
    }

    pub(super) fn count(&self, name: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: DomainEvent) -> Result<(), PublishError> {
        self.events
            .lock()
            .expect("publisher mutex poisoned")
            .push(event);
        Ok(())
    }
}

pub(super) struct ClosedPublisher;

impl EventPublisher for ClosedPublisher {
    fn publish(&self, _event: DomainEvent) -> Result<(), PublishError> {
        Err(PublishError::QueueClosed)
    }
}

/// Counts render calls; fails the first `failures` of them.
#[derive(Default)]
pub(super) struct CountingRenderer {
    calls: AtomicUsize,
    failures: usize,
}

impl CountingRenderer {
    pub(super) fn failing(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures,
        }
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CertificateRenderer for CountingRenderer {
    fn render(&self, student: &Student) -> Result<CertificateArtifact, CertificateError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(CertificateError::Unavailable("renderer offline".to_string()));
        }
        // Widen the window in which a second evaluation could slip in.
        std::thread::sleep(std::time::Duration::from_millis(5));
        Ok(CertificateArtifact {
            reference: format!("certificates/{}.pdf", student.id),
            issued_at: Utc::now(),
        })
    }
}

pub(super) struct Harness {
    pub(super) service: Arc<TestService>,
    pub(super) store: Arc<InMemoryClearanceStore>,
    pub(super) events: Arc<RecordingPublisher>,
    pub(super) renderer: Arc<CountingRenderer>,
}

pub(super) fn authenticator() -> Authenticator {
    Authenticator::new(&AuthConfig::for_tests()).expect("test auth config is valid")
}

pub(super) fn build_harness() -> Harness {
    build_harness_with(CountingRenderer::default())
}

pub(super) fn build_harness_with(renderer: CountingRenderer) -> Harness {
    let store = Arc::new(InMemoryClearanceStore::default());
    let events = Arc::new(RecordingPublisher::default());
    let renderer = Arc::new(renderer);
    let service = Arc::new(ClearanceService::new(
        store.clone(),
        events.clone(),
        renderer.clone(),
        authenticator(),
    ));
    Harness {
        service,
        store,
        events,
        renderer,
    }
}

/// Inserts a student straight into the store, without a usable credential.
pub(super) fn seed_student(store: &InMemoryClearanceStore, id: &str) -> StudentId {
    let student = Student::new(
        StudentId(id.to_string()),
        format!("Student {id}"),
        format!("{}@uni.test", id.to_ascii_lowercase()),
        String::new(),
    );
    store.insert_student(student).expect("seed student").id
}

pub(super) fn admin() -> Principal {
    Principal::admin("stf-admin")
}

pub(super) fn staff(department: Department) -> Principal {
    Principal::staff(format!("stf-{department}"), department)
}

pub(super) fn student(id: &StudentId) -> Principal {
    Principal::student(id.0.clone())
}

pub(super) fn submit(harness: &Harness, id: &StudentId, department: Department) -> RequestId {
    harness
        .service
        .submit_request(&student(id), id, department)
        .expect("submit request")
        .request
        .id
}

/// Submits and approves every department except those in `skip`.
pub(super) fn approve_all_but(harness: &Harness, id: &StudentId, skip: &[Department]) {
    for department in Department::ALL {
        if skip.contains(&department) {
            continue;
        }
        let request = submit(harness, id, department);
        harness
            .service
            .decide_request(&staff(department), &request, Decision::Approved, None)
            .expect("approve request");
    }
}

pub(super) fn bearer(principal: &Principal) -> String {
    let token = authenticator()
        .tokens()
        .issue(principal)
        .expect("issue token");
    format!("Bearer {token}")
}

pub(super) fn json_request(
    method: &str,
    uri: &str,
    auth: Option<&Principal>,
    body: Value,
) -> Request<axum::body::Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(principal) = auth {
        builder = builder.header(header::AUTHORIZATION, bearer(principal));
    }
    builder
        .body(axum::body::Body::from(
            serde_json::to_vec(&body).expect("serialize body"),
        ))
        .expect("build request")
}

pub(super) fn get_request(uri: &str, auth: Option<&Principal>) -> Request<axum::body::Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(principal) = auth {
        builder = builder.header(header::AUTHORIZATION, bearer(principal));
    }
    builder
        .body(axum::body::Body::empty())
        .expect("build request")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

use std::io::Cursor;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::accounts::{NewStaff, NewStudent};
use super::certificate::CertificateRenderer;
use super::domain::{Decision, Department, NotificationId, ObligationId, ReportId, RequestId, StudentId};
use super::error::ClearanceError;
use super::events::EventPublisher;
use super::ledger::NewObligation;
use super::repository::{ClearanceStore, RequestFilter, StaffFilter};
use super::service::ClearanceService;
use crate::auth::Principal;

type SharedService<S, P, C> = State<Arc<ClearanceService<S, P, C>>>;

/// Router exposing the clearance workflow under `/api/v1/clearance`.
/// Every route except login expects `Authorization: Bearer <token>`.
pub fn clearance_router<S, P, C>(service: Arc<ClearanceService<S, P, C>>) -> Router
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    Router::new()
        .route("/api/v1/clearance/auth/login", post(login_handler::<S, P, C>))
        .route(
            "/api/v1/clearance/auth/credential",
            put(credential_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/students",
            post(register_student_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/students/:student_id",
            get(status_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/students/:student_id/eligibility",
            get(eligibility_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/students/:student_id/obligations",
            get(list_obligations_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/students/:student_id/certificate",
            post(retry_certificate_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/students/:student_id/verification",
            get(verify_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/staff",
            post(register_staff_handler::<S, P, C>).get(list_staff_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/obligations",
            post(add_obligation_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/obligations/import",
            post(import_obligations_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/obligations/:obligation_id/resolve",
            post(resolve_obligation_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/requests",
            post(submit_handler::<S, P, C>).get(list_requests_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/requests/:request_id",
            get(fetch_request_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/requests/:request_id/decision",
            post(decide_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/reports",
            post(file_report_handler::<S, P, C>).get(report_queue_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/reports/:report_id/resolve",
            post(resolve_report_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/notifications",
            get(notifications_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/notifications/read",
            post(mark_all_read_handler::<S, P, C>),
        )
        .route(
            "/api/v1/clearance/notifications/:notification_id/read",
            post(mark_read_handler::<S, P, C>),
        )
        .with_state(service)
}

impl ClearanceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ClearanceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ClearanceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ClearanceError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ClearanceError::InvalidArgument(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ClearanceError::InvalidTransition(_) | ClearanceError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            ClearanceError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            ClearanceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ClearanceError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.to_string() });
        (self.status_code(), Json(payload)).into_response()
    }
}

fn principal<S, P, C>(
    service: &ClearanceService<S, P, C>,
    headers: &HeaderMap,
) -> Result<Principal, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ClearanceError::Unauthenticated("missing bearer token".to_string()))?;
    service.authenticate(token)
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginPayload {
    #[serde(alias = "email")]
    identifier: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CredentialPayload {
    current_password: String,
    new_password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitPayload {
    #[serde(default)]
    student_id: Option<StudentId>,
    department: Department,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionPayload {
    decision: Decision,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReportPayload {
    department: Department,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DepartmentQuery {
    #[serde(default)]
    department: Option<Department>,
}

pub(crate) async fn login_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    Json(payload): Json<LoginPayload>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let session = service.login(&payload.identifier, &payload.password)?;
    Ok((StatusCode::OK, Json(session)).into_response())
}

pub(crate) async fn credential_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Json(payload): Json<CredentialPayload>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    service.update_credential(&principal, &payload.current_password, &payload.new_password)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(crate) async fn register_student_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Json(payload): Json<NewStudent>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let student = service.register_student(&principal, payload)?;
    Ok((StatusCode::CREATED, Json(student)).into_response())
}

pub(crate) async fn status_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let view = service.clearance_status(&principal, &StudentId(student_id))?;
    Ok((StatusCode::OK, Json(view)).into_response())
}

pub(crate) async fn eligibility_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let assessments = service.eligibility(&principal, &StudentId(student_id))?;
    Ok((StatusCode::OK, Json(assessments)).into_response())
}

pub(crate) async fn list_obligations_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
    Query(query): Query<DepartmentQuery>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let obligations =
        service.list_obligations(&principal, &StudentId(student_id), query.department)?;
    Ok((StatusCode::OK, Json(obligations)).into_response())
}

pub(crate) async fn retry_certificate_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let artifact = service.retry_certificate(&principal, &StudentId(student_id))?;
    Ok((StatusCode::OK, Json(artifact)).into_response())
}

pub(crate) async fn verify_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let view = service.verify(&principal, &StudentId(student_id))?;
    Ok((StatusCode::OK, Json(view)).into_response())
}

pub(crate) async fn register_staff_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Json(payload): Json<NewStaff>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let staff = service.register_staff(&principal, payload)?;
    Ok((StatusCode::CREATED, Json(staff)).into_response())
}

pub(crate) async fn list_staff_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Query(filter): Query<StaffFilter>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let staff = service.list_staff(&principal, &filter)?;
    Ok((StatusCode::OK, Json(staff)).into_response())
}

pub(crate) async fn add_obligation_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Json(payload): Json<NewObligation>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let obligation = service.add_obligation(&principal, payload)?;
    Ok((StatusCode::CREATED, Json(obligation)).into_response())
}

/// Accepts the raw CSV export as the request body.
pub(crate) async fn import_obligations_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let summary = service.import_obligations(&principal, Cursor::new(body))?;
    Ok((StatusCode::OK, Json(summary)).into_response())
}

pub(crate) async fn resolve_obligation_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Path(obligation_id): Path<String>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let obligation = service.resolve_obligation(&principal, &ObligationId(obligation_id))?;
    Ok((StatusCode::OK, Json(obligation)).into_response())
}

/// `201` for a new request, `200` when the pending one is returned again.
pub(crate) async fn submit_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Json(payload): Json<SubmitPayload>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let student_id = payload
        .student_id
        .unwrap_or_else(|| StudentId(principal.id.clone()));
    let outcome = service.submit_request(&principal, &student_id, payload.department)?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)).into_response())
}

pub(crate) async fn list_requests_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Query(filter): Query<RequestFilter>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let requests = service.list_requests(&principal, filter)?;
    Ok((StatusCode::OK, Json(requests)).into_response())
}

pub(crate) async fn fetch_request_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let request = service.fetch_request(&principal, &RequestId(request_id))?;
    Ok((StatusCode::OK, Json(request)).into_response())
}

pub(crate) async fn decide_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    Json(payload): Json<DecisionPayload>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let outcome = service.decide_request(
        &principal,
        &RequestId(request_id),
        payload.decision,
        payload.comment,
    )?;
    Ok((StatusCode::OK, Json(outcome)).into_response())
}

pub(crate) async fn file_report_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Json(payload): Json<ReportPayload>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let report = service.file_report(&principal, payload.department, &payload.message)?;
    Ok((StatusCode::CREATED, Json(report)).into_response())
}

pub(crate) async fn report_queue_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Query(query): Query<DepartmentQuery>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let reports = service.report_queue(&principal, query.department)?;
    Ok((StatusCode::OK, Json(reports)).into_response())
}

pub(crate) async fn resolve_report_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Path(report_id): Path<String>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let report = service.resolve_report(&principal, &ReportId(report_id))?;
    Ok((StatusCode::OK, Json(report)).into_response())
}

pub(crate) async fn notifications_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let notifications = service.notifications(&principal)?;
    Ok((StatusCode::OK, Json(notifications)).into_response())
}

pub(crate) async fn mark_read_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
    Path(notification_id): Path<String>,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let notification =
        service.mark_notification_read(&principal, &NotificationId(notification_id))?;
    Ok((StatusCode::OK, Json(notification)).into_response())
}

pub(crate) async fn mark_all_read_handler<S, P, C>(
    State(service): SharedService<S, P, C>,
    headers: HeaderMap,
) -> Result<Response, ClearanceError>
where
    S: ClearanceStore + 'static,
    P: EventPublisher + 'static,
    C: CertificateRenderer + 'static,
{
    let principal = principal(&service, &headers)?;
    let marked = service.mark_all_read(&principal)?;
    Ok((StatusCode::OK, Json(json!({ "marked": marked }))).into_response())
}

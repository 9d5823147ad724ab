use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::discounts::DiscountGrant;
use super::domain::{
    Amount, ClassOfferingId, DiscountTypeId, DiscountValue, GradeLevel, PaymentId, SchoolYear,
    StudentDiscountId, StudentId, UserId,
};
use super::enrollment::{Finalization, OnlinePreregistration, OnsiteRegistration, Reinscription};
use super::error::LedgerError;
use super::payments::PaymentRequest;
use super::repository::{GradeSource, GradeSourceError, LedgerRepository, RepositoryError};
use super::service::SchoolLedgerService;
use super::tuition::ClassOfferingDraft;

type SharedService<R, G> = Arc<SchoolLedgerService<R, G>>;

#[derive(Debug, Deserialize)]
pub struct TuitionUpdate {
    pub amount: Amount,
}

#[derive(Debug, Serialize)]
struct TuitionView {
    level: GradeLevel,
    school_year: SchoolYear,
    amount: Option<Amount>,
}

#[derive(Debug, Deserialize)]
pub struct DiscountTypeRequest {
    pub name: String,
    #[serde(default)]
    pub rule: Option<DiscountValue>,
}

#[derive(Debug, Deserialize)]
pub struct ActivationUpdate {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub approved_by: UserId,
}

#[derive(Debug, Deserialize)]
pub struct ClassAssignment {
    pub class_offering_id: ClassOfferingId,
}

/// Router builder exposing the ledger under `/api/v1/ledger`.
pub fn ledger_router<R, G>(service: SharedService<R, G>) -> Router
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    Router::new()
        .route("/api/v1/ledger/active-year", get(active_year_handler::<R, G>))
        .route(
            "/api/v1/ledger/tuition/:level/:school_year",
            get(get_tuition_handler::<R, G>).put(set_tuition_handler::<R, G>),
        )
        .route("/api/v1/ledger/classes", post(save_class_handler::<R, G>))
        .route(
            "/api/v1/ledger/years/:school_year/classes",
            get(list_classes_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/years/:school_year/discounts/by-type",
            get(grouped_discounts_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/years/:school_year/statistics",
            get(year_statistics_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/discount-types",
            get(list_discount_types_handler::<R, G>)
                .post(resolve_discount_type_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/discount-types/:discount_type_id/active",
            put(toggle_discount_type_handler::<R, G>),
        )
        .route("/api/v1/ledger/discounts", post(grant_discount_handler::<R, G>))
        .route(
            "/api/v1/ledger/discounts/:discount_id/approve",
            post(approve_discount_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/discounts/:discount_id/deactivate",
            post(deactivate_discount_handler::<R, G>),
        )
        .route("/api/v1/ledger/payments", post(record_payment_handler::<R, G>))
        .route(
            "/api/v1/ledger/payments/:payment_id/receipt",
            get(receipt_handler::<R, G>),
        )
        .route("/api/v1/ledger/students", get(list_students_handler::<R, G>))
        .route(
            "/api/v1/ledger/students/online",
            post(preregister_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/students/onsite",
            post(register_onsite_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/students/:student_id",
            get(student_handler::<R, G>).delete(delete_student_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/students/:student_id/state",
            get(state_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/students/:student_id/statement",
            get(statement_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/students/:student_id/arrears",
            get(arrears_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/students/:student_id/finalize",
            post(finalize_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/students/:student_id/reinscribe",
            post(reinscribe_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/students/:student_id/years/:school_year/balance",
            get(balance_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/students/:student_id/years/:school_year/payments",
            get(payment_history_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/students/:student_id/years/:school_year/discounts",
            get(student_discounts_handler::<R, G>),
        )
        .route(
            "/api/v1/ledger/students/:student_id/years/:school_year/class",
            put(reassign_class_handler::<R, G>),
        )
        .with_state(service)
}

/// HTTP status for a ledger failure.
pub fn status_for(error: &LedgerError) -> StatusCode {
    match error {
        LedgerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::Conflict { .. }
        | LedgerError::InvalidState(_)
        | LedgerError::Repository(RepositoryError::Conflict(_)) => StatusCode::CONFLICT,
        LedgerError::BlockedByArrears { .. } => StatusCode::PAYMENT_REQUIRED,
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::Repository(RepositoryError::Unavailable(_))
        | LedgerError::Grades(GradeSourceError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        LedgerError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(error: LedgerError) -> Response {
    let status = status_for(&error);
    let payload = match &error {
        LedgerError::BlockedByArrears {
            school_year,
            reliquat,
            supplied,
        } => json!({
            "error": error.kind(),
            "message": error.to_string(),
            "school_year": school_year,
            "reliquat": reliquat,
            "supplied": supplied,
        }),
        LedgerError::Conflict {
            existing,
            attempted,
            ..
        } => json!({
            "error": error.kind(),
            "message": error.to_string(),
            "existing": existing,
            "attempted": attempted,
        }),
        _ => json!({
            "error": error.kind(),
            "message": error.to_string(),
        }),
    };
    (status, Json(payload)).into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, LedgerError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn active_year_handler<R, G>(
    State(service): State<SharedService<R, G>>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    let payload = json!({
        "school_year": service.active_year(),
        "cutover_month": service.config().cutover_month,
    });
    (StatusCode::OK, Json(payload)).into_response()
}

pub(crate) async fn get_tuition_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path((level, school_year)): Path<(String, SchoolYear)>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    let level = GradeLevel(level);
    let result = service
        .get_tuition(&level, school_year)
        .map(|amount| TuitionView {
            level,
            school_year,
            amount,
        });
    respond(StatusCode::OK, result)
}

pub(crate) async fn set_tuition_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path((level, school_year)): Path<(String, SchoolYear)>,
    Json(update): Json<TuitionUpdate>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    let level = GradeLevel(level);
    let result = service
        .set_tuition(&level, school_year, update.amount)
        .map(|()| TuitionView {
            level,
            school_year,
            amount: Some(update.amount),
        });
    respond(StatusCode::OK, result)
}

pub(crate) async fn save_class_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Json(draft): Json<ClassOfferingDraft>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    let status = if draft.id.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    respond(status, service.create_or_update_class_offering(draft))
}

pub(crate) async fn list_classes_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(school_year): Path<SchoolYear>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(StatusCode::OK, service.class_offerings(school_year))
}

pub(crate) async fn grouped_discounts_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(school_year): Path<SchoolYear>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(StatusCode::OK, service.grouped_discounts_by_type(school_year))
}

pub(crate) async fn year_statistics_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(school_year): Path<SchoolYear>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(StatusCode::OK, service.year_statistics(school_year))
}

pub(crate) async fn list_discount_types_handler<R, G>(
    State(service): State<SharedService<R, G>>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(StatusCode::OK, service.discount_types())
}

pub(crate) async fn resolve_discount_type_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Json(request): Json<DiscountTypeRequest>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    let result = service
        .resolve_or_create_discount_type(&request.name, request.rule)
        .map(|id| json!({ "discount_type_id": id }));
    respond(StatusCode::OK, result)
}

pub(crate) async fn toggle_discount_type_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(discount_type_id): Path<String>,
    Json(update): Json<ActivationUpdate>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    let id = DiscountTypeId(discount_type_id);
    respond(
        StatusCode::OK,
        service.set_discount_type_active(&id, update.active),
    )
}

pub(crate) async fn grant_discount_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Json(grant): Json<DiscountGrant>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(StatusCode::CREATED, service.grant_discount(grant))
}

pub(crate) async fn approve_discount_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(discount_id): Path<String>,
    Json(approval): Json<ApprovalRequest>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    let id = StudentDiscountId(discount_id);
    respond(
        StatusCode::OK,
        service.approve_discount(&id, &approval.approved_by),
    )
}

pub(crate) async fn deactivate_discount_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(discount_id): Path<String>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    let id = StudentDiscountId(discount_id);
    respond(StatusCode::OK, service.deactivate_discount(&id))
}

pub(crate) async fn record_payment_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Json(request): Json<PaymentRequest>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(StatusCode::CREATED, service.record_payment(request))
}

pub(crate) async fn receipt_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(payment_id): Path<String>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    let id = PaymentId(payment_id);
    respond(StatusCode::OK, service.payment_receipt(&id))
}

pub(crate) async fn list_students_handler<R, G>(
    State(service): State<SharedService<R, G>>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(StatusCode::OK, service.students())
}

pub(crate) async fn preregister_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Json(request): Json<OnlinePreregistration>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(StatusCode::CREATED, service.preregister_online(request))
}

pub(crate) async fn register_onsite_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Json(request): Json<OnsiteRegistration>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(StatusCode::CREATED, service.register_onsite(request))
}

pub(crate) async fn student_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(student_id): Path<String>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(StatusCode::OK, service.student(&StudentId(student_id)))
}

pub(crate) async fn delete_student_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(student_id): Path<String>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    match service.delete_student(&StudentId(student_id)) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn state_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(student_id): Path<String>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    let id = StudentId(student_id);
    let result = service.state_of(&id).and_then(|state| {
        let current = service.current_enrollment(&id)?;
        Ok(json!({
            "student_id": id,
            "state": state,
            "state_label": state.label(),
            "active_year": service.active_year(),
            "current_enrollment": current,
        }))
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn statement_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(student_id): Path<String>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(
        StatusCode::OK,
        service.student_statement(&StudentId(student_id)),
    )
}

pub(crate) async fn arrears_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(student_id): Path<String>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(StatusCode::OK, service.arrears_of(&StudentId(student_id)))
}

pub(crate) async fn finalize_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(student_id): Path<String>,
    Json(request): Json<Finalization>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(
        StatusCode::OK,
        service.finalize(&StudentId(student_id), request),
    )
}

pub(crate) async fn reinscribe_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path(student_id): Path<String>,
    Json(request): Json<Reinscription>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(
        StatusCode::CREATED,
        service.reinscribe(&StudentId(student_id), request),
    )
}

pub(crate) async fn balance_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path((student_id, school_year)): Path<(String, SchoolYear)>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(
        StatusCode::OK,
        service.balance_of(&StudentId(student_id), school_year),
    )
}

pub(crate) async fn payment_history_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path((student_id, school_year)): Path<(String, SchoolYear)>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(
        StatusCode::OK,
        service.payment_history(&StudentId(student_id), school_year),
    )
}

pub(crate) async fn student_discounts_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path((student_id, school_year)): Path<(String, SchoolYear)>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(
        StatusCode::OK,
        service.discounts_of(&StudentId(student_id), school_year),
    )
}

pub(crate) async fn reassign_class_handler<R, G>(
    State(service): State<SharedService<R, G>>,
    Path((student_id, school_year)): Path<(String, SchoolYear)>,
    Json(assignment): Json<ClassAssignment>,
) -> Response
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    respond(
        StatusCode::OK,
        service.reassign_class(
            &StudentId(student_id),
            school_year,
            &assignment.class_offering_id,
        ),
    )
}

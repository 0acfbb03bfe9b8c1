//! # API REST
//!
//! REST API implementation for OMR.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - bearer-token caller resolution
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status mapping)
//!
//! Uses `api-shared` for wire types and the bearer helper; all business
//! rules live in `omr-core`. The status mapping is deliberately coarse:
//! validation failures are 400, missing entities 404, and everything else
//! (authorization, state-machine violations, conflicts, backend failures)
//! shares the generic 500 with a `{"msg"}` envelope.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use utoipa::{IntoParams, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use api_shared::auth::bearer_token;
use api_shared::dto;
use api_shared::HealthService;
use omr_core::{AuditFilters, Caller, DataFilters, OmrError};

pub use omr_core::OmrService;

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub omr: OmrService,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        create_org,
        update_org,
        get_org,
        list_orgs,
        services_for_org,
        create_user,
        get_user,
        grant_permission,
        revoke_permission,
        create_datatype,
        update_datatype,
        get_datatype,
        list_datatypes,
        register_service,
        add_service_datatype,
        remove_service_datatype,
        get_service,
        enroll_user,
        put_consent,
        consents_for_service_user,
        consent_for_service_user_datatype,
        consents_for_user,
        requests_for_user,
        validate_consent,
        upload_user_data,
        download_user_data,
        upload_owner_data,
        download_owner_data,
        create_contract,
        change_contract_terms,
        sign_contract,
        pay_contract,
        verify_contract_payment,
        grant_download_permission,
        terminate_contract,
        get_contract,
        contracts_by_owner,
        contracts_by_requester,
        download_as_requester,
        history,
    ),
    components(schemas(
        api_shared::HealthRes,
        dto::ErrorRes,
        dto::OrgReq,
        dto::OrgRes,
        dto::UserReq,
        dto::UserRes,
        dto::SolutionInfo,
        dto::PermissionReq,
        dto::DatatypeReq,
        dto::DatatypeRes,
        dto::ServiceReq,
        dto::ServiceRes,
        dto::ServiceDatatypeReq,
        dto::ServiceDatatypeRes,
        dto::AddDatatypeReq,
        dto::EnrollUserReq,
        dto::ConsentReq,
        dto::ConsentRes,
        dto::RequestRes,
        dto::ValidateConsentRes,
        dto::UploadDataReq,
        dto::DataRecordRes,
        dto::ContractReq,
        dto::ContractRes,
        dto::TermsReq,
        dto::SignReq,
        dto::GrantPermissionReq,
        dto::TerminateReq,
        dto::RequesterDownloadReq,
        dto::AuditEntryRes,
    ))
)]
struct ApiDoc;

/// Builds the full application router, nested under `/omr/api/v1`, with
/// Swagger UI and permissive CORS.
pub fn router(omr: OmrService) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/organizations", post(create_org).get(list_orgs))
        .route("/organizations/:id", put(update_org).get(get_org))
        .route("/organizations/:id/services", get(services_for_org))
        .route("/users", post(create_user))
        .route("/users/:id", get(get_user))
        .route(
            "/users/:id/permissions",
            post(grant_permission).delete(revoke_permission),
        )
        .route("/datatypes", post(create_datatype).get(list_datatypes))
        .route("/datatypes/:id", put(update_datatype).get(get_datatype))
        .route("/services", post(register_service))
        .route("/services/:id", get(get_service))
        .route("/services/:id/datatypes", post(add_service_datatype))
        .route(
            "/services/:id/datatypes/:datatype_id",
            delete(remove_service_datatype),
        )
        .route("/services/:id/users", post(enroll_user))
        .route("/consents", post(put_consent))
        .route("/consents/validate", get(validate_consent))
        .route(
            "/consents/service/:service_id/user/:user_id",
            get(consents_for_service_user),
        )
        .route(
            "/consents/service/:service_id/user/:user_id/datatype/:datatype_id",
            get(consent_for_service_user_datatype),
        )
        .route("/consents/user/:user_id", get(consents_for_user))
        .route("/consents/user/:user_id/requests", get(requests_for_user))
        .route(
            "/data/user/:service_id/:user_id/:datatype_id",
            post(upload_user_data).get(download_user_data),
        )
        .route(
            "/data/owner/:service_id/:datatype_id",
            post(upload_owner_data).get(download_owner_data),
        )
        .route("/contracts", post(create_contract))
        .route("/contracts/:id", get(get_contract))
        .route("/contracts/:id/terms", post(change_contract_terms))
        .route("/contracts/:id/sign", post(sign_contract))
        .route("/contracts/:id/payment", post(pay_contract))
        .route(
            "/contracts/:id/payment/verification",
            post(verify_contract_payment),
        )
        .route("/contracts/:id/permissions", post(grant_download_permission))
        .route("/contracts/:id/termination", post(terminate_contract))
        .route("/contracts/:id/download", post(download_as_requester))
        .route("/contracts/owner/:service_id", get(contracts_by_owner))
        .route(
            "/contracts/requester/:service_id",
            get(contracts_by_requester),
        )
        .route("/history", get(history));

    Router::new()
        .nest("/omr/api/v1", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(AppState { omr })
}

/// Core error carried to the HTTP layer.
pub struct ApiError(OmrError);

impl From<OmrError> for ApiError {
    fn from(err: OmrError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OmrError::Validation(_) => StatusCode::BAD_REQUEST,
            OmrError::NotFound(_) => StatusCode::NOT_FOUND,
            OmrError::Denied(_)
            | OmrError::InvalidState(_)
            | OmrError::Conflict(_)
            | OmrError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self.0);
        }
        (
            status,
            Json(dto::ErrorRes {
                msg: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Resolves the bearer token to a caller principal. Missing, malformed,
/// and unknown credentials all share the generic 500.
fn caller_from(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = bearer_token(header).map_err(|_| OmrError::denied("invalid credential"))?;
    Ok(state.omr.resolve_token(token)?)
}

/// Retrieval filters accepted by every data download route.
#[derive(Debug, Deserialize, IntoParams)]
struct DataQuery {
    latest_only: Option<bool>,
    max_num: Option<usize>,
    start_timestamp: Option<i64>,
    end_timestamp: Option<i64>,
}

impl From<DataQuery> for DataFilters {
    fn from(q: DataQuery) -> Self {
        DataFilters {
            latest_only: q.latest_only.unwrap_or(false),
            max_num: q.max_num,
            start_timestamp: q.start_timestamp,
            end_timestamp: q.end_timestamp,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
struct ValidateQuery {
    service_id: Option<String>,
    user_id: Option<String>,
    datatype_id: Option<String>,
    access: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
struct StatusQuery {
    status: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
struct HistoryQuery {
    patient_id: Option<String>,
    service_id: Option<String>,
    datatype_id: Option<String>,
    consent_owner_target_id: Option<String>,
    latest_only: Option<bool>,
    max_num: Option<usize>,
    start_timestamp: Option<i64>,
    end_timestamp: Option<i64>,
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value.map(|v| v.trim().to_owned()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(OmrError::missing(field).into()),
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/omr/api/v1/health",
    responses(
        (status = 200, description = "Health check response", body = api_shared::HealthRes)
    )
)]
/// Health check endpoint; unauthenticated, used by load balancers.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<api_shared::HealthRes> {
    Json(HealthService::check_health())
}

// ---------------------------------------------------------------------------
// Organizations
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/omr/api/v1/organizations",
    request_body = dto::OrgReq,
    responses(
        (status = 200, description = "Organization registered", body = dto::OrgRes),
        (status = 400, description = "Invalid data", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized or backend failure", body = dto::ErrorRes)
    )
)]
/// Registers an organization. Sys admin only; the org is enrolled with the
/// CA and recorded on the ledger before it becomes visible.
#[axum::debug_handler]
async fn create_org(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<dto::OrgReq>,
) -> Result<Json<dto::OrgRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.create_org(&caller, req)?))
}

#[utoipa::path(
    put,
    path = "/omr/api/v1/organizations/{id}",
    request_body = dto::OrgReq,
    responses(
        (status = 200, description = "Organization updated", body = dto::OrgRes),
        (status = 400, description = "Invalid data", body = dto::ErrorRes),
        (status = 404, description = "Organization not found", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn update_org(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<dto::OrgReq>,
) -> Result<Json<dto::OrgRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.update_org(&caller, &id, req)?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/organizations/{id}",
    responses(
        (status = 200, description = "Organization, blank if unknown; private fields redacted for outsiders", body = dto::OrgRes),
        (status = 500, description = "Invalid credential", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn get_org(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<dto::OrgRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.get_org(&caller, &id)?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/organizations",
    responses(
        (status = 200, description = "All organizations, role-redacted", body = [dto::OrgRes])
    )
)]
#[axum::debug_handler]
async fn list_orgs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<dto::OrgRes>>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.list_orgs(&caller)?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/organizations/{id}/services",
    responses(
        (status = 200, description = "Services owned by the organization", body = [dto::ServiceRes])
    )
)]
#[axum::debug_handler]
async fn services_for_org(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<dto::ServiceRes>>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.services_for_org(&caller, &id)?))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/omr/api/v1/users",
    request_body = dto::UserReq,
    responses(
        (status = 200, description = "User registered", body = dto::UserRes),
        (status = 400, description = "Invalid data", body = dto::ErrorRes),
        (status = 404, description = "Organization not found", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized", body = dto::ErrorRes)
    )
)]
/// Registers a user. The sys admin creates unaffiliated patients; an org
/// admin creates members of their own org.
#[axum::debug_handler]
async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<dto::UserReq>,
) -> Result<Json<dto::UserRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.create_user(&caller, req)?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/users/{id}",
    responses(
        (status = 200, description = "User with derived solution_info", body = dto::UserRes),
        (status = 404, description = "User not found", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn get_user(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<dto::UserRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.get_user(&caller, &id)?))
}

#[utoipa::path(
    post,
    path = "/omr/api/v1/users/{id}/permissions",
    request_body = dto::PermissionReq,
    responses(
        (status = 200, description = "Permission granted", body = dto::UserRes),
        (status = 400, description = "Invalid data", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn grant_permission(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<dto::PermissionReq>,
) -> Result<Json<dto::UserRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.grant_permission(&caller, &id, req)?))
}

#[utoipa::path(
    delete,
    path = "/omr/api/v1/users/{id}/permissions",
    request_body = dto::PermissionReq,
    responses(
        (status = 200, description = "Permission revoked", body = dto::UserRes),
        (status = 400, description = "Invalid data", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn revoke_permission(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<dto::PermissionReq>,
) -> Result<Json<dto::UserRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.revoke_permission(&caller, &id, req)?))
}

// ---------------------------------------------------------------------------
// Datatypes
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/omr/api/v1/datatypes",
    request_body = dto::DatatypeReq,
    responses(
        (status = 200, description = "Datatype registered", body = dto::DatatypeRes),
        (status = 400, description = "Invalid data", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized or duplicate", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn create_datatype(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<dto::DatatypeReq>,
) -> Result<Json<dto::DatatypeRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.register_datatype(&caller, req)?))
}

#[utoipa::path(
    put,
    path = "/omr/api/v1/datatypes/{id}",
    request_body = dto::DatatypeReq,
    responses(
        (status = 200, description = "Datatype updated", body = dto::DatatypeRes),
        (status = 404, description = "Datatype not found", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn update_datatype(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<dto::DatatypeReq>,
) -> Result<Json<dto::DatatypeRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.update_datatype(&caller, &id, req)?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/datatypes/{id}",
    responses(
        (status = 200, description = "Datatype, blank if unknown", body = dto::DatatypeRes)
    )
)]
#[axum::debug_handler]
async fn get_datatype(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<dto::DatatypeRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.get_datatype(&caller, &id)?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/datatypes",
    responses(
        (status = 200, description = "All datatypes", body = [dto::DatatypeRes])
    )
)]
#[axum::debug_handler]
async fn list_datatypes(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<dto::DatatypeRes>>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.list_datatypes(&caller)?))
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/omr/api/v1/services",
    request_body = dto::ServiceReq,
    responses(
        (status = 200, description = "Service registered", body = dto::ServiceRes),
        (status = 400, description = "Invalid data or duplicate id", body = dto::ErrorRes),
        (status = 404, description = "Datatype not found", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized or ledger failure", body = dto::ErrorRes)
    )
)]
/// Registers a service under an organization. Org admins of that org only;
/// a ledger failure rolls the CA enrollment back and the service stays
/// invisible.
#[axum::debug_handler]
async fn register_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<dto::ServiceReq>,
) -> Result<Json<dto::ServiceRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.register_service(&caller, req)?))
}

#[utoipa::path(
    post,
    path = "/omr/api/v1/services/{id}/datatypes",
    request_body = dto::AddDatatypeReq,
    responses(
        (status = 200, description = "Datatype attached", body = dto::ServiceRes),
        (status = 400, description = "Invalid data or unknown service", body = dto::ErrorRes),
        (status = 404, description = "Datatype not found", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized or already attached", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn add_service_datatype(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<dto::AddDatatypeReq>,
) -> Result<Json<dto::ServiceRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.add_service_datatype(&caller, &id, req)?))
}

#[utoipa::path(
    delete,
    path = "/omr/api/v1/services/{id}/datatypes/{datatype_id}",
    responses(
        (status = 200, description = "Datatype detached", body = dto::ServiceRes),
        (status = 400, description = "Unknown service", body = dto::ErrorRes),
        (status = 404, description = "Datatype not found", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized or not attached", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn remove_service_datatype(
    State(state): State<AppState>,
    AxumPath((id, datatype_id)): AxumPath<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<dto::ServiceRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(
        state.omr.remove_service_datatype(&caller, &id, &datatype_id)?,
    ))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/services/{id}",
    responses(
        (status = 200, description = "Service, blank if unknown; private fields redacted for outsiders", body = dto::ServiceRes)
    )
)]
#[axum::debug_handler]
async fn get_service(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<dto::ServiceRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.get_service(&caller, &id)?))
}

#[utoipa::path(
    post,
    path = "/omr/api/v1/services/{id}/users",
    request_body = dto::EnrollUserReq,
    responses(
        (status = 200, description = "User enrolled", body = dto::ServiceRes),
        (status = 404, description = "Service or user not found", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn enroll_user(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<dto::EnrollUserReq>,
) -> Result<Json<dto::ServiceRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.enroll_user(&caller, &id, req)?))
}

// ---------------------------------------------------------------------------
// Consents
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/omr/api/v1/consents",
    request_body = dto::ConsentReq,
    responses(
        (status = 200, description = "Consent recorded", body = dto::ConsentRes),
        (status = 400, description = "Invalid data", body = dto::ErrorRes),
        (status = 500, description = "Not the consent owner", body = dto::ErrorRes)
    )
)]
/// Creates, updates, or revokes (`option=["deny"]`) a consent record. Only
/// the owning patient may write.
#[axum::debug_handler]
async fn put_consent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<dto::ConsentReq>,
) -> Result<Json<dto::ConsentRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.put_consent(&caller, req)?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/consents/service/{service_id}/user/{user_id}",
    responses(
        (status = 200, description = "Consents for the service and user; empty when unauthorized", body = [dto::ConsentRes])
    )
)]
#[axum::debug_handler]
async fn consents_for_service_user(
    State(state): State<AppState>,
    AxumPath((service_id, user_id)): AxumPath<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Vec<dto::ConsentRes>>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.get_consents_for_service_user(
        &caller,
        &service_id,
        &user_id,
    )?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/consents/service/{service_id}/user/{user_id}/datatype/{datatype_id}",
    responses(
        (status = 200, description = "Single consent, blank when absent or unauthorized", body = dto::ConsentRes)
    )
)]
#[axum::debug_handler]
async fn consent_for_service_user_datatype(
    State(state): State<AppState>,
    AxumPath((service_id, user_id, datatype_id)): AxumPath<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<dto::ConsentRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.get_consent_for_service_user_datatype(
        &caller,
        &service_id,
        &user_id,
        &datatype_id,
    )?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/consents/user/{user_id}",
    responses(
        (status = 200, description = "All consents the user holds, scoped to the caller's orgs", body = [dto::ConsentRes])
    )
)]
#[axum::debug_handler]
async fn consents_for_user(
    State(state): State<AppState>,
    AxumPath(user_id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<dto::ConsentRes>>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.get_consents_for_user(&caller, &user_id)?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/consents/user/{user_id}/requests",
    responses(
        (status = 200, description = "One entry per service the user holds any consent for", body = [dto::RequestRes])
    )
)]
#[axum::debug_handler]
async fn requests_for_user(
    State(state): State<AppState>,
    AxumPath(user_id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<dto::RequestRes>>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.get_requests_for_user(&caller, &user_id)?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/consents/validate",
    params(ValidateQuery),
    responses(
        (status = 200, description = "Validation outcome; denial is carried in the body, not the status", body = dto::ValidateConsentRes),
        (status = 400, description = "Invalid data", body = dto::ErrorRes)
    )
)]
/// Checks whether the named service would be granted the requested access.
/// Always 200; the outcome and a one-time token are in the body.
#[axum::debug_handler]
async fn validate_consent(
    State(state): State<AppState>,
    Query(q): Query<ValidateQuery>,
    headers: HeaderMap,
) -> Result<Json<dto::ValidateConsentRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    let service_id = required(q.service_id, "service_id")?;
    let user_id = required(q.user_id, "user_id")?;
    let datatype_id = required(q.datatype_id, "datatype_id")?;
    let access = required(q.access, "access")?;
    Ok(Json(state.omr.validate_consent(
        &caller,
        &service_id,
        &user_id,
        &datatype_id,
        &access,
    )?))
}

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/omr/api/v1/data/user/{service_id}/{user_id}/{datatype_id}",
    request_body = dto::UploadDataReq,
    responses(
        (status = 200, description = "Record appended"),
        (status = 500, description = "No write consent", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn upload_user_data(
    State(state): State<AppState>,
    AxumPath((service_id, user_id, datatype_id)): AxumPath<(String, String, String)>,
    headers: HeaderMap,
    Json(req): Json<dto::UploadDataReq>,
) -> Result<StatusCode, ApiError> {
    let caller = caller_from(&state, &headers)?;
    state
        .omr
        .upload_user_data(&caller, &service_id, &user_id, &datatype_id, req)?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/data/user/{service_id}/{user_id}/{datatype_id}",
    params(DataQuery),
    responses(
        (status = 200, description = "Records in insertion order", body = [dto::DataRecordRes]),
        (status = 500, description = "No write consent", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn download_user_data(
    State(state): State<AppState>,
    AxumPath((service_id, user_id, datatype_id)): AxumPath<(String, String, String)>,
    Query(q): Query<DataQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<dto::DataRecordRes>>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.download_user_data(
        &caller,
        &service_id,
        &user_id,
        &datatype_id,
        &q.into(),
    )?))
}

#[utoipa::path(
    post,
    path = "/omr/api/v1/data/owner/{service_id}/{datatype_id}",
    request_body = dto::UploadDataReq,
    responses(
        (status = 200, description = "Record appended"),
        (status = 500, description = "Not a service actor", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn upload_owner_data(
    State(state): State<AppState>,
    AxumPath((service_id, datatype_id)): AxumPath<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<dto::UploadDataReq>,
) -> Result<StatusCode, ApiError> {
    let caller = caller_from(&state, &headers)?;
    state
        .omr
        .upload_owner_data(&caller, &service_id, &datatype_id, req)?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/data/owner/{service_id}/{datatype_id}",
    params(DataQuery),
    responses(
        (status = 200, description = "Records in insertion order", body = [dto::DataRecordRes]),
        (status = 500, description = "Not a service actor", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn download_owner_data(
    State(state): State<AppState>,
    AxumPath((service_id, datatype_id)): AxumPath<(String, String)>,
    Query(q): Query<DataQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<dto::DataRecordRes>>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.download_owner_data_as_owner(
        &caller,
        &service_id,
        &datatype_id,
        &q.into(),
    )?))
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/omr/api/v1/contracts",
    request_body = dto::ContractReq,
    responses(
        (status = 200, description = "Contract created", body = dto::ContractRes),
        (status = 400, description = "Invalid data", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized or ledger failure", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn create_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<dto::ContractReq>,
) -> Result<Json<dto::ContractRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.create_contract(&caller, req)?))
}

#[utoipa::path(
    post,
    path = "/omr/api/v1/contracts/{id}/terms",
    request_body = dto::TermsReq,
    responses(
        (status = 200, description = "Terms updated", body = dto::ContractRes),
        (status = 500, description = "Unauthorized or wrong state", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn change_contract_terms(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<dto::TermsReq>,
) -> Result<Json<dto::ContractRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.change_contract_terms(&caller, &id, req)?))
}

#[utoipa::path(
    post,
    path = "/omr/api/v1/contracts/{id}/sign",
    request_body = dto::SignReq,
    responses(
        (status = 200, description = "Contract signed", body = dto::ContractRes),
        (status = 500, description = "Unauthorized or wrong state", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn sign_contract(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<dto::SignReq>,
) -> Result<Json<dto::ContractRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.sign_contract(&caller, &id, req)?))
}

#[utoipa::path(
    post,
    path = "/omr/api/v1/contracts/{id}/payment",
    responses(
        (status = 200, description = "Contract paid", body = dto::ContractRes),
        (status = 500, description = "Unauthorized or wrong state", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn pay_contract(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<dto::ContractRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.pay_contract(&caller, &id)?))
}

#[utoipa::path(
    post,
    path = "/omr/api/v1/contracts/{id}/payment/verification",
    responses(
        (status = 200, description = "Payment verified", body = dto::ContractRes),
        (status = 500, description = "Unauthorized or wrong state", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn verify_contract_payment(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<dto::ContractRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.verify_contract_payment(&caller, &id)?))
}

#[utoipa::path(
    post,
    path = "/omr/api/v1/contracts/{id}/permissions",
    request_body = dto::GrantPermissionReq,
    responses(
        (status = 200, description = "Download permission granted", body = dto::ContractRes),
        (status = 400, description = "Invalid data", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized or wrong state", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn grant_download_permission(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<dto::GrantPermissionReq>,
) -> Result<Json<dto::ContractRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.grant_download_permission(&caller, &id, req)?))
}

#[utoipa::path(
    post,
    path = "/omr/api/v1/contracts/{id}/termination",
    request_body = dto::TerminateReq,
    responses(
        (status = 200, description = "Contract terminated", body = dto::ContractRes),
        (status = 500, description = "Side mismatch or wrong state", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn terminate_contract(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<dto::TerminateReq>,
) -> Result<Json<dto::ContractRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.terminate_contract(&caller, &id, req)?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/contracts/{id}",
    responses(
        (status = 200, description = "Contract for either side; blank sentinel for anyone else", body = dto::ContractRes)
    )
)]
#[axum::debug_handler]
async fn get_contract(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<dto::ContractRes>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.get_contract(&caller, &id)?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/contracts/owner/{service_id}",
    params(StatusQuery),
    responses(
        (status = 200, description = "Contracts owned by the service; empty when unauthorized", body = [dto::ContractRes])
    )
)]
#[axum::debug_handler]
async fn contracts_by_owner(
    State(state): State<AppState>,
    AxumPath(service_id): AxumPath<String>,
    Query(q): Query<StatusQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<dto::ContractRes>>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.list_contracts_by_owner(
        &caller,
        &service_id,
        q.status.as_deref(),
    )?))
}

#[utoipa::path(
    get,
    path = "/omr/api/v1/contracts/requester/{service_id}",
    params(StatusQuery),
    responses(
        (status = 200, description = "Contracts requested by the service; empty when unauthorized", body = [dto::ContractRes])
    )
)]
#[axum::debug_handler]
async fn contracts_by_requester(
    State(state): State<AppState>,
    AxumPath(service_id): AxumPath<String>,
    Query(q): Query<StatusQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<dto::ContractRes>>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.list_contracts_by_requester(
        &caller,
        &service_id,
        q.status.as_deref(),
    )?))
}

#[utoipa::path(
    post,
    path = "/omr/api/v1/contracts/{id}/download",
    request_body = dto::RequesterDownloadReq,
    responses(
        (status = 200, description = "Owner-data records; one permission unit consumed", body = [dto::DataRecordRes]),
        (status = 400, description = "Invalid data", body = dto::ErrorRes),
        (status = 500, description = "Unauthorized, wrong state, or exhausted permission", body = dto::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn download_as_requester(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<dto::RequesterDownloadReq>,
) -> Result<Json<Vec<dto::DataRecordRes>>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    Ok(Json(state.omr.download_as_requester(&caller, &id, req)?))
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/omr/api/v1/history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Matching audit entries, newest first, visibility-scoped", body = [dto::AuditEntryRes])
    )
)]
#[axum::debug_handler]
async fn history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<dto::AuditEntryRes>>, ApiError> {
    let caller = caller_from(&state, &headers)?;
    let filters = AuditFilters {
        patient_id: q.patient_id,
        service_id: q.service_id,
        datatype_id: q.datatype_id,
        consent_owner_target_id: q.consent_owner_target_id,
        latest_only: q.latest_only.unwrap_or(false),
        max_num: q.max_num,
        start_timestamp: q.start_timestamp,
        end_timestamp: q.end_timestamp,
    };
    Ok(Json(state.omr.query_history(&caller, &filters)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use omr_core::CoreConfig;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const SYS_TOKEN: &str = "sys-admin-token";

    fn app() -> Router {
        let cfg = CoreConfig::new(SYS_TOKEN, 20).expect("test config should be valid");
        router(OmrService::new(cfg))
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request should build"),
            None => builder.body(Body::empty()).expect("request should build"),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(req)
            .await
            .expect("request should be handled");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should be readable")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("body should be JSON")
        };
        (status, value)
    }

    fn org_body(id: &str) -> Value {
        json!({
            "id": id,
            "name": format!("{id} name"),
            "ca_org": "ca.example.com",
            "secret": format!("{id}-secret"),
            "email": format!("admin@{id}.example.com"),
            "status": "active"
        })
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let app = app();
        let (status, body) = send(&app, request("GET", "/omr/api/v1/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], json!(true));
    }

    #[tokio::test]
    async fn test_missing_bearer_token_is_500_invalid_credential() {
        let app = app();
        let (status, body) =
            send(&app, request("GET", "/omr/api/v1/organizations", None, None)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["msg"], json!("error: invalid credential"));
    }

    #[tokio::test]
    async fn test_validation_error_maps_to_400_with_envelope() {
        let app = app();
        let (status, body) = send(
            &app,
            request(
                "POST",
                "/omr/api/v1/organizations",
                Some(SYS_TOKEN),
                Some(json!({ "name": "no id" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["msg"], json!("Invalid data: id missing"));
    }

    #[tokio::test]
    async fn test_not_found_maps_to_404() {
        let app = app();
        let (status, body) = send(
            &app,
            request("GET", "/omr/api/v1/users/ghost", Some(SYS_TOKEN), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["msg"], json!("User not found"));
    }

    #[tokio::test]
    async fn test_unknown_org_get_is_blank_sentinel_200() {
        let app = app();
        let (status, body) = send(
            &app,
            request(
                "GET",
                "/omr/api/v1/organizations/ghost",
                Some(SYS_TOKEN),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], json!(""));
    }

    #[tokio::test]
    async fn test_org_registration_roundtrip_with_redaction() {
        let app = app();
        let (status, _) = send(
            &app,
            request(
                "POST",
                "/omr/api/v1/organizations",
                Some(SYS_TOKEN),
                Some(org_body("org1")),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // The org admin sees their own secret; the sys admin gets the
        // redacted public view.
        let (status, body) = send(
            &app,
            request(
                "GET",
                "/omr/api/v1/organizations/org1",
                Some("org1-secret"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["secret"], json!("org1-secret"));

        let (_, body) = send(
            &app,
            request(
                "GET",
                "/omr/api/v1/organizations/org1",
                Some(SYS_TOKEN),
                None,
            ),
        )
        .await;
        assert_eq!(body["secret"], json!(""));
        assert_eq!(body["email"], json!(""));
    }

    #[tokio::test]
    async fn test_unauthorized_mutation_is_500_not_403() {
        let app = app();
        send(
            &app,
            request(
                "POST",
                "/omr/api/v1/organizations",
                Some(SYS_TOKEN),
                Some(org_body("org1")),
            ),
        )
        .await;
        // Org admins may not register further orgs.
        let (status, body) = send(
            &app,
            request(
                "POST",
                "/omr/api/v1/organizations",
                Some("org1-secret"),
                Some(org_body("org2")),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            body["msg"]
                .as_str()
                .expect("msg should be a string")
                .starts_with("error"),
            "authorization failures share the generic error envelope"
        );
    }

    #[tokio::test]
    async fn test_validate_consent_requires_query_params() {
        let app = app();
        let (status, body) = send(
            &app,
            request(
                "GET",
                "/omr/api/v1/consents/validate?service_id=svc1&user_id=u1&datatype_id=dt1",
                Some(SYS_TOKEN),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["msg"], json!("Invalid data: access missing"));
    }

    #[tokio::test]
    async fn test_history_returns_empty_list_for_no_matches() {
        let app = app();
        let (status, body) = send(
            &app,
            request(
                "GET",
                "/omr/api/v1/history?service_id=no-such-service",
                Some(SYS_TOKEN),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }
}

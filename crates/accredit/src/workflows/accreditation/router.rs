use std::sync::Arc;

use axum::{
    extract::{Path, Query as QueryString, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::catalog::{BulkRequest, InstitutionFilter, ParameterQuery, RepositoryCatalog};
use super::domain::{
    ApplicationId, Decision, DocumentId, DocumentStatus, DocumentUpload, InstitutionId,
    InstitutionRegistration, ParameterDeclaration, ParameterTemplate, QueryAudience, QueryId,
};
use super::lifecycle::ApplicationStatus;
use super::service::{AccreditationError, AccreditationService};
use super::store::{ComplianceStore, NoticePublisher, StoreError};
use crate::telemetry::AUDIT_TARGET;
use crate::workflows::access::{
    AccessAuthority, AccessError, Capability, KeyRequest, KeyStore, Principal,
};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Everything the HTTP surface needs, shared behind one `Arc`.
pub struct AccreditationApi<S, N, K> {
    pub service: AccreditationService<S, N>,
    pub catalog: RepositoryCatalog<S>,
    pub authority: AccessAuthority<K>,
}

impl<S, N, K> AccreditationApi<S, N, K>
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    pub fn new(
        service: AccreditationService<S, N>,
        catalog: RepositoryCatalog<S>,
        authority: AccessAuthority<K>,
    ) -> Self {
        Self {
            service,
            catalog,
            authority,
        }
    }

    fn principal(&self, headers: &HeaderMap) -> Result<Principal, AccreditationError> {
        let presented = headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        match presented {
            Some(raw_key) => Ok(self.authority.validate(raw_key)?),
            None => {
                warn!(target: AUDIT_TARGET, reason = "missing", "authentication failed");
                Err(AccessError::AuthenticationFailure.into())
            }
        }
    }

    fn authorize(
        &self,
        headers: &HeaderMap,
        capability: Capability,
    ) -> Result<Principal, AccreditationError> {
        let principal = self.principal(headers)?;
        principal.require(capability)?;
        Ok(principal)
    }

    fn authorize_for(
        &self,
        headers: &HeaderMap,
        capability: Capability,
        institution_id: &InstitutionId,
    ) -> Result<Principal, AccreditationError> {
        let principal = self.principal(headers)?;
        principal.require_for(capability, institution_id)?;
        Ok(principal)
    }

    fn authorize_for_application(
        &self,
        headers: &HeaderMap,
        capability: Capability,
        application_id: &ApplicationId,
    ) -> Result<Principal, AccreditationError> {
        let principal = self.authorize(headers, capability)?;
        let record = self.service.application_status(application_id)?;
        principal.require_for(capability, &record.institution_id)?;
        Ok(principal)
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryPayload {
    #[serde(default = "default_audience")]
    pub to_role: QueryAudience,
    pub message: String,
}

fn default_audience() -> QueryAudience {
    QueryAudience::Institution
}

#[derive(Debug, Deserialize)]
pub struct ReplyPayload {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionPayload {
    pub decision: Decision,
    pub remarks: String,
}

#[derive(Debug, Deserialize)]
pub struct DocumentStatusPayload {
    pub status: DocumentStatus,
}

/// Router builder exposing the accreditation workflow, catalog reads, and key management.
pub fn accreditation_router<S, N, K>(api: Arc<AccreditationApi<S, N, K>>) -> Router
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/institutions",
            post(register_handler::<S, N, K>).get(list_institutions_handler::<S, N, K>),
        )
        .route(
            "/api/v1/institutions/:institution_id",
            get(institution_detail_handler::<S, N, K>),
        )
        .route(
            "/api/v1/institutions/:institution_id/archive",
            post(archive_handler::<S, N, K>),
        )
        .route(
            "/api/v1/institutions/:institution_id/applications",
            post(open_application_handler::<S, N, K>),
        )
        .route(
            "/api/v1/institutions/:institution_id/parameters",
            put(declare_parameter_handler::<S, N, K>),
        )
        .route(
            "/api/v1/institutions/:institution_id/documents",
            post(upload_document_handler::<S, N, K>),
        )
        .route(
            "/api/v1/institutions/:institution_id/compliance",
            post(recompute_handler::<S, N, K>),
        )
        .route(
            "/api/v1/documents/:document_id/status",
            put(document_status_handler::<S, N, K>),
        )
        .route(
            "/api/v1/templates",
            get(templates_handler::<S, N, K>).post(install_templates_handler::<S, N, K>),
        )
        .route(
            "/api/v1/applications/:application_id",
            get(status_handler::<S, N, K>),
        )
        .route(
            "/api/v1/applications/:application_id/submit",
            post(submit_handler::<S, N, K>),
        )
        .route(
            "/api/v1/applications/:application_id/review",
            post(begin_review_handler::<S, N, K>),
        )
        .route(
            "/api/v1/applications/:application_id/queries",
            post(raise_query_handler::<S, N, K>),
        )
        .route(
            "/api/v1/applications/:application_id/analysis",
            post(run_analysis_handler::<S, N, K>),
        )
        .route(
            "/api/v1/applications/:application_id/decision",
            post(decide_handler::<S, N, K>),
        )
        .route(
            "/api/v1/queries/:query_id/reply",
            post(reply_handler::<S, N, K>),
        )
        .route(
            "/api/v1/queries/:query_id/resolve",
            post(resolve_handler::<S, N, K>),
        )
        .route(
            "/api/v1/search/parameters",
            post(query_by_parameter_handler::<S, N, K>),
        )
        .route("/api/v1/bulk", post(bulk_query_handler::<S, N, K>))
        .route("/api/v1/statistics", get(statistics_handler::<S, N, K>))
        .route(
            "/api/v1/keys",
            post(generate_key_handler::<S, N, K>).get(list_keys_handler::<S, N, K>),
        )
        .route("/api/v1/keys/self", get(validate_key_handler::<S, N, K>))
        .route("/api/v1/keys/:key", delete(revoke_key_handler::<S, N, K>))
        .with_state(api)
}

type ApiState<S, N, K> = State<Arc<AccreditationApi<S, N, K>>>;

fn respond<T: Serialize>(status: StatusCode, result: Result<T, AccreditationError>) -> Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn register_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    axum::Json(registration): axum::Json<InstitutionRegistration>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let result = api
        .authorize(&headers, Capability::ManageInstitutions)
        .and_then(|_| api.service.register_institution(registration));
    respond(StatusCode::CREATED, result)
}

async fn list_institutions_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    QueryString(filter): QueryString<InstitutionFilter>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let result = api
        .principal(&headers)
        .and_then(|principal| api.catalog.list_institutions(&principal, &filter));
    respond(StatusCode::OK, result)
}

async fn institution_detail_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(institution_id): Path<String>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let institution_id = InstitutionId(institution_id);
    let result = api
        .principal(&headers)
        .and_then(|principal| api.catalog.institution_detail(&principal, &institution_id));
    respond(StatusCode::OK, result)
}

async fn archive_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(institution_id): Path<String>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let institution_id = InstitutionId(institution_id);
    let result = api
        .authorize(&headers, Capability::ManageInstitutions)
        .and_then(|_| api.service.archive_institution(&institution_id));
    respond(StatusCode::OK, result)
}

async fn open_application_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(institution_id): Path<String>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let institution_id = InstitutionId(institution_id);
    let result = api
        .authorize_for(&headers, Capability::ManageSubmission, &institution_id)
        .and_then(|principal| {
            api.service
                .open_application(&institution_id, &principal.actor())
        })
        .map(|record| record.status_view());
    respond(StatusCode::CREATED, result)
}

async fn declare_parameter_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(institution_id): Path<String>,
    axum::Json(declaration): axum::Json<ParameterDeclaration>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let institution_id = InstitutionId(institution_id);
    let result = api
        .authorize_for(&headers, Capability::ManageSubmission, &institution_id)
        .and_then(|principal| {
            api.service
                .declare_parameter(&institution_id, declaration, &principal.actor())
        });
    respond(StatusCode::OK, result)
}

async fn upload_document_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(institution_id): Path<String>,
    axum::Json(upload): axum::Json<DocumentUpload>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let institution_id = InstitutionId(institution_id);
    let result = api
        .authorize_for(&headers, Capability::ManageSubmission, &institution_id)
        .and_then(|principal| {
            api.service
                .upload_document(&institution_id, upload, &principal.actor())
        });
    respond(StatusCode::CREATED, result)
}

async fn recompute_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(institution_id): Path<String>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let institution_id = InstitutionId(institution_id);
    let result = api
        .authorize_for(&headers, Capability::ReadAiAnalysis, &institution_id)
        .and_then(|_| api.service.recompute_compliance(&institution_id));
    respond(StatusCode::OK, result)
}

async fn document_status_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(document_id): Path<String>,
    axum::Json(payload): axum::Json<DocumentStatusPayload>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let document_id = DocumentId(document_id);
    let result = api
        .authorize(&headers, Capability::ReviewApplications)
        .and_then(|principal| {
            api.service
                .set_document_status(&document_id, payload.status, &principal.actor())
        });
    respond(StatusCode::OK, result)
}

async fn templates_handler<S, N, K>(State(api): ApiState<S, N, K>, headers: HeaderMap) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let result = api
        .principal(&headers)
        .and_then(|principal| api.catalog.parameter_templates(&principal));
    respond(StatusCode::OK, result)
}

async fn install_templates_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    axum::Json(templates): axum::Json<Vec<ParameterTemplate>>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let result = api
        .authorize(&headers, Capability::ManageInstitutions)
        .and_then(|_| api.service.install_templates(templates))
        .map(|installed| json!({ "installed": installed }));
    respond(StatusCode::OK, result)
}

pub(crate) async fn status_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let application_id = ApplicationId(application_id);
    let result = api.principal(&headers).and_then(|principal| {
        let view = api.catalog.application_status(&principal, &application_id)?;
        // A reviewer's first read of a submitted application opens the review. A frozen
        // application is still returned as read.
        if view.status == ApplicationStatus::Submitted.label()
            && principal.can(Capability::ReviewApplications)
        {
            return match api.service.begin_review(&application_id, &principal.actor()) {
                Ok(record) => Ok(record.status_view()),
                Err(AccreditationError::StateGuard(_)) => Ok(view),
                Err(other) => Err(other),
            };
        }
        Ok(view)
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn submit_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let application_id = ApplicationId(application_id);
    let result = api
        .authorize_for_application(&headers, Capability::ManageSubmission, &application_id)
        .and_then(|principal| {
            api.service
                .submit_application(&application_id, &principal.actor())
        })
        .map(|record| record.status_view());
    respond(StatusCode::OK, result)
}

async fn begin_review_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let application_id = ApplicationId(application_id);
    let result = api
        .authorize(&headers, Capability::ReviewApplications)
        .and_then(|principal| api.service.begin_review(&application_id, &principal.actor()))
        .map(|record| record.status_view());
    respond(StatusCode::OK, result)
}

async fn raise_query_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    axum::Json(payload): axum::Json<QueryPayload>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let application_id = ApplicationId(application_id);
    let result = api
        .authorize(&headers, Capability::ReviewApplications)
        .and_then(|principal| {
            api.service.raise_query(
                &application_id,
                payload.to_role,
                &payload.message,
                &principal.actor(),
            )
        });
    respond(StatusCode::CREATED, result)
}

async fn run_analysis_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let application_id = ApplicationId(application_id);
    let result = api
        .authorize(&headers, Capability::ReviewApplications)
        .and_then(|principal| api.service.run_analysis(&application_id, &principal.actor()))
        .map(|record| {
            json!({
                "application": record.status_view(),
                "analysis": record.analysis,
            })
        });
    respond(StatusCode::OK, result)
}

pub(crate) async fn decide_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    axum::Json(payload): axum::Json<DecisionPayload>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let application_id = ApplicationId(application_id);
    let result = api
        .authorize(&headers, Capability::DecideApplications)
        .and_then(|principal| {
            api.service.decide(
                &application_id,
                payload.decision,
                &payload.remarks,
                &principal.actor(),
            )
        })
        .map(|record| record.status_view());
    respond(StatusCode::OK, result)
}

async fn reply_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(query_id): Path<String>,
    axum::Json(payload): axum::Json<ReplyPayload>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let query_id = QueryId(query_id);
    let result = api.principal(&headers).and_then(|principal| {
        if !principal.can(Capability::ReviewApplications) {
            let record = api.service.application_for_query(&query_id)?;
            principal.require_for(Capability::ManageSubmission, &record.institution_id)?;
        }
        api.service
            .reply(&query_id, &payload.text, &principal.actor())
    });
    respond(StatusCode::OK, result)
}

async fn resolve_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(query_id): Path<String>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let query_id = QueryId(query_id);
    let result = api
        .authorize(&headers, Capability::ReviewApplications)
        .and_then(|principal| api.service.resolve(&query_id, &principal.actor()))
        .map(|record| record.status_view());
    respond(StatusCode::OK, result)
}

async fn query_by_parameter_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    axum::Json(query): axum::Json<ParameterQuery>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let result = api
        .principal(&headers)
        .and_then(|principal| api.catalog.query_by_parameter(&principal, &query));
    respond(StatusCode::OK, result)
}

pub(crate) async fn bulk_query_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<BulkRequest>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let result = api
        .principal(&headers)
        .and_then(|principal| api.catalog.bulk_query(&principal, &request));
    respond(StatusCode::OK, result)
}

async fn statistics_handler<S, N, K>(State(api): ApiState<S, N, K>, headers: HeaderMap) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let result = api
        .principal(&headers)
        .and_then(|principal| api.catalog.statistics(&principal));
    respond(StatusCode::OK, result)
}

async fn generate_key_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<KeyRequest>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let result = api
        .authorize(&headers, Capability::ManageKeys)
        .and_then(|_| Ok(api.authority.generate(request)?));
    respond(StatusCode::CREATED, result)
}

async fn list_keys_handler<S, N, K>(State(api): ApiState<S, N, K>, headers: HeaderMap) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let result = api
        .authorize(&headers, Capability::ManageKeys)
        .and_then(|_| Ok(api.authority.list()?));
    respond(StatusCode::OK, result)
}

async fn validate_key_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    respond(StatusCode::OK, api.principal(&headers))
}

async fn revoke_key_handler<S, N, K>(
    State(api): ApiState<S, N, K>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Response
where
    S: ComplianceStore + 'static,
    N: NoticePublisher + 'static,
    K: KeyStore + 'static,
{
    let result = api
        .authorize(&headers, Capability::ManageKeys)
        .and_then(|_| Ok(api.authority.revoke(&key)?));
    respond(StatusCode::OK, result)
}

impl AccreditationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AccreditationError::Validation { .. } => StatusCode::BAD_REQUEST,
            AccreditationError::StateGuard(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AccreditationError::ConcurrentTransitionConflict { .. } => StatusCode::CONFLICT,
            AccreditationError::NotFound(_) => StatusCode::NOT_FOUND,
            AccreditationError::Store(StoreError::Conflict)
            | AccreditationError::Store(StoreError::VersionConflict { .. }) => StatusCode::CONFLICT,
            AccreditationError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            AccreditationError::Store(StoreError::Unavailable(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AccreditationError::Access(AccessError::AuthenticationFailure) => {
                StatusCode::UNAUTHORIZED
            }
            AccreditationError::Access(AccessError::AuthorizationFailure { .. }) => {
                StatusCode::FORBIDDEN
            }
            AccreditationError::Access(AccessError::UnknownKey) => StatusCode::NOT_FOUND,
            AccreditationError::Access(AccessError::Validation { .. }) => StatusCode::BAD_REQUEST,
            AccreditationError::Access(AccessError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AccreditationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let payload = match &self {
            AccreditationError::StateGuard(violation) => json!({
                "error": self.to_string(),
                "unmet": violation.unmet,
            }),
            AccreditationError::Validation { field, .. }
            | AccreditationError::Access(AccessError::Validation { field, .. }) => json!({
                "error": self.to_string(),
                "field": field,
            }),
            _ => json!({
                "error": self.to_string(),
            }),
        };
        (status, axum::Json(payload)).into_response()
    }
}

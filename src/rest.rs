//! REST API layer using Axum
//!
//! - Public: health, login, registration.
//! - Protected (bearer token, see [`crate::gate`]): generic entity CRUD,
//!   identity lookups, dashboard stats and the AI gateway.
//!
//! Every failure is an [`ApiError`], turned into a status code plus the
//! `{success: false, error, code, timestamp}` envelope in one place.

use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::TokenIssuer;
use crate::config::Config;
use crate::directory::{IdentityDirectory, NewIdentity};
use crate::error::{ApiError, ApiResult, AuthFailure, StoreError};
use crate::gate::{auth_middleware, require_role, CurrentIdentity};
use crate::generation::{
    AiResponse, ContentGateway, ContentRequest, ExplainRequest, QuizRequest, StudyRequest,
};
use crate::models::{IdentityView, Record, RecordId, Role};
use crate::storage::{EntityStore, SortSpec, DEFAULT_LIMIT, DEFAULT_SORT};

/// Shared app state for REST handlers (Arc-wrapped for concurrency)
pub struct AppState {
    pub config: Config,
    pub store: EntityStore,
    pub directory: Arc<IdentityDirectory>,
    pub tokens: TokenIssuer,
    pub gateway: ContentGateway,
}

impl AppState {
    pub fn new(config: Config, gateway: ContentGateway) -> Self {
        Self {
            store: EntityStore::new(),
            directory: Arc::new(IdentityDirectory::new(config.bcrypt_cost)),
            tokens: TokenIssuer::new(config.secret_key.as_bytes(), config.token_ttl_minutes),
            gateway,
            config,
        }
    }
}

/// JSON body extractor whose rejections use the API error envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string extractor, rejected through the envelope like [`ApiJson`].
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Path segment of the filter route. Records may not use it as an id, or
/// they could never be addressed under `/entities/:entity/:id`.
pub const FILTER_SEGMENT: &str = "filter";

/// Success envelope.
#[derive(Serialize, Deserialize, Debug)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), message: None, timestamp: Utc::now().to_rfc3339() }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Envelope<Value> {
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Deserialize, Serialize)]
pub struct RegisterRequest {
    #[serde(alias = "username")]
    pub name: String,
    pub email: String,
    #[serde(alias = "password")]
    pub secret: String,
    pub role: Option<String>,
}

#[derive(Deserialize, Serialize)]
pub struct LoginRequest {
    #[serde(alias = "username")]
    pub name: String,
    #[serde(alias = "password")]
    pub secret: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    /// Token lifetime in seconds.
    pub expires_in: i64,
    pub identity: IdentityView,
}

/// `?sort=&limit=`: empty values mean "use the default".
#[derive(Deserialize, Default)]
pub struct ListParams {
    pub sort: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub limit: Option<usize>,
}

fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid value '{}': {}", value, e))),
    }
}

impl ListParams {
    fn sort_spec(&self) -> SortSpec {
        SortSpec::parse(self.sort.as_deref().filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SORT))
    }

    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Create Axum router: public auth routes plus gated entity/AI routes.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    let state = Arc::new(state);

    let protected = Router::new()
        .route("/auth/me", get(me_handler))
        .route("/users", get(list_users_handler))
        .route("/dashboard/stats", get(dashboard_stats_handler))
        .route("/entities/:entity", get(list_entities_handler).post(create_entity_handler))
        .route(&format!("/entities/:entity/{}", FILTER_SEGMENT), post(filter_entities_handler))
        .route(
            "/entities/:entity/:id",
            get(get_entity_handler).put(update_entity_handler).delete(delete_entity_handler),
        )
        .route("/ai/capabilities", get(ai_capabilities_handler))
        .route("/ai/generate-content", post(generate_content_handler))
        .route("/ai/generate-quiz", post(generate_quiz_handler))
        .route("/ai/study-assistant", post(study_assistant_handler))
        .route("/ai/explain-concept", post(explain_concept_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/register", post(register_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn root_handler() -> Json<Value> {
    Json(json!({"message": "entity_db REST API", "status": "running"}))
}

async fn health_handler() -> Json<Envelope<Value>> {
    Json(Envelope::message_only("entity_db REST API healthy"))
}

// --- Auth ---

async fn register_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> ApiResult<Json<IdentityView>> {
    let name = payload.name.trim().to_string();
    if name.is_empty() || payload.secret.is_empty() {
        return Err(ApiError::BadRequest("name and secret are required".to_string()));
    }
    let role = match payload.role.as_deref() {
        Some(raw) => raw.parse::<Role>().map_err(ApiError::BadRequest)?,
        None => Role::Student,
    };

    // bcrypt is CPU-bound; keep it off the async workers.
    let directory = state.directory.clone();
    let identity = tokio::task::spawn_blocking(move || {
        directory.register(NewIdentity {
            name,
            email: payload.email,
            secret: payload.secret,
            role,
        })
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(IdentityView::from(&identity)))
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let directory = state.directory.clone();
    let name = payload.name.trim().to_string();
    let lookup = name.clone();
    let secret = payload.secret;
    let identity = tokio::task::spawn_blocking(move || directory.authenticate(&lookup, &secret))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| {
            tracing::warn!(%name, "login failed");
            ApiError::Unauthorized(AuthFailure::BadCredentials)
        })?;

    let token = state.tokens.create_jwt(&identity.name)?;
    info!(name = %identity.name, "login succeeded");
    Ok(Json(LoginResponse {
        token,
        token_type: "bearer".to_string(),
        expires_in: state.tokens.ttl().num_seconds(),
        identity: IdentityView::from(&identity),
    }))
}

async fn me_handler(
    Extension(CurrentIdentity(identity)): Extension<CurrentIdentity>,
) -> Json<IdentityView> {
    Json(IdentityView::from(&identity))
}

async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentIdentity(identity)): Extension<CurrentIdentity>,
) -> ApiResult<Json<Vec<IdentityView>>> {
    require_role(&identity, &[Role::Admin])?;
    Ok(Json(state.directory.list().iter().map(IdentityView::from).collect()))
}

async fn dashboard_stats_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentIdentity(identity)): Extension<CurrentIdentity>,
) -> Json<Value> {
    let directory = &state.directory;
    let store = &state.store;
    let stats = match identity.role {
        Role::Admin => {
            let collections: Map<String, Value> = store
                .collection_sizes()
                .into_iter()
                .map(|(name, n)| (name, json!(n)))
                .collect();
            json!({
                "total_users": directory.len(),
                "total_students": directory.count_by_role(Role::Student),
                "total_lecturers": directory.count_by_role(Role::Lecturer),
                "total_courses": store.count("Course"),
                "collections": collections,
            })
        }
        Role::Lecturer => json!({
            "total_courses": store.count("Course"),
            "total_students": directory.count_by_role(Role::Student),
            "assignments": store.count("Assignment"),
            "submissions": store.count("Submission"),
        }),
        Role::Student => {
            let mine = Record::from(Map::from_iter([(
                "studentId".to_string(),
                json!(identity.id),
            )]));
            let owned = |entity: &str| {
                store.filter(entity, &mine, &SortSpec::default(), usize::MAX).len()
            };
            json!({
                "enrolled_courses": owned("Enrollment"),
                "assignments": store.count("Assignment"),
                "submissions": owned("Submission"),
            })
        }
    };
    Json(stats)
}

// --- Generic entities ---

fn record_body(entity: &str, body: Value) -> ApiResult<Record> {
    Record::from_value(body)
        .ok_or_else(|| StoreError::NotAnObject { entity: entity.to_string() }.into())
}

async fn list_entities_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(entity): ApiPath<String>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Json<Envelope<Vec<Record>>> {
    Json(Envelope::ok(state.store.list(&entity, &params.sort_spec(), params.limit())))
}

async fn get_entity_handler(
    State(state): State<Arc<AppState>>,
    ApiPath((entity, id)): ApiPath<(String, String)>,
) -> ApiResult<Json<Envelope<Record>>> {
    let record = state.store.get(&entity, &RecordId::parse(&id))?;
    Ok(Json(Envelope::ok(record)))
}

async fn filter_entities_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(entity): ApiPath<String>,
    ApiQuery(params): ApiQuery<ListParams>,
    ApiJson(body): ApiJson<Value>,
) -> ApiResult<Json<Envelope<Vec<Record>>>> {
    let predicate = Record::from_value(body)
        .ok_or_else(|| ApiError::BadRequest("filter predicate must be a JSON object".to_string()))?;
    let records = state.store.filter(&entity, &predicate, &params.sort_spec(), params.limit());
    Ok(Json(Envelope::ok(records)))
}

async fn create_entity_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentIdentity(identity)): Extension<CurrentIdentity>,
    ApiPath(entity): ApiPath<String>,
    ApiJson(body): ApiJson<Value>,
) -> ApiResult<impl IntoResponse> {
    let record = record_body(&entity, body)?;
    if record.id().and_then(Value::as_str) == Some(FILTER_SEGMENT) {
        return Err(StoreError::ReservedId { entity, id: FILTER_SEGMENT.to_string() }.into());
    }
    let record = state.store.create(&entity, record)?;
    info!(%entity, id = ?record.id(), by = %identity.name, "record created");
    let message = format!("{} created successfully", entity);
    Ok((StatusCode::CREATED, Json(Envelope::ok(record).with_message(message))))
}

async fn update_entity_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentIdentity(identity)): Extension<CurrentIdentity>,
    ApiPath((entity, id)): ApiPath<(String, String)>,
    ApiJson(body): ApiJson<Value>,
) -> ApiResult<Json<Envelope<Record>>> {
    let id = RecordId::parse(&id);
    let record = state.store.update(&entity, &id, record_body(&entity, body)?)?;
    info!(%entity, %id, by = %identity.name, "record updated");
    Ok(Json(Envelope::ok(record).with_message(format!("{} updated successfully", entity))))
}

async fn delete_entity_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentIdentity(identity)): Extension<CurrentIdentity>,
    ApiPath((entity, id)): ApiPath<(String, String)>,
) -> ApiResult<Json<Envelope<Value>>> {
    let id = RecordId::parse(&id);
    state.store.delete(&entity, &id)?;
    info!(%entity, %id, by = %identity.name, "record deleted");
    Ok(Json(Envelope::message_only(format!("{} deleted successfully", entity))))
}

// --- AI gateway ---

async fn ai_capabilities_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentIdentity(identity)): Extension<CurrentIdentity>,
) -> Json<Value> {
    let mut capabilities = Map::new();
    capabilities.insert(
        "study_assistant".to_string(),
        json!({"available": true, "description": "Get help with questions and explanations"}),
    );
    if Role::STAFF.contains(&identity.role) {
        capabilities.insert(
            "content_generation".to_string(),
            json!({
                "available": true,
                "description": "Generate lessons, assignments, and explanations",
                "types": ["lesson", "assignment", "explanation"],
            }),
        );
        capabilities.insert(
            "quiz_generation".to_string(),
            json!({
                "available": true,
                "description": "Generate quiz questions and assessments",
                "question_types": ["multiple_choice", "true_false", "short_answer"],
            }),
        );
    }
    if identity.role == Role::Admin {
        capabilities.insert(
            "advanced_analytics".to_string(),
            json!({"available": true, "description": "Generate reports and analytics using AI"}),
        );
    }
    Json(json!({
        "user_role": identity.role,
        "ai_service_available": state.gateway.is_configured(),
        "capabilities": capabilities,
    }))
}

async fn generate_content_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentIdentity(identity)): Extension<CurrentIdentity>,
    ApiJson(req): ApiJson<ContentRequest>,
) -> ApiResult<AiResponse> {
    require_role(&identity, &Role::STAFF)?;
    Ok(state.gateway.generate_content(&req).await)
}

async fn generate_quiz_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentIdentity(identity)): Extension<CurrentIdentity>,
    ApiJson(req): ApiJson<QuizRequest>,
) -> ApiResult<AiResponse> {
    require_role(&identity, &Role::STAFF)?;
    Ok(state.gateway.generate_quiz(&req).await)
}

async fn study_assistant_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentIdentity(identity)): Extension<CurrentIdentity>,
    ApiJson(req): ApiJson<StudyRequest>,
) -> ApiResult<AiResponse> {
    require_role(&identity, &Role::ALL)?;
    let course_info = req
        .course_id
        .and_then(|id| state.store.get("Course", &RecordId::Int(id)).ok())
        .and_then(|course| {
            let title = course.get("title")?.as_str()?.to_string();
            let description = course.get("description").and_then(Value::as_str).unwrap_or("");
            Some(format!("Course: {} - {}", title, description))
        });
    Ok(state.gateway.study_assistant(&req, course_info).await)
}

async fn explain_concept_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentIdentity(identity)): Extension<CurrentIdentity>,
    ApiJson(req): ApiJson<ExplainRequest>,
) -> ApiResult<AiResponse> {
    require_role(&identity, &Role::ALL)?;
    state.gateway.explain_concept(&req).await
}

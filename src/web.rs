//! HTTP surface: access checks, catalog, claims, the student gate, and the
//! admin mutation endpoints. Handlers stay thin; every decision of substance
//! lives in `access` and `storage`.
use crate::access::gate::{DbSettingsProvider, GateContext, StudentAccessGate};
use crate::access::ledger::{self, ClaimOutcome, ClaimRequest};
use crate::access::resolver;
use crate::access::types::{EntityKind, EntityRef, Role, Subject};
use crate::access::{admin, AccessPolicy};
use crate::entities;
use crate::errors::LudoraError;
use crate::jobs;
use crate::session::BearerToken;
use crate::settings::Settings;
use crate::storage::{self, InviteRedeemOutcome, NewProduct};
use crate::tokens::TokenManager;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub policy: Arc<AccessPolicy>,
    pub db: DatabaseConnection,
    pub tokens: TokenManager,
    pub gate: StudentAccessGate,
}

impl AppState {
    pub fn new(settings: Settings, db: DatabaseConnection, tokens: TokenManager) -> Self {
        let policy = Arc::new(AccessPolicy::from_settings(&settings));
        let gate = StudentAccessGate::new(Arc::new(DbSettingsProvider::new(db.clone())));
        Self {
            settings: Arc::new(settings),
            policy,
            db,
            tokens,
            gate,
        }
    }
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    // Access decisions are computed per request and must never be replayed
    // from a cache
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store"),
    );

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/.well-known/jwks.json", get(jwks_handler))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/access/check/{entity_type}/{entity_id}", get(access_check))
        .route("/access/grant", post(access_grant))
        .route("/access/revoke", delete(access_revoke))
        .route(
            "/catalog/products",
            get(list_products_handler).post(create_product_handler),
        )
        .route(
            "/catalog/products/{entity_type}/{entity_id}",
            get(get_product_handler),
        )
        .route(
            "/subscriptions/claims",
            post(claim_product).delete(release_claim),
        )
        .route(
            "/subscriptions/allowance/{product_type}",
            get(allowance_status),
        )
        .route("/students/validate-access", post(validate_student_access))
        .route("/students/redeem-invite", post(redeem_invite))
        .route("/students/invites", post(create_invite))
        .route("/admin/allowance/adjust", post(adjust_allowance))
        .route("/admin/tokens/anonymous", post(issue_admin_token))
        .route("/admin/jobs", get(list_jobs))
        .route("/admin/jobs/{name}/trigger", post(trigger_job))
        .layer(middleware::from_fn(security_headers))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState) -> miette::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let app = router(state);

    // NOTE: rate limiting belongs at the reverse proxy (nginx, traefik);
    // keep login and token endpoints behind per-IP limits in production.
    tracing::info!(%addr, "API listening");
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

// ============================================================================
// Caller identity
// ============================================================================

enum Caller {
    Session(entities::user::Model),
    /// Bearer token verified as a portal-minted anonymous-admin token.
    AnonymousAdmin,
    Anonymous,
}

impl Caller {
    fn subject(&self) -> Subject {
        match self {
            Caller::Session(user) => Subject::new(
                user.id.as_str(),
                Role::parse(&user.role).unwrap_or(Role::Guest),
            ),
            Caller::AnonymousAdmin => Subject::new("anonymous-admin", Role::Admin),
            Caller::Anonymous => Subject::guest(),
        }
    }
}

async fn identify(state: &AppState, headers: &HeaderMap) -> Result<Caller, LudoraError> {
    let Some(bearer) = BearerToken::from_headers(headers) else {
        return Ok(Caller::Anonymous);
    };

    if let Some(session) = storage::get_session(&state.db, &bearer.token).await? {
        if let Some(user) = storage::get_user(&state.db, &session.user_id).await? {
            return Ok(Caller::Session(user));
        }
    }

    // Not a session token; it may still be a signed anonymous-admin token
    if state
        .tokens
        .verify_anonymous_admin(&bearer.token, &state.settings.access.portal_audiences)
        .is_some()
    {
        return Ok(Caller::AnonymousAdmin);
    }

    Ok(Caller::Anonymous)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "unauthorized", "error_description": "authentication required"})),
    )
        .into_response()
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"error": "forbidden", "error_description": "administrative privileges required"})),
    )
        .into_response()
}

/// Gate an admin route: 401 for anonymous callers, 403 for callers whose
/// role does not clear `action`, None when the caller may proceed.
fn require_admin(caller: &Caller, action: &str, policy: &AccessPolicy) -> Option<Response> {
    if matches!(caller, Caller::Anonymous) {
        return Some(unauthorized());
    }
    if !admin::have_admin_access(
        caller.subject().role,
        action,
        &policy.sysadmin_forbidden_actions,
    ) {
        return Some(forbidden());
    }
    None
}

fn storage_error(e: LudoraError) -> Response {
    match e {
        LudoraError::NotFound(desc) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "not_found", "error_description": desc})),
        )
            .into_response(),
        LudoraError::BadRequest(desc) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "bad_request", "error_description": desc})),
        )
            .into_response(),
        e => {
            tracing::error!(error = %e, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "server_error"})),
            )
                .into_response()
        }
    }
}

fn unknown_entity_type(entity_type: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "unknown_entity_type",
            "error_description": format!("unknown entity type: {entity_type}"),
        })),
    )
        .into_response()
}

// ============================================================================
// Health and keys
// ============================================================================

async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn jwks_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.tokens.jwks_json())
}

// ============================================================================
// Authentication
// ============================================================================

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let user = match storage::verify_user_password(&state.db, &req.email, &req.password).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "invalid_credentials",
                    "error_description": "email or password incorrect",
                })),
            )
                .into_response()
        }
        Err(e) => return storage_error(e),
    };

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let session = match storage::create_session(
        &state.db,
        &user.id,
        state.settings.access.session_ttl_seconds,
        user_agent,
        None,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => return storage_error(e),
    };

    tracing::info!(user = %user.id, role = %user.role, "login");
    Json(json!({
        "token": session.token,
        "userId": user.id,
        "role": user.role,
        "displayName": user.display_name,
        "expiresAt": session.expires_at,
    }))
    .into_response()
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(bearer) = BearerToken::from_headers(&headers) {
        if let Err(e) = storage::delete_session(&state.db, &bearer.token).await {
            return storage_error(e);
        }
    }
    Json(json!({"status": "ok"})).into_response()
}

// ============================================================================
// Access checks and admin grant/revoke
// ============================================================================

async fn access_check(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(kind) = EntityKind::parse(&entity_type) else {
        return unknown_entity_type(&entity_type);
    };

    let caller = match identify(&state, &headers).await {
        Ok(caller) => caller,
        Err(e) => return storage_error(e),
    };

    let entity = EntityRef::new(kind, entity_id);
    match resolver::resolve_access(&state.db, &state.policy, &caller.subject(), &entity).await {
        Ok(decision) => Json(decision).into_response(),
        Err(e) => storage_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantRequest {
    buyer_user_id: String,
    product_id: String,
}

async fn access_grant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GrantRequest>,
) -> impl IntoResponse {
    let caller = match identify(&state, &headers).await {
        Ok(caller) => caller,
        Err(e) => return storage_error(e),
    };
    if let Some(denied) = require_admin(&caller, admin::actions::ACCESS_GRANT, &state.policy) {
        return denied;
    }

    match storage::grant_access(&state.db, &req.buyer_user_id, &req.product_id).await {
        Ok(purchase) => {
            tracing::info!(
                buyer = %req.buyer_user_id,
                product = %req.product_id,
                granted_by = %caller.subject().id,
                "access granted"
            );
            (
                StatusCode::CREATED,
                Json(json!({
                    "purchaseId": purchase.id,
                    "buyerUserId": purchase.buyer_user_id,
                    "productId": purchase.product_id,
                    "paymentStatus": purchase.payment_status,
                    "accessExpiresAt": purchase.access_expires_at,
                })),
            )
                .into_response()
        }
        Err(e) => storage_error(e),
    }
}

async fn access_revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GrantRequest>,
) -> impl IntoResponse {
    let caller = match identify(&state, &headers).await {
        Ok(caller) => caller,
        Err(e) => return storage_error(e),
    };
    if let Some(denied) = require_admin(&caller, admin::actions::ACCESS_REVOKE, &state.policy) {
        return denied;
    }

    match storage::revoke_access(&state.db, &req.buyer_user_id, &req.product_id).await {
        Ok(0) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "not_found",
                "error_description": "no completed purchase to revoke",
            })),
        )
            .into_response(),
        Ok(refunded) => {
            tracing::info!(
                buyer = %req.buyer_user_id,
                product = %req.product_id,
                refunded,
                revoked_by = %caller.subject().id,
                "access revoked"
            );
            Json(json!({"refunded": refunded})).into_response()
        }
        Err(e) => storage_error(e),
    }
}

// ============================================================================
// Catalog
// ============================================================================

fn product_json(p: &entities::product::Model) -> Value {
    json!({
        "id": p.id,
        "productType": p.product_type,
        "title": p.title,
        "creatorUserId": p.creator_user_id,
        "priceCents": p.price_cents,
        "accessDurationDays": p.access_duration_days,
        "createdAt": p.created_at,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductListQuery {
    product_type: Option<String>,
}

async fn list_products_handler(
    State(state): State<AppState>,
    Query(q): Query<ProductListQuery>,
) -> impl IntoResponse {
    let kind = match q.product_type.as_deref() {
        Some(raw) => match EntityKind::parse(raw) {
            Some(kind) => Some(kind),
            None => return unknown_entity_type(raw),
        },
        None => None,
    };

    match storage::list_products(&state.db, kind.map(|k| k.as_str())).await {
        Ok(products) => {
            Json(products.iter().map(product_json).collect::<Vec<_>>()).into_response()
        }
        Err(e) => storage_error(e),
    }
}

async fn get_product_handler(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some(kind) = EntityKind::parse(&entity_type) else {
        return unknown_entity_type(&entity_type);
    };

    match storage::get_product(&state.db, kind.as_str(), &entity_id).await {
        Ok(Some(product)) => Json(product_json(&product)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "not_found",
                "error_description": "no such product",
            })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProductRequest {
    product_type: String,
    title: String,
    #[serde(default)]
    creator_user_id: Option<String>,
    #[serde(default)]
    price_cents: i64,
    #[serde(default)]
    access_duration_days: Option<i64>,
    #[serde(default)]
    bundle_children: Vec<String>,
}

async fn create_product_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateProductRequest>,
) -> impl IntoResponse {
    let caller = match identify(&state, &headers).await {
        Ok(caller) => caller,
        Err(e) => return storage_error(e),
    };
    if matches!(caller, Caller::Anonymous) {
        return unauthorized();
    }

    let subject = caller.subject();
    let admin_caller = admin::have_admin_access(
        subject.role,
        admin::actions::PRODUCT_CREATE,
        &state.policy.sysadmin_forbidden_actions,
    );
    if !admin_caller && subject.role != Role::Teacher {
        return forbidden();
    }

    let Some(kind) = EntityKind::parse(&req.product_type) else {
        return unknown_entity_type(&req.product_type);
    };

    // Teachers always own what they publish; admins may assign any creator
    // or leave the product orphaned.
    let creator_user_id = if admin_caller {
        req.creator_user_id.clone()
    } else {
        Some(subject.id.clone())
    };

    let input = NewProduct {
        product_type: kind.as_str().to_string(),
        title: req.title,
        creator_user_id,
        price_cents: req.price_cents,
        access_duration_days: req.access_duration_days,
        bundle_children: req.bundle_children,
    };

    match storage::create_product(&state.db, input).await {
        Ok(product) => (StatusCode::CREATED, Json(product_json(&product))).into_response(),
        Err(e) => storage_error(e),
    }
}

// ============================================================================
// Subscription claims and allowances
// ============================================================================

/// Loads the caller's teacher session and active subscription, or produces
/// the error response explaining what is missing.
async fn teacher_subscription(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(entities::user::Model, entities::subscription::Model), Response> {
    let caller = identify(state, headers).await.map_err(storage_error)?;
    let Caller::Session(user) = caller else {
        return Err(unauthorized());
    };
    if Role::parse(&user.role) != Some(Role::Teacher) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "forbidden",
                "error_description": "only teachers hold subscription allowances",
            })),
        )
            .into_response());
    }

    match storage::find_active_subscription(&state.db, &user.id).await {
        Ok(Some(subscription)) => Ok((user, subscription)),
        Ok(None) => Err((
            StatusCode::CONFLICT,
            Json(json!({
                "error": "no_active_subscription",
                "error_description": "an active subscription is required",
            })),
        )
            .into_response()),
        Err(e) => Err(storage_error(e)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimBody {
    product_type: String,
    product_id: String,
    #[serde(default)]
    skip_confirmation: bool,
}

async fn claim_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ClaimBody>,
) -> impl IntoResponse {
    let (user, subscription) = match teacher_subscription(&state, &headers).await {
        Ok(pair) => pair,
        Err(denied) => return denied,
    };
    let Some(kind) = EntityKind::parse(&req.product_type) else {
        return unknown_entity_type(&req.product_type);
    };

    let request = ClaimRequest {
        subscription_id: subscription.id.clone(),
        user_id: user.id.clone(),
        month_year: ledger::current_month_key(),
        product_type: kind.as_str().to_string(),
        product_id: req.product_id.clone(),
        skip_confirmation: req.skip_confirmation,
    };

    match ledger::claim(&state.db, &state.policy, &request).await {
        Ok(ClaimOutcome::Claimed { claim, remaining }) => (
            StatusCode::CREATED,
            Json(json!({
                "status": "claimed",
                "productId": claim.product_id,
                "monthYear": claim.month_year,
                "remaining": remaining,
            })),
        )
            .into_response(),
        Ok(ClaimOutcome::AlreadyClaimed { claim, remaining }) => Json(json!({
            "status": "already_claimed",
            "productId": claim.product_id,
            "monthYear": claim.month_year,
            "remaining": remaining,
        }))
        .into_response(),
        Ok(ClaimOutcome::NeedsConfirmation {
            remaining_if_claimed,
        }) => Json(json!({
            "status": "needs_confirmation",
            "remainingIfClaimed": remaining_if_claimed,
        }))
        .into_response(),
        Ok(ClaimOutcome::Exceeded { used, limit }) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "allowance_exceeded",
                "error_description": "monthly allowance exhausted for this product type",
                "used": used,
                "limit": limit,
            })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseBody {
    product_type: String,
    product_id: String,
}

async fn release_claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReleaseBody>,
) -> impl IntoResponse {
    let (_, subscription) = match teacher_subscription(&state, &headers).await {
        Ok(pair) => pair,
        Err(denied) => return denied,
    };
    let Some(kind) = EntityKind::parse(&req.product_type) else {
        return unknown_entity_type(&req.product_type);
    };

    let month = ledger::current_month_key();
    match ledger::release(&state.db, &subscription.id, &month, kind.as_str(), &req.product_id).await
    {
        Ok(true) => Json(json!({"status": "released"})).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "not_found",
                "error_description": "no claim for this product in the current month",
            })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

async fn allowance_status(
    State(state): State<AppState>,
    Path(product_type): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (_, subscription) = match teacher_subscription(&state, &headers).await {
        Ok(pair) => pair,
        Err(denied) => return denied,
    };
    let Some(kind) = EntityKind::parse(&product_type) else {
        return unknown_entity_type(&product_type);
    };

    let month = ledger::current_month_key();
    match ledger::check_allowance(&state.db, &subscription, &month, kind.as_str()).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => storage_error(e),
    }
}

// ============================================================================
// Student surface
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ValidateAccessBody {
    invite_code: Option<String>,
    lobby_code: Option<String>,
}

async fn validate_student_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ValidateAccessBody>,
) -> impl IntoResponse {
    // A broken session lookup must not close the gate; treat it as anonymous
    let caller = identify(&state, &headers)
        .await
        .unwrap_or(Caller::Anonymous);
    let (role, is_authenticated) = match &caller {
        Caller::Session(user) => (Role::parse(&user.role), true),
        Caller::AnonymousAdmin => (Some(Role::Admin), true),
        Caller::Anonymous => (None, false),
    };

    let context = GateContext {
        role,
        is_authenticated,
        has_invite_code: body.invite_code.as_deref().is_some_and(|c| !c.is_empty()),
        has_lobby_code: body.lobby_code.as_deref().is_some_and(|c| !c.is_empty()),
    };

    Json(state.gate.validate_access(&context).await).into_response()
}

#[derive(Debug, Deserialize)]
struct RedeemInviteBody {
    code: String,
}

async fn redeem_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RedeemInviteBody>,
) -> impl IntoResponse {
    let caller = match identify(&state, &headers).await {
        Ok(caller) => caller,
        Err(e) => return storage_error(e),
    };
    let Caller::Session(user) = caller else {
        return unauthorized();
    };

    match storage::redeem_invite_code(&state.db, &req.code, &user.id).await {
        Ok(InviteRedeemOutcome::Linked { teacher_user_id }) => {
            tracing::info!(student = %user.id, teacher = %teacher_user_id, "invite redeemed");
            Json(json!({"status": "linked", "teacherUserId": teacher_user_id})).into_response()
        }
        Ok(InviteRedeemOutcome::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "invite_not_found",
                "error_description": "no such invite code",
            })),
        )
            .into_response(),
        Ok(InviteRedeemOutcome::Expired) => (
            StatusCode::GONE,
            Json(json!({
                "error": "invite_expired",
                "error_description": "this invite code has expired",
            })),
        )
            .into_response(),
        Ok(InviteRedeemOutcome::Exhausted) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "invite_exhausted",
                "error_description": "this invite code has no uses left",
            })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

fn default_max_uses() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateInviteBody {
    #[serde(default = "default_max_uses")]
    max_uses: i64,
    #[serde(default)]
    ttl_seconds: Option<i64>,
}

async fn create_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateInviteBody>,
) -> impl IntoResponse {
    let caller = match identify(&state, &headers).await {
        Ok(caller) => caller,
        Err(e) => return storage_error(e),
    };
    let Caller::Session(user) = caller else {
        return unauthorized();
    };
    if Role::parse(&user.role) != Some(Role::Teacher) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "forbidden",
                "error_description": "only teachers mint invite codes",
            })),
        )
            .into_response();
    }
    if req.max_uses < 1 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "bad_request",
                "error_description": "maxUses must be at least 1",
            })),
        )
            .into_response();
    }

    match storage::create_invite_code(&state.db, &user.id, req.max_uses, req.ttl_seconds).await {
        Ok(invite) => (
            StatusCode::CREATED,
            Json(json!({
                "code": invite.code,
                "maxUses": invite.max_uses,
                "expiresAt": invite.expires_at,
            })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

// ============================================================================
// Admin endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdjustBody {
    subscription_id: String,
    product_type: String,
    #[serde(default)]
    month_year: Option<String>,
    delta: i64,
    reason: String,
}

async fn adjust_allowance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AdjustBody>,
) -> impl IntoResponse {
    let caller = match identify(&state, &headers).await {
        Ok(caller) => caller,
        Err(e) => return storage_error(e),
    };
    if let Some(denied) = require_admin(&caller, admin::actions::ALLOWANCE_ADJUST, &state.policy) {
        return denied;
    }
    let Some(kind) = EntityKind::parse(&req.product_type) else {
        return unknown_entity_type(&req.product_type);
    };

    match ledger::adjust(
        &state.db,
        &req.subscription_id,
        kind.as_str(),
        req.month_year.as_deref(),
        req.delta,
        &req.reason,
        &caller.subject().id,
    )
    .await
    {
        Ok(status) => Json(status).into_response(),
        Err(e) => storage_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    audience: String,
}

async fn issue_admin_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TokenBody>,
) -> impl IntoResponse {
    let caller = match identify(&state, &headers).await {
        Ok(caller) => caller,
        Err(e) => return storage_error(e),
    };
    // Anonymous-admin tokens cannot mint further tokens; issuance needs a
    // real admin session.
    let Caller::Session(user) = &caller else {
        return unauthorized();
    };
    let role = Role::parse(&user.role).unwrap_or(Role::Guest);
    if !admin::have_admin_access(
        role,
        admin::actions::TOKEN_ISSUE,
        &state.policy.sysadmin_forbidden_actions,
    ) {
        return forbidden();
    }

    if !state
        .settings
        .access
        .portal_audiences
        .iter()
        .any(|a| a == &req.audience)
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "unknown_audience",
                "error_description": "audience is not an allow-listed portal",
            })),
        )
            .into_response();
    }

    let ttl = state.settings.access.anonymous_admin_ttl_seconds;
    match state.tokens.issue_anonymous_admin(&req.audience, ttl) {
        Ok(token) => {
            tracing::info!(issued_by = %user.id, audience = %req.audience, "anonymous admin token issued");
            Json(json!({"token": token, "expiresIn": ttl})).into_response()
        }
        Err(e) => storage_error(e),
    }
}

fn job_json(j: &entities::job_execution::Model) -> Value {
    json!({
        "id": j.id,
        "jobName": j.job_name,
        "startedAt": j.started_at,
        "completedAt": j.completed_at,
        "success": j.success.map(|s| s == 1),
        "errorMessage": j.error_message,
        "recordsProcessed": j.records_processed,
    })
}

async fn list_jobs(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let caller = match identify(&state, &headers).await {
        Ok(caller) => caller,
        Err(e) => return storage_error(e),
    };
    if let Some(denied) = require_admin(&caller, admin::actions::JOB_VIEW, &state.policy) {
        return denied;
    }

    match jobs::list_recent_executions(&state.db, 50).await {
        Ok(executions) => {
            Json(executions.iter().map(job_json).collect::<Vec<_>>()).into_response()
        }
        Err(e) => storage_error(e),
    }
}

async fn trigger_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let caller = match identify(&state, &headers).await {
        Ok(caller) => caller,
        Err(e) => return storage_error(e),
    };
    if let Some(denied) = require_admin(&caller, admin::actions::JOB_TRIGGER, &state.policy) {
        return denied;
    }

    match jobs::trigger_job_manually(&state.db, &name).await {
        Ok(execution) => Json(job_json(&execution)).into_response(),
        Err(e) => storage_error(e),
    }
}

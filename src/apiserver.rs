use std::{path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    extract::{
        FromRequestParts, Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

use crate::{
    BackendHandle,
    controller::{ControllerCommand, ShowState},
    event::UiEvent,
    manager::{ShowModelHandle, ShowModelManager},
    model::{
        ShowModel,
        cue::{Cue, CueType, CueUpdate},
        cue_list::CueListError,
        rbac::{NamedInput, Permission, Role, User, UserInput, opaque_id},
        settings::Settings,
        template::{Template, TemplateFilters},
    },
    preferences::{SettingsError, SettingsManager},
    rbac::{
        RbacError,
        client::RbacApi,
        matrix::{MatrixController, MatrixSnapshot},
    },
    session::{AuthError, AuthService, Registration, SessionManager},
    sync::{
        client::SyncError,
        conflict::Strategy,
        queue::{SyncQueue, SyncReport, SyncStatus},
    },
    templates::{PullReport, TemplateLibrary},
    theme::{BrandColors, BrandTheme, Palette, ThemeManager, ThemeMode},
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("sign in required")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(String),
    #[error("cue controller is not running")]
    ControllerUnavailable,
    #[error(transparent)]
    CueList(#[from] CueListError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Rbac(#[from] RbacError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub(crate) fn error_status(err: &ApiError) -> StatusCode {
    match err {
        ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        ApiError::Auth(AuthError::Rejected { status, .. }) => match StatusCode::from_u16(*status) {
            Ok(status) if status.is_client_error() => status,
            _ => StatusCode::BAD_GATEWAY,
        },
        ApiError::Auth(AuthError::Unavailable(_)) => StatusCode::BAD_GATEWAY,
        ApiError::NotFound(_) | ApiError::CueList(CueListError::CueNotFound(_)) => StatusCode::NOT_FOUND,
        ApiError::CueList(CueListError::IndexOutOfRange { .. })
        | ApiError::Settings(SettingsError::Invalid(_) | SettingsError::Parse(_)) => StatusCode::BAD_REQUEST,
        ApiError::CueList(CueListError::StaleRevision { .. }) | ApiError::Rbac(RbacError::CellBusy) => {
            StatusCode::CONFLICT
        }
        ApiError::ControllerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ApiError::Rbac(RbacError::Api(_)) => StatusCode::BAD_GATEWAY,
        ApiError::Sync(e) => match e.status().and_then(|s| StatusCode::from_u16(s).ok()) {
            Some(status) if status.is_client_error() => status,
            _ => StatusCode::BAD_GATEWAY,
        },
        ApiError::Settings(SettingsError::Storage(_)) | ApiError::Auth(AuthError::Session(_)) | ApiError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = error_status(&self);
        if status.is_server_error() {
            log::error!("Request failed: {:?}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
struct ApiState {
    controller_tx: mpsc::Sender<ControllerCommand>,
    state_rx: watch::Receiver<ShowState>,
    event_tx: broadcast::Sender<UiEvent>,
    model_manager: ShowModelManager,
    model_handle: ShowModelHandle,
    settings: SettingsManager,
    theme: ThemeManager,
    session: SessionManager,
    auth: AuthService,
    sync_queue: SyncQueue,
    templates: TemplateLibrary,
    rbac: Arc<dyn RbacApi>,
    role_permissions: MatrixController,
    user_roles: MatrixController,
    show_path: PathBuf,
}

impl From<&BackendHandle> for ApiState {
    fn from(backend: &BackendHandle) -> Self {
        Self {
            controller_tx: backend.controller_tx.clone(),
            state_rx: backend.state_rx.clone(),
            event_tx: backend.event_tx.clone(),
            model_manager: backend.model_manager.clone(),
            model_handle: backend.model_handle.clone(),
            settings: backend.settings.clone(),
            theme: backend.theme.clone(),
            session: backend.session.clone(),
            auth: backend.auth.clone(),
            sync_queue: backend.sync_queue.clone(),
            templates: backend.templates.clone(),
            rbac: backend.rbac.clone(),
            role_permissions: backend.role_permissions.clone(),
            user_roles: backend.user_roles.clone(),
            show_path: backend.show_path.clone(),
        }
    }
}

/// Handler parameter that rejects requests while no admin session is held.
struct Authenticated;

impl FromRequestParts<ApiState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(_parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        if state.session.is_authenticated().await {
            Ok(Authenticated)
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

pub fn create_api_router(backend: &BackendHandle) -> Router {
    let state = ApiState::from(backend);

    Router::new()
        .route("/ws", get(websocket_handler))
        // presenter
        .route("/api/show/full_state", get(get_full_state_handler))
        .route("/api/show/command", post(command_handler))
        .route("/api/show/cues", get(list_cues).post(add_cue))
        .route("/api/show/cues/move", post(move_cue))
        // GET and PATCH address a cue by id, DELETE and duplicate by list index
        .route("/api/show/cues/{key}", get(get_cue).patch(update_cue).delete(delete_cue))
        .route("/api/show/cues/{key}/duplicate", post(duplicate_cue))
        .route("/api/show/save", post(save_show))
        .route("/api/show/load", post(load_show))
        // preferences
        .route("/api/settings", get(get_settings).patch(update_settings))
        .route("/api/settings/save", post(save_settings))
        .route("/api/settings/reset", post(reset_settings))
        .route("/api/settings/import", post(import_settings))
        .route("/api/settings/export", get(export_settings))
        .route("/api/theme", get(get_theme))
        .route("/api/theme/toggle", post(toggle_theme))
        .route("/api/theme/output", get(get_output_theme).post(apply_output_theme))
        // auth
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(get_session))
        .route("/api/auth/verify-phone", post(verify_phone))
        .route("/api/auth/forgot-password", post(forgot_password))
        .route("/api/auth/reset-password", post(reset_password))
        .route("/api/profile", get(get_profile).patch(update_profile))
        // admin
        .route("/api/admin/users", get(list_users).post(create_user))
        .route("/api/admin/users/{id}", patch(update_user).delete(delete_user))
        .route("/api/admin/roles", get(list_roles).post(create_role))
        .route("/api/admin/roles/{id}", patch(update_role).delete(delete_role))
        .route("/api/admin/permissions", get(list_permissions).post(create_permission))
        .route("/api/admin/permissions/{id}", patch(update_permission).delete(delete_permission))
        .route("/api/admin/matrix/{relation}", get(get_matrix))
        .route("/api/admin/matrix/{relation}/toggle", post(toggle_cell))
        // templates and sync
        .route("/api/templates/saved", get(list_saved).post(save_template))
        .route("/api/templates/saved/{id}", delete(delete_saved))
        .route("/api/templates/pull", post(pull_saved))
        .route("/api/templates/marketplace", get(marketplace))
        .route("/api/templates/teams/{team}", get(team_templates))
        .route("/api/templates/teams/{team}/share", post(share_template))
        .route("/api/sync/status", get(sync_status))
        .route("/api/sync/run", post(run_sync))
        .route("/api/sync/queue", delete(clear_sync_queue))
        .with_state(state)
}

#[derive(Serialize)]
struct FullShowState {
    show_model: ShowModel,
    show_state: ShowState,
}

async fn get_full_state_handler(State(state): State<ApiState>) -> Json<FullShowState> {
    let show_model = state.model_manager.read().await.clone();
    let show_state = state.state_rx.borrow().clone();

    Json(FullShowState { show_model, show_state })
}

async fn command_handler(State(state): State<ApiState>, Json(command): Json<ControllerCommand>) -> ApiResult<StatusCode> {
    state
        .controller_tx
        .send(command)
        .await
        .map_err(|_| ApiError::ControllerUnavailable)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize, Default)]
struct SearchQuery {
    search: Option<String>,
}

async fn list_cues(State(state): State<ApiState>, Query(query): Query<SearchQuery>) -> Json<Vec<Cue>> {
    let cues = match query.search.as_deref().map(str::trim) {
        Some(search) if !search.is_empty() => state.model_handle.search(search).await,
        _ => state.model_handle.read().await.cue_list.cues().to_vec(),
    };
    Json(cues)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCueBody {
    #[serde(rename = "type", default)]
    cue_type: CueType,
    revision: Option<u64>,
}

async fn add_cue(State(state): State<ApiState>, Json(body): Json<AddCueBody>) -> ApiResult<(StatusCode, Json<Cue>)> {
    let cue = state.model_manager.add_cue(body.cue_type, body.revision).await?;
    Ok((StatusCode::CREATED, Json(cue)))
}

async fn get_cue(State(state): State<ApiState>, Path(cue_id): Path<Uuid>) -> ApiResult<Json<Cue>> {
    state
        .model_handle
        .get_cue_by_id(&cue_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("cue {}", cue_id)))
}

async fn update_cue(
    State(state): State<ApiState>,
    Path(cue_id): Path<Uuid>,
    Json(update): Json<CueUpdate>,
) -> ApiResult<Json<Cue>> {
    Ok(Json(state.model_manager.update_cue(&cue_id, update).await?))
}

#[derive(Deserialize, Default)]
struct RevisionQuery {
    revision: Option<u64>,
}

async fn delete_cue(
    State(state): State<ApiState>,
    Path(index): Path<usize>,
    Query(query): Query<RevisionQuery>,
) -> ApiResult<Json<Cue>> {
    Ok(Json(state.model_manager.delete_cue(index, query.revision).await?))
}

async fn duplicate_cue(
    State(state): State<ApiState>,
    Path(index): Path<usize>,
    Query(query): Query<RevisionQuery>,
) -> ApiResult<(StatusCode, Json<Cue>)> {
    let cue = state.model_manager.duplicate_cue(index, query.revision).await?;
    Ok((StatusCode::CREATED, Json(cue)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveBody {
    from: usize,
    to: usize,
    revision: Option<u64>,
}

async fn move_cue(State(state): State<ApiState>, Json(body): Json<MoveBody>) -> ApiResult<StatusCode> {
    state.model_manager.move_cue(body.from, body.to, body.revision).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn save_show(State(state): State<ApiState>) -> ApiResult<StatusCode> {
    state.model_manager.save_to_file(&state.show_path).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn load_show(State(state): State<ApiState>) -> ApiResult<StatusCode> {
    state.model_manager.load_from_file(&state.show_path).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_settings(State(state): State<ApiState>) -> Json<Settings> {
    Json(state.settings.get().await)
}

async fn update_settings(State(state): State<ApiState>, Json(patch): Json<Value>) -> ApiResult<Json<Settings>> {
    Ok(Json(state.settings.update(patch).await?))
}

async fn save_settings(State(state): State<ApiState>) -> ApiResult<StatusCode> {
    state.settings.save().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_settings(State(state): State<ApiState>) -> Json<Settings> {
    Json(state.settings.reset().await)
}

async fn import_settings(State(state): State<ApiState>, body: String) -> ApiResult<Json<Settings>> {
    Ok(Json(state.settings.import(&body).await?))
}

async fn export_settings(State(state): State<ApiState>) -> ApiResult<Response> {
    let exported = state.settings.export().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"presenter-settings.json\""),
        ],
        exported,
    )
        .into_response())
}

#[derive(Serialize)]
struct ThemeResponse {
    mode: ThemeMode,
    palette: Palette,
}

async fn get_theme(State(state): State<ApiState>) -> Json<ThemeResponse> {
    let mode = state.theme.mode().await;
    Json(ThemeResponse {
        mode,
        palette: Palette::for_mode(mode),
    })
}

async fn toggle_theme(State(state): State<ApiState>) -> ApiResult<Json<ThemeResponse>> {
    let mode = state.theme.toggle().await?;
    Ok(Json(ThemeResponse {
        mode,
        palette: Palette::for_mode(mode),
    }))
}

#[derive(Deserialize)]
struct OutputThemeBody {
    theme: BrandTheme,
}

#[derive(Serialize)]
struct OutputThemeResponse {
    theme: BrandTheme,
    colors: BrandColors,
}

async fn get_output_theme(State(state): State<ApiState>) -> Json<OutputThemeResponse> {
    let theme = state.theme.output_theme().await;
    Json(OutputThemeResponse {
        theme,
        colors: theme.colors(),
    })
}

async fn apply_output_theme(
    State(state): State<ApiState>,
    Json(body): Json<OutputThemeBody>,
) -> ApiResult<Json<OutputThemeResponse>> {
    let colors = state.theme.apply_output_theme(body.theme).await?;
    Ok(Json(OutputThemeResponse {
        theme: body.theme,
        colors,
    }))
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct SessionResponse {
    authenticated: bool,
    user: Option<User>,
}

async fn login(State(state): State<ApiState>, Json(body): Json<LoginBody>) -> ApiResult<Json<SessionResponse>> {
    let session = state.auth.login(&body.email, &body.password).await?;
    Ok(Json(SessionResponse {
        authenticated: true,
        user: session.user,
    }))
}

async fn register(
    State(state): State<ApiState>,
    Json(registration): Json<Registration>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.auth.register(&registration).await?;
    Ok(Json(SessionResponse {
        authenticated: true,
        user: session.user,
    }))
}

async fn logout(State(state): State<ApiState>) -> ApiResult<StatusCode> {
    state.auth.logout().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_session(State(state): State<ApiState>) -> Json<SessionResponse> {
    let session = state.session.current().await;
    Json(SessionResponse {
        authenticated: session.is_some(),
        user: session.and_then(|s| s.user),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPhoneBody {
    #[serde(deserialize_with = "opaque_id")]
    user_id: String,
    code: String,
}

async fn verify_phone(State(state): State<ApiState>, Json(body): Json<VerifyPhoneBody>) -> ApiResult<StatusCode> {
    state.auth.verify_phone(&body.user_id, &body.code).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ForgotPasswordBody {
    email: String,
}

async fn forgot_password(State(state): State<ApiState>, Json(body): Json<ForgotPasswordBody>) -> ApiResult<StatusCode> {
    state.auth.forgot_password(&body.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ResetPasswordBody {
    token: String,
    password: String,
}

async fn reset_password(State(state): State<ApiState>, Json(body): Json<ResetPasswordBody>) -> ApiResult<StatusCode> {
    state.auth.reset_password(&body.token, &body.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_profile(State(state): State<ApiState>, _auth: Authenticated) -> ApiResult<Json<User>> {
    Ok(Json(state.rbac.profile().await?))
}

async fn update_profile(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Json(input): Json<UserInput>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.rbac.update_profile(&input).await?))
}

async fn list_users(State(state): State<ApiState>, _auth: Authenticated) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.rbac.list_users().await?))
}

async fn create_user(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Json(input): Json<UserInput>,
) -> ApiResult<(StatusCode, Json<User>)> {
    Ok((StatusCode::CREATED, Json(state.rbac.create_user(&input).await?)))
}

async fn update_user(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Path(id): Path<String>,
    Json(input): Json<UserInput>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.rbac.update_user(&id, &input).await?))
}

async fn delete_user(State(state): State<ApiState>, _auth: Authenticated, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.rbac.delete_user(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_roles(State(state): State<ApiState>, _auth: Authenticated) -> ApiResult<Json<Vec<Role>>> {
    Ok(Json(state.rbac.list_roles().await?))
}

async fn create_role(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Json(input): Json<NamedInput>,
) -> ApiResult<(StatusCode, Json<Role>)> {
    Ok((StatusCode::CREATED, Json(state.rbac.create_role(&input).await?)))
}

async fn update_role(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Path(id): Path<String>,
    Json(input): Json<NamedInput>,
) -> ApiResult<Json<Role>> {
    Ok(Json(state.rbac.update_role(&id, &input).await?))
}

async fn delete_role(State(state): State<ApiState>, _auth: Authenticated, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.rbac.delete_role(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_permissions(State(state): State<ApiState>, _auth: Authenticated) -> ApiResult<Json<Vec<Permission>>> {
    Ok(Json(state.rbac.list_permissions().await?))
}

async fn create_permission(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Json(input): Json<NamedInput>,
) -> ApiResult<(StatusCode, Json<Permission>)> {
    Ok((StatusCode::CREATED, Json(state.rbac.create_permission(&input).await?)))
}

async fn update_permission(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Path(id): Path<String>,
    Json(input): Json<NamedInput>,
) -> ApiResult<Json<Permission>> {
    Ok(Json(state.rbac.update_permission(&id, &input).await?))
}

async fn delete_permission(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.rbac.delete_permission(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn matrix_for<'a>(state: &'a ApiState, relation: &str) -> ApiResult<&'a MatrixController> {
    [&state.role_permissions, &state.user_roles]
        .into_iter()
        .find(|m| m.relation_name() == relation)
        .ok_or_else(|| ApiError::NotFound(format!("relation '{}'", relation)))
}

async fn get_matrix(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Path(relation): Path<String>,
) -> ApiResult<Json<MatrixSnapshot>> {
    let matrix = matrix_for(&state, &relation)?;
    matrix.refresh().await?;
    Ok(Json(matrix.snapshot().await))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToggleBody {
    #[serde(deserialize_with = "opaque_id")]
    row_id: String,
    #[serde(deserialize_with = "opaque_id")]
    col_id: String,
}

async fn toggle_cell(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Path(relation): Path<String>,
    Json(body): Json<ToggleBody>,
) -> ApiResult<Json<Value>> {
    let member = matrix_for(&state, &relation)?.toggle(&body.row_id, &body.col_id).await?;
    Ok(Json(json!({ "member": member })))
}

async fn list_saved(State(state): State<ApiState>, _auth: Authenticated) -> Json<Vec<Template>> {
    Json(state.templates.saved().await)
}

async fn save_template(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Json(template): Json<Template>,
) -> ApiResult<Json<Template>> {
    Ok(Json(state.templates.save_template(template).await?))
}

async fn delete_saved(State(state): State<ApiState>, _auth: Authenticated, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    if state.templates.delete_saved(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("template '{}'", id)))
    }
}

#[derive(Deserialize, Default)]
struct PullBody {
    #[serde(default)]
    strategy: Strategy,
}

async fn pull_saved(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Json(body): Json<PullBody>,
) -> ApiResult<Json<PullReport>> {
    Ok(Json(state.templates.pull_saved(body.strategy).await?))
}

async fn marketplace(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Query(filters): Query<TemplateFilters>,
) -> ApiResult<Json<Vec<Template>>> {
    Ok(Json(state.templates.marketplace(&filters).await?))
}

async fn team_templates(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Path(team): Path<String>,
) -> ApiResult<Json<Vec<Template>>> {
    Ok(Json(state.templates.team_templates(&team).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShareBody {
    template_id: Uuid,
}

async fn share_template(
    State(state): State<ApiState>,
    _auth: Authenticated,
    Path(team): Path<String>,
    Json(body): Json<ShareBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let request_id = state.templates.share_with_team(&team, body.template_id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "requestId": request_id }))))
}

async fn sync_status(State(state): State<ApiState>, _auth: Authenticated) -> Json<SyncStatus> {
    Json(state.sync_queue.status().await)
}

async fn run_sync(
    State(state): State<ApiState>,
    _auth: Authenticated,
) -> ApiResult<Json<Option<SyncReport>>> {
    Ok(Json(state.sync_queue.sync_queued_requests().await?))
}

async fn clear_sync_queue(State(state): State<ApiState>, _auth: Authenticated) -> ApiResult<StatusCode> {
    state.sync_queue.clear().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Frames pushed to WebSocket clients.
#[derive(Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
enum ServerMessage<'a> {
    State(&'a ShowState),
    Event(&'a UiEvent),
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: ApiState) {
    let mut state_rx = state.state_rx.clone();
    let mut event_rx = state.event_tx.subscribe();

    log::info!("New WebSocket client connected.");

    let initial = state_rx.borrow_and_update().clone();
    if !send_frame(&mut socket, &ServerMessage::State(&initial)).await {
        return;
    }

    loop {
        tokio::select! {
            Ok(_) = state_rx.changed() => {
                let new_state = state_rx.borrow_and_update().clone();
                if !send_frame(&mut socket, &ServerMessage::State(&new_state)).await {
                    break;
                }
            }

            result = event_rx.recv() => match result {
                Ok(event) => {
                    if !send_frame(&mut socket, &ServerMessage::Event(&event)).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("WebSocket client lagged behind by {} events.", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            Some(Ok(msg)) = socket.recv() => {
                if let Message::Text(text) = msg {
                    match serde_json::from_str::<ControllerCommand>(&text) {
                        Ok(command) => {
                            if state.controller_tx.send(command).await.is_err() {
                                log::error!("Failed to send command to CueController.");
                                break;
                            }
                        }
                        Err(e) => log::error!("Invalid command received: {}", e),
                    }
                } else if let Message::Close(_) = msg {
                    log::info!("WebSocket client sent close message.");
                    break;
                }
            }

            else => break,
        }
    }
}

/// Returns false once the client is gone.
async fn send_frame(socket: &mut WebSocket, message: &ServerMessage<'_>) -> bool {
    let payload = match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(e) => {
            log::error!("Failed to serialize WebSocket frame: {}", e);
            return true;
        }
    };
    if socket.send(Message::Text(payload.into())).await.is_err() {
        log::info!("WebSocket client disconnected (send error).");
        return false;
    }
    true
}

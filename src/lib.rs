use std::{path::PathBuf, sync::Arc};

use tokio::sync::{broadcast, mpsc, watch};

use crate::{
    config::BackendConfig,
    controller::{ControllerCommand, CueController, ShowState},
    event::UiEvent,
    executor::{Executor, ExecutorCommand, ExecutorEvent},
    manager::{ShowModelHandle, ShowModelManager},
    preferences::SettingsManager,
    rbac::{
        client::{HttpRbacClient, RbacApi},
        matrix::{MatrixController, RolePermissions, UserRoles},
    },
    session::{AuthService, SessionManager},
    storage::LocalStore,
    sync::{
        client::{ApiClient, ReqwestTransport, Transport},
        queue::SyncQueue,
    },
    templates::TemplateLibrary,
    theme::ThemeManager,
};

pub mod apiserver;
pub mod config;
pub mod controller;
pub mod event;
pub mod executor;
pub mod manager;
pub mod model;
pub mod preferences;
pub mod rbac;
pub mod session;
pub mod storage;
pub mod sync;
pub mod templates;
pub mod theme;
pub mod timer;

#[derive(Clone)]
pub struct BackendHandle {
    pub model_manager: ShowModelManager,
    pub model_handle: ShowModelHandle,

    pub controller_tx: mpsc::Sender<ControllerCommand>,
    pub state_rx: watch::Receiver<ShowState>,
    pub event_tx: broadcast::Sender<UiEvent>,

    pub settings: SettingsManager,
    pub theme: ThemeManager,
    pub session: SessionManager,
    pub auth: AuthService,
    pub sync_queue: SyncQueue,
    pub templates: TemplateLibrary,
    pub rbac: Arc<dyn RbacApi>,
    pub role_permissions: MatrixController,
    pub user_roles: MatrixController,

    pub show_path: PathBuf,
}

pub async fn start_backend(config: &BackendConfig) -> Result<BackendHandle, anyhow::Error> {
    let store = LocalStore::open(&config.store_path()).await?;
    let transport = Arc::new(ReqwestTransport::new(config.request_timeout)?);

    let backend = assemble(config, store, transport).await;
    backend.sync_queue.start_background_sync(config.sync_interval);

    if tokio::fs::try_exists(&backend.show_path).await.unwrap_or(false) {
        if let Err(e) = backend.model_manager.load_from_file(&backend.show_path).await {
            log::error!("Failed to load show from {}: {:?}", backend.show_path.display(), e);
        }
    }

    log::info!("Backend started (data dir {}).", config.data_dir.display());
    Ok(backend)
}

/// Wires every service onto one store and transport and spawns the cue
/// controller and executor tasks.
pub(crate) async fn assemble(config: &BackendConfig, store: LocalStore, transport: Arc<dyn Transport>) -> BackendHandle {
    let (controller_tx, controller_rx) = mpsc::channel::<ControllerCommand>(32);
    let (exec_tx, exec_rx) = mpsc::channel::<ExecutorCommand>(32);
    let (executor_event_tx, executor_event_rx) = mpsc::channel::<ExecutorEvent>(32);
    let (state_tx, state_rx) = watch::channel::<ShowState>(ShowState::default());
    let (event_tx, _) = broadcast::channel::<UiEvent>(64);

    let session = SessionManager::new(store.clone(), event_tx.clone());
    session.load().await;

    let client = ApiClient::new(transport, config.api_base_url.clone(), session.clone(), config.retry);

    let theme = ThemeManager::new(store.clone(), event_tx.clone());
    theme.load().await;
    let settings = SettingsManager::new(store.clone(), event_tx.clone());
    settings.load().await;

    let sync_queue = SyncQueue::new(client.clone(), store.clone(), event_tx.clone());
    sync_queue.load().await;
    let templates = TemplateLibrary::new(client.clone(), store, sync_queue.clone());

    let rbac: Arc<dyn RbacApi> = Arc::new(HttpRbacClient::new(client.clone()));
    let role_permissions = MatrixController::new(Arc::new(RolePermissions::new(rbac.clone())), event_tx.clone());
    let user_roles = MatrixController::new(Arc::new(UserRoles::new(rbac.clone())), event_tx.clone());

    let (model_manager, model_handle) = ShowModelManager::new(event_tx.clone());
    let controller = CueController::new(
        model_manager.clone(),
        exec_tx,
        controller_rx,
        executor_event_rx,
        event_tx.clone(),
        state_tx,
    );
    let executor = Executor::new(exec_rx, executor_event_tx);

    tokio::spawn(controller.run());
    tokio::spawn(executor.run());

    BackendHandle {
        model_manager,
        model_handle,
        controller_tx,
        state_rx,
        event_tx,
        settings,
        theme,
        session,
        auth: AuthService::new(client),
        sync_queue,
        templates,
        rbac,
        role_permissions,
        user_roles,
        show_path: config.show_path(),
    }
}

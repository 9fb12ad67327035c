use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use tokio::{
    sync::{RwLock, broadcast},
    time::Instant,
};
use crate::{
    event::UiEvent,
    rbac::{RbacError, client::RbacApi},
};

pub const FLASH_DURATION: Duration = Duration::from_millis(800);

/// Row id to the set of column ids it is related to.
pub type Matrix = BTreeMap<String, BTreeSet<String>>;

type Cell = (String, String);

/// A many-to-many relation edited as a matrix.
#[async_trait]
pub trait Relation: Send + Sync {
    fn name(&self) -> &'static str;
    async fn load(&self) -> Result<Matrix, RbacError>;
    async fn assign(&self, row: &str, col: &str) -> Result<(), RbacError>;
    async fn remove(&self, row: &str, col: &str) -> Result<(), RbacError>;
}

/// Roles (rows) to permissions (columns).
pub struct RolePermissions {
    api: Arc<dyn RbacApi>,
}

impl RolePermissions {
    pub fn new(api: Arc<dyn RbacApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Relation for RolePermissions {
    fn name(&self) -> &'static str {
        "role-permissions"
    }

    async fn load(&self) -> Result<Matrix, RbacError> {
        let mut matrix: Matrix = self
            .api
            .list_roles()
            .await?
            .into_iter()
            .map(|role| (role.id, BTreeSet::new()))
            .collect();
        for assignment in self.api.role_permissions().await? {
            matrix
                .entry(assignment.role_id)
                .or_default()
                .insert(assignment.permission_id);
        }
        Ok(matrix)
    }

    async fn assign(&self, row: &str, col: &str) -> Result<(), RbacError> {
        self.api.assign_permission(row, col).await
    }

    async fn remove(&self, row: &str, col: &str) -> Result<(), RbacError> {
        self.api.remove_permission(row, col).await
    }
}

/// Users (rows) to roles (columns).
pub struct UserRoles {
    api: Arc<dyn RbacApi>,
}

impl UserRoles {
    pub fn new(api: Arc<dyn RbacApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Relation for UserRoles {
    fn name(&self) -> &'static str {
        "user-roles"
    }

    async fn load(&self) -> Result<Matrix, RbacError> {
        let mut matrix = Matrix::new();
        for user in self.api.list_users().await? {
            let roles = self.api.user_roles(&user.id).await?;
            matrix.insert(user.id, roles.into_iter().map(|r| r.id).collect());
        }
        Ok(matrix)
    }

    async fn assign(&self, row: &str, col: &str) -> Result<(), RbacError> {
        self.api.assign_role(row, col).await
    }

    async fn remove(&self, row: &str, col: &str) -> Result<(), RbacError> {
        self.api.remove_role(row, col).await
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct CellRef {
    pub row_id: String,
    pub col_id: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatrixSnapshot {
    pub relation: String,
    pub matrix: Matrix,
    pub pending: Vec<CellRef>,
    pub flashing: Vec<CellRef>,
}

fn cell_ref((row_id, col_id): &Cell) -> CellRef {
    CellRef {
        row_id: row_id.clone(),
        col_id: col_id.clone(),
    }
}

/// Removes the cell from the pending set however the toggle ends.
struct PendingGuard {
    pending: Arc<Mutex<HashSet<Cell>>>,
    cell: Cell,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.cell);
        }
    }
}

/// Membership matrix that only changes after the backend has accepted the
/// change.
#[derive(Clone)]
pub struct MatrixController {
    relation: Arc<dyn Relation>,
    matrix: Arc<RwLock<Matrix>>,
    pending: Arc<Mutex<HashSet<Cell>>>,
    flashes: Arc<Mutex<HashMap<Cell, Instant>>>,
    event_tx: broadcast::Sender<UiEvent>,
}

impl MatrixController {
    pub fn new(relation: Arc<dyn Relation>, event_tx: broadcast::Sender<UiEvent>) -> Self {
        Self {
            relation,
            matrix: Arc::new(RwLock::new(Matrix::new())),
            pending: Arc::new(Mutex::new(HashSet::new())),
            flashes: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
        }
    }

    pub fn relation_name(&self) -> &'static str {
        self.relation.name()
    }

    pub async fn refresh(&self) -> Result<(), RbacError> {
        let matrix = self.relation.load().await?;
        log::debug!("Loaded {} matrix with {} rows", self.relation.name(), matrix.len());
        *self.matrix.write().await = matrix;
        Ok(())
    }

    pub async fn is_member(&self, row: &str, col: &str) -> bool {
        self.matrix
            .read()
            .await
            .get(row)
            .is_some_and(|cols| cols.contains(col))
    }

    /// Flips one membership. Returns the new state.
    pub async fn toggle(&self, row: &str, col: &str) -> Result<bool, RbacError> {
        let cell = (row.to_string(), col.to_string());
        {
            let mut pending = self.pending.lock().map_err(|_| RbacError::CellBusy)?;
            if !pending.insert(cell.clone()) {
                return Err(RbacError::CellBusy);
            }
        }
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            cell: cell.clone(),
        };

        let member = self.is_member(row, col).await;
        if member {
            self.relation.remove(row, col).await?;
        } else {
            self.relation.assign(row, col).await?;
        }

        {
            let mut matrix = self.matrix.write().await;
            let cols = matrix.entry(row.to_string()).or_default();
            if member {
                cols.remove(col);
            } else {
                cols.insert(col.to_string());
            }
        }
        if !member {
            if let Ok(mut flashes) = self.flashes.lock() {
                flashes.insert(cell, Instant::now());
            }
        }

        log::info!(
            "{}: {} {} -> {}",
            self.relation.name(),
            if member { "removed" } else { "assigned" },
            row,
            col
        );
        if self
            .event_tx
            .send(UiEvent::MembershipChanged {
                relation: self.relation.name().to_string(),
                row_id: row.to_string(),
                col_id: col.to_string(),
                member: !member,
            })
            .is_err()
        {
            log::trace!("No UI clients are listening to membership events.");
        }
        Ok(!member)
    }

    pub fn is_pending(&self, row: &str, col: &str) -> bool {
        self.pending
            .lock()
            .map(|pending| pending.contains(&(row.to_string(), col.to_string())))
            .unwrap_or(false)
    }

    pub fn is_flashing(&self, row: &str, col: &str) -> bool {
        self.flashes
            .lock()
            .map(|flashes| {
                flashes
                    .get(&(row.to_string(), col.to_string()))
                    .is_some_and(|at| at.elapsed() < FLASH_DURATION)
            })
            .unwrap_or(false)
    }

    pub async fn snapshot(&self) -> MatrixSnapshot {
        let matrix = self.matrix.read().await.clone();

        let mut pending: Vec<CellRef> = self
            .pending
            .lock()
            .map(|pending| pending.iter().map(cell_ref).collect())
            .unwrap_or_default();
        pending.sort();

        let mut flashing: Vec<CellRef> = self
            .flashes
            .lock()
            .map(|mut flashes| {
                flashes.retain(|_, at| at.elapsed() < FLASH_DURATION);
                flashes.keys().map(cell_ref).collect()
            })
            .unwrap_or_default();
        flashing.sort();

        MatrixSnapshot {
            relation: self.relation.name().to_string(),
            matrix,
            pending,
            flashing,
        }
    }
}

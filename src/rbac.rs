use thiserror::Error;

pub mod client;
pub mod matrix;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RbacError {
    /// Message from the admin backend, or the operation's default.
    #[error("{0}")]
    Api(String),
    #[error("a change to this cell is already in progress")]
    CellBusy,
}

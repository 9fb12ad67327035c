pub mod client;
pub mod conflict;
pub mod queue;
pub mod retry;

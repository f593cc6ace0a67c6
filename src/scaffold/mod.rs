//! Transactional creation of new ecosystem repositories

pub mod creator;
pub mod rollback;

pub use creator::{CreateRequest, CreationState, RepoCreator};
pub use rollback::{FileSnapshot, RollbackReport, capture_all};

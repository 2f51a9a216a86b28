//! Crate-level error type for the admin/HTTP boundary. Component modules
//! (`voice_engine`, `telephony`, `store`, `admin`) keep their own local
//! error enums, in the teacher's style — this only wraps them for callers
//! that cross module boundaries without caring which one failed.

use thiserror::Error;

use crate::admin::AdminError;
use crate::config::ConfigError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Admin(#[from] AdminError),
}

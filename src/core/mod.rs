pub mod entity;
pub mod error;
pub mod value;

pub use entity::{CONTEXT_ID_FIELD, Entity, ID_FIELD};
pub use error::{ConfigError, DecodeError, NetworkError, RefreshError, Result, StoreError, SyncError};
pub use value::Value;

//! traffic-engine library interface
//!
//! Client-side marketing attribution and analytics identity linking:
//! - [`classifier`]: landing URL + referrer → `(source, medium)`
//! - [`session`]: first-touch attribution store and session gates
//! - [`identity`]: identity-match payload and sink linking
//! - [`dispatcher`]: one-shot attribution delivery to the backend
//! - [`engine`]: event subscription tying the above together

pub mod attribution;
pub mod classifier;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod identity;
pub mod session;
pub mod sinks;
pub mod storage;

pub use crate::engine::{Engine, HandleReport};
pub use crate::error::{DispatchError, SinkError, StorageError};

//! Control-plane controllers reconciling `StorageBackendClaim`/`StorageBackendContent`
//! and `VolumeModifyClaim`/`VolumeModifyContent` custom resources against an
//! external storage provider over a gRPC driver interface.

pub mod backend;
pub mod config;
pub mod crd;
pub mod error;
pub mod modify;
pub mod provider;
pub mod runtime;
pub mod telemetry;

#[cfg(feature = "healthz")]
pub mod healthz;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use crate::error::{Error, Result};

use std::{fmt, io, path::PathBuf};

use file_lock::LockError;
use neutron_api::CloudError;
use thiserror::Error;

/// what a capacity guard counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// fixed ips on one shared port
    FixedIps,
    /// interfaces attached to one instance
    Interfaces,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::FixedIps => f.write_str("ips per network interface"),
            Resource::Interfaces => f.write_str("enis per instance"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid or incomplete configuration, or a cloud inventory that doesn't
    /// match it. Raised before any cloud mutation.
    #[error("configuration error: {0}")]
    Config(String),
    #[error("over max supported {resource}: {max}")]
    Capacity { resource: Resource, max: usize },
    #[error(transparent)]
    Cloud(#[from] CloudError),
    /// ledger and cloud disagree
    #[error("ledger and cloud diverged: {0}")]
    Divergence(String),
    #[error("port {port_id} doesn't have new fixed ip")]
    NoNewAddress { port_id: String },
    #[error("ledger error at {path}: {source}")]
    Ledger { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl StoreError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        StoreError::Config(msg.into())
    }

    pub fn is_capacity(&self) -> bool {
        matches!(self, StoreError::Capacity { .. })
    }

    pub fn is_config(&self) -> bool {
        matches!(self, StoreError::Config(_))
    }

    /// the local and cloud views no longer agree
    pub fn is_divergence(&self) -> bool {
        matches!(
            self,
            StoreError::Divergence(_) | StoreError::NoNewAddress { .. }
        )
    }

    pub fn is_cloud(&self) -> bool {
        matches!(self, StoreError::Cloud(_))
    }
}

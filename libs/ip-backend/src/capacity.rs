use tracing::warn;

use crate::{Resource, StoreError};

/// Checks a configured maximum the cloud doesn't enforce itself. Only
/// meaningful while the store lock is held, the count is read then acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityGuard {
    resource: Resource,
    max: usize,
}

impl CapacityGuard {
    pub fn fixed_ips(max: usize) -> Self {
        Self {
            resource: Resource::FixedIps,
            max,
        }
    }

    pub fn interfaces(max: usize) -> Self {
        Self {
            resource: Resource::Interfaces,
            max,
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// errors when `current` has already reached the maximum
    pub fn check(&self, current: usize) -> Result<(), StoreError> {
        if current >= self.max {
            warn!(resource = %self.resource, current, max = self.max, "capacity reached");
            return Err(StoreError::Capacity {
                resource: self.resource,
                max: self.max,
            });
        }
        Ok(())
    }
}

//! Host memory introspection.
//!
//! Every probe fails closed: if memory cannot be read the answer is 0 MB,
//! which denies admission instead of admitting blindly.

use async_trait::async_trait;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tracing::warn;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[async_trait]
pub trait MemoryProbe: Send + Sync {
    async fn available_mb(&self) -> u64;
    async fn total_mb(&self) -> u64;
}

/// Reads host RAM through `sysinfo`, off the async executor.
#[derive(Debug, Default, Clone)]
pub struct SystemMemory;

#[derive(Clone, Copy)]
enum Reading {
    Available,
    Total,
}

impl SystemMemory {
    pub fn new() -> Self {
        Self
    }

    async fn read(&self, which: Reading) -> u64 {
        let res = tokio::task::spawn_blocking(move || {
            let mut sys = System::new_with_specifics(
                RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
            );
            sys.refresh_memory();
            match which {
                Reading::Available => sys.available_memory(),
                Reading::Total => sys.total_memory(),
            }
        })
        .await;

        match res {
            Ok(bytes) => bytes / BYTES_PER_MB,
            Err(e) => {
                warn!(error=%e, "memory: probe task failed, reporting 0 MB");
                0
            }
        }
    }
}

#[async_trait]
impl MemoryProbe for SystemMemory {
    async fn available_mb(&self) -> u64 {
        self.read(Reading::Available).await
    }

    async fn total_mb(&self) -> u64 {
        self.read(Reading::Total).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_system_memory_is_consistent() {
        let probe = SystemMemory::new();
        let total = probe.total_mb().await;
        let available = probe.available_mb().await;
        assert!(available <= total || total == 0);
    }
}

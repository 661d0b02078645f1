//! Process memory sampling and reclaim pauses.

use std::sync::Mutex;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Samples process RSS after each batch and forces a reclaim pause when it
/// exceeds the configured ceiling.
///
/// The bounded pipeline is the primary memory cap; this guard is the
/// backstop for transform-side amplification on large documents. The pause
/// trades throughput for a bounded footprint.
pub struct MemoryGuard {
    ceiling_bytes: u64,
    system: Mutex<System>,
    pid: Pid,
}

impl MemoryGuard {
    pub fn new(ceiling_bytes: u64) -> Self {
        Self {
            ceiling_bytes,
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    /// Current resident set size in bytes.
    pub fn current_rss(&self) -> u64 {
        let mut system = self.system.lock().unwrap();
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        system.process(self.pid).map(|p| p.memory()).unwrap_or(0)
    }

    /// Sample memory; above the ceiling, yield to the runtime until readings
    /// settle or the retry budget runs out. Returns whether a pause happened.
    pub async fn check_and_reclaim(&self) -> bool {
        let rss = self.current_rss();
        if rss <= self.ceiling_bytes {
            debug!("memory check: rss={} ceiling={}", rss, self.ceiling_bytes);
            return false;
        }

        warn!(
            "memory ceiling exceeded (rss={} > ceiling={}), pausing for reclaim",
            rss, self.ceiling_bytes
        );

        // Give in-flight buffers a chance to drop and the allocator a chance
        // to return pages before the next batch is staged.
        for _ in 0..5 {
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            if self.current_rss() <= self.ceiling_bytes {
                break;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_rss_nonzero_for_running_process() {
        let guard = MemoryGuard::new(u64::MAX);
        assert!(guard.current_rss() > 0);
    }

    #[tokio::test]
    async fn test_no_reclaim_under_generous_ceiling() {
        let guard = MemoryGuard::new(u64::MAX);
        assert!(!guard.check_and_reclaim().await);
    }

    #[tokio::test]
    async fn test_reclaim_pause_reported_over_tiny_ceiling() {
        let guard = MemoryGuard::new(1);
        assert!(guard.check_and_reclaim().await);
    }
}

//! 垃圾过期清理与磁盘对账的后台任务。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{SCAN_SWEEP_INTERVAL_SECS, TRASH_SWEEP_INTERVAL_SECS};
use crate::engine::MatterEngine;
use crate::scan::Reconciler;

/// 启动后台任务（回收站过期清理与磁盘对账扫描）。
pub fn spawn_background_tasks(
    engine: Arc<MatterEngine>,
    reconciler: Arc<Reconciler>,
    scan_enabled: bool,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TRASH_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = engine.clean_expired_deleted_matters().await {
                warn!(error = %err, "trash expiry sweep failed");
            }
        }
    });

    if !scan_enabled {
        info!("reconciliation sweep disabled");
        return;
    }

    // Overlapping triggers are skipped, never queued; the CAS is the guard.
    let scan_running = Arc::new(AtomicBool::new(false));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SCAN_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if scan_running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                info!("reconciliation sweep still running, skipping this trigger");
                continue;
            }
            if let Err(err) = reconciler.reconcile_all().await {
                warn!(error = %err, "reconciliation sweep failed");
            }
            scan_running.store(false, Ordering::Release);
        }
    });
}

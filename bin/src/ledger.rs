use std::path::Path;

use anyhow::{Context, Result};
use file_lock::FileLock;
use ip_backend::{Ledger, LedgerEntry};
use tracing::{info, warn};

pub fn list(dir: &Path) -> Result<Vec<LedgerEntry>> {
    Ledger::new(dir)
        .entries()
        .with_context(|| format!("failed to read ledger at {}", dir.display()))
}

/// Removes entries owned by containers outside `keep`, holding the store
/// lock so no plugin invocation races the scan. Returns what was (or would
/// be) removed.
pub async fn prune(dir: &Path, keep: &[String], dry_run: bool) -> Result<Vec<LedgerEntry>> {
    let mut lock = FileLock::acquire_async(dir.to_path_buf())
        .await
        .context("failed to lock ledger")?;
    let ledger = Ledger::new(dir);
    let stale = ledger
        .entries()?
        .into_iter()
        .filter(|entry| !keep.contains(&entry.container_id))
        .collect::<Vec<_>>();

    if !dry_run {
        for entry in &stale {
            ledger.remove(entry)?;
            info!(address = %entry.address, container_id = %entry.container_id, "pruned ledger entry");
        }
    }
    if !stale.is_empty() {
        warn!(
            count = stale.len(),
            "stale ledger entries may still hold fixed ips on the host port"
        );
    }
    lock.release();
    Ok(stale)
}

use super::{ProgressSink, SyncError, Syncer};
use crate::context::CancelContext;
use crate::supervisor::update::{ProcessConfig, ProcessId, UpdateType};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Syncer for logical role bindings: processes that exist only as an entry
/// in this launcher's books, with no OS child behind them.
///
/// Realizing desired state is bookkeeping, so every call succeeds
/// immediately. It backs the launcher binary when no real syncer is wired in
/// and doubles as a base for smoke tests.
#[derive(Debug, Default)]
pub struct InertSyncer {
    bound: Mutex<HashMap<ProcessId, ProcessConfig>>,
}

impl InertSyncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently bound roles.
    pub fn bound_count(&self) -> usize {
        self.bound.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Syncer for InertSyncer {
    fn sync_process(
        &self,
        _ctx: &CancelContext,
        update_type: UpdateType,
        id: &ProcessId,
        config: &ProcessConfig,
    ) -> Result<(), SyncError> {
        let mut bound = self.bound.lock().unwrap_or_else(|e| e.into_inner());
        if bound.insert(id.clone(), config.clone()).is_none() {
            info!(%id, ?update_type, category = %config.category, "bound role");
        }
        Ok(())
    }

    fn sync_terminating(
        &self,
        _ctx: &CancelContext,
        id: &ProcessId,
        _config: &ProcessConfig,
        _grace_period: Duration,
        progress: &ProgressSink,
    ) -> Result<(), SyncError> {
        progress.report("releasing role binding");
        self.bound.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
        Ok(())
    }

    fn sync_terminated(
        &self,
        _ctx: &CancelContext,
        id: &ProcessId,
        _config: &ProcessConfig,
    ) -> Result<(), SyncError> {
        info!(%id, "released role");
        Ok(())
    }
}

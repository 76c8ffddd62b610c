use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use scanline_model::{ScanId, ScanSnapshot, WorkflowGraph};

use crate::report::ReportArchive;
use crate::state::ScanState;

/// Process-wide map of live scans and their workflow graphs.
///
/// Cheap to clone; every clone shares the same maps. Locks are only held for
/// short synchronous sections and never across an `.await`.
#[derive(Clone)]
pub struct ScanRegistry {
    inner: Arc<ScanRegistryInner>,
}

struct ScanRegistryInner {
    scans: RwLock<HashMap<ScanId, ScanState>>,
    graphs: RwLock<HashMap<ScanId, WorkflowGraph>>,
    archive: Option<ReportArchive>,
}

impl fmt::Debug for ScanRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scans = self.inner.scans.try_read().map(|guard| guard.len());
        let graphs = self.inner.graphs.try_read().map(|guard| guard.len());
        f.debug_struct("ScanRegistry")
            .field("live_scans", &scans)
            .field("graphs", &graphs)
            .field(
                "runs_dir",
                &self.inner.archive.as_ref().map(ReportArchive::runs_dir),
            )
            .finish()
    }
}

impl Default for ScanRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ScanRegistry {
    /// `archive` is consulted for scans that are not live.
    pub fn new(archive: Option<ReportArchive>) -> Self {
        Self {
            inner: Arc::new(ScanRegistryInner {
                scans: RwLock::new(HashMap::new()),
                graphs: RwLock::new(HashMap::new()),
                archive,
            }),
        }
    }

    pub fn archive(&self) -> Option<&ReportArchive> {
        self.inner.archive.as_ref()
    }

    pub(crate) fn insert(&self, state: ScanState) {
        self.inner.scans.write().insert(state.scan_id.clone(), state);
    }

    pub fn contains(&self, scan_id: &ScanId) -> bool {
        self.inner.scans.read().contains_key(scan_id)
    }

    pub fn live_ids(&self) -> Vec<ScanId> {
        self.inner.scans.read().keys().cloned().collect()
    }

    pub fn with_scan<R>(
        &self,
        scan_id: &ScanId,
        f: impl FnOnce(&ScanState) -> R,
    ) -> Option<R> {
        self.inner.scans.read().get(scan_id).map(f)
    }

    pub(crate) fn with_scan_mut<R>(
        &self,
        scan_id: &ScanId,
        f: impl FnOnce(&mut ScanState) -> R,
    ) -> Option<R> {
        self.inner.scans.write().get_mut(scan_id).map(f)
    }

    /// Runs `f` on the scan's graph, creating an empty one first if needed.
    pub(crate) fn with_graph_mut<R>(
        &self,
        scan_id: &ScanId,
        f: impl FnOnce(&mut WorkflowGraph) -> R,
    ) -> R {
        let mut graphs = self.inner.graphs.write();
        let graph = graphs
            .entry(scan_id.clone())
            .or_insert_with(|| WorkflowGraph::new(scan_id.clone()));
        f(graph)
    }

    pub fn with_graph<R>(
        &self,
        scan_id: &ScanId,
        f: impl FnOnce(&WorkflowGraph) -> R,
    ) -> Option<R> {
        self.inner.graphs.read().get(scan_id).map(f)
    }

    pub fn graph(&self, scan_id: &ScanId) -> Option<WorkflowGraph> {
        self.with_graph(scan_id, WorkflowGraph::clone)
    }

    /// Drops the in-memory graph. Returns whether one existed.
    pub fn clear_graph(&self, scan_id: &ScanId) -> bool {
        self.inner.graphs.write().remove(scan_id).is_some()
    }

    pub fn live_snapshot(&self, scan_id: &ScanId) -> Option<ScanSnapshot> {
        self.with_scan(scan_id, ScanState::snapshot)
    }

    /// Live snapshot, or one reconstructed from the report archive.
    pub async fn snapshot(&self, scan_id: &ScanId) -> Option<ScanSnapshot> {
        if let Some(snapshot) = self.live_snapshot(scan_id) {
            return Some(snapshot);
        }
        self.archive()?.load(scan_id).await
    }

    /// Live scans plus archived runs that are not live, newest first.
    pub async fn list(&self) -> Vec<ScanSnapshot> {
        let mut snapshots: Vec<ScanSnapshot> = self
            .inner
            .scans
            .read()
            .values()
            .map(ScanState::snapshot)
            .collect();

        if let Some(archive) = self.archive() {
            for snapshot in archive.list().await {
                if !self.contains(&snapshot.scan_id) {
                    snapshots.push(snapshot);
                }
            }
        }

        snapshots.sort_by(|a, b| {
            let a = a.started_at.or(a.created_at);
            let b = b.started_at.or(b.created_at);
            b.cmp(&a)
        });
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use scanline_model::{ScanConfig, ScanStatus};

    fn state(started_minutes_ago: i64) -> ScanState {
        let mut state =
            ScanState::new(ScanId::new(), ScanConfig::new("openai", "gpt-4"));
        state.started_at = Some(Utc::now() - Duration::minutes(started_minutes_ago));
        state
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let registry = ScanRegistry::default();
        let old = state(30);
        let new = state(1);
        let old_id = old.scan_id.clone();
        let new_id = new.scan_id.clone();
        registry.insert(old);
        registry.insert(new);

        let ids: Vec<_> = registry.list().await.into_iter().map(|s| s.scan_id).collect();
        assert_eq!(ids, vec![new_id, old_id]);
    }

    #[test]
    fn mutations_are_visible_through_clones() {
        let registry = ScanRegistry::default();
        let handle = registry.clone();
        let scan = state(0);
        let id = scan.scan_id.clone();
        registry.insert(scan);

        handle.with_scan_mut(&id, |state| state.status = ScanStatus::Running);
        assert_eq!(
            registry.live_snapshot(&id).map(|s| s.status),
            Some(ScanStatus::Running)
        );
    }

    #[test]
    fn graphs_are_created_on_demand_and_cleared() {
        let registry = ScanRegistry::default();
        let id = ScanId::from("scan");
        assert!(registry.graph(&id).is_none());
        registry.with_graph_mut(&id, |graph| graph.statistics.probes_executed += 1);
        assert_eq!(registry.graph(&id).unwrap().statistics.probes_executed, 1);
        assert!(registry.clear_graph(&id));
        assert!(!registry.clear_graph(&id));
        assert!(registry.graph(&id).is_none());
    }

    #[tokio::test]
    async fn unknown_scan_without_archive_is_absent() {
        let registry = ScanRegistry::default();
        assert!(registry.snapshot(&ScanId::from("missing")).await.is_none());
    }
}

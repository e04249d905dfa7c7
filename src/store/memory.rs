use super::{FamilyLink, StatRecord, StatRow, StatStore, StatSummary, StoreError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// In-memory store used by tests and local dry-run tooling. Tracks read and
/// write call counts so tests can assert that validate-only/dry-run paths
/// never reach the store.
#[derive(Debug, Default)]
pub struct MemoryStatStore {
    inner: Mutex<Inner>,
    read_calls: AtomicU64,
    write_calls: AtomicU64,
}

#[derive(Debug, Default)]
struct Inner {
    stats: BTreeMap<String, StatRecord>,
    rows: BTreeMap<String, StatRow>,
    summaries: BTreeMap<String, StatSummary>,
    links: BTreeMap<String, FamilyLink>,
}

impl MemoryStatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn stat_count(&self) -> usize {
        self.lock().stats.len()
    }

    pub fn row_count(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn summary_count(&self) -> usize {
        self.lock().summaries.len()
    }

    pub fn link_count(&self) -> usize {
        self.lock().links.len()
    }

    pub fn all_rows(&self) -> Vec<StatRow> {
        self.lock().rows.values().cloned().collect()
    }

    pub fn all_summaries(&self) -> Vec<StatSummary> {
        self.lock().summaries.values().cloned().collect()
    }

    pub fn all_links(&self) -> Vec<FamilyLink> {
        self.lock().links.values().cloned().collect()
    }

    /// Seed helpers for tests; these do not count as store traffic.
    pub fn seed_stat(&self, stat: StatRecord) {
        self.lock().stats.insert(stat.id.clone(), stat);
    }

    pub fn seed_rows(&self, rows: Vec<StatRow>) {
        let mut inner = self.lock();
        for row in rows {
            inner.rows.insert(row.id.clone(), row);
        }
    }

    pub fn seed_link(&self, link: FamilyLink) {
        self.lock().links.insert(link.id.clone(), link);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl StatStore for MemoryStatStore {
    fn find_stats_by_external_ids(&self, ids: &[String]) -> Result<Vec<StatRecord>, StoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        Ok(inner
            .stats
            .values()
            .filter(|stat| ids.contains(&stat.external_id))
            .cloned()
            .collect())
    }

    fn find_stats_by_names(&self, names: &[String]) -> Result<Vec<StatRecord>, StoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        Ok(inner
            .stats
            .values()
            .filter(|stat| names.contains(&stat.name))
            .cloned()
            .collect())
    }

    fn get_stat(&self, stat_id: &str) -> Result<Option<StatRecord>, StoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().stats.get(stat_id).cloned())
    }

    fn rows_for_stat(&self, stat_id: &str) -> Result<Vec<StatRow>, StoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        Ok(inner
            .rows
            .values()
            .filter(|row| row.stat_id == stat_id)
            .cloned()
            .collect())
    }

    fn create_stat(&self, stat: &StatRecord) -> Result<(), StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.lock().stats.insert(stat.id.clone(), stat.clone());
        Ok(())
    }

    fn merge_rows(&self, rows: &[StatRow]) -> Result<(), StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        for row in rows {
            inner.rows.insert(row.id.clone(), row.clone());
        }
        Ok(())
    }

    fn upsert_summaries(&self, summaries: &[StatSummary]) -> Result<(), StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        for summary in summaries {
            inner.summaries.insert(summary.id.clone(), summary.clone());
        }
        Ok(())
    }

    fn existing_family_links(
        &self,
        parent_id: &str,
        child_ids: &[String],
    ) -> Result<Vec<FamilyLink>, StoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        Ok(inner
            .links
            .values()
            .filter(|link| link.parent_id == parent_id && child_ids.contains(&link.child_id))
            .cloned()
            .collect())
    }

    fn insert_family_links(&self, links: &[FamilyLink]) -> Result<(), StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        for link in links {
            inner.links.insert(link.id.clone(), link.clone());
        }
        Ok(())
    }
}

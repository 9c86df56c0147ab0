//! Shared in-memory metric sample history.
//!
//! The `MetricSampleStore` holds a bounded, time-ordered window of
//! samples per (target, metric) series. It stores and retrieves; it
//! never interprets values. The replica engine, the resource
//! recommender, and any external consumer share one clone of it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{MetricId, MetricSample, TargetId};

/// Default retention for sample history (seconds).
pub const DEFAULT_RETENTION_SECS: u64 = 600;

type SeriesMap = HashMap<TargetId, HashMap<MetricId, VecDeque<MetricSample>>>;

/// Shared store of recent metric samples.
#[derive(Clone)]
pub struct MetricSampleStore {
    series: Arc<RwLock<SeriesMap>>,
    retention_secs: u64,
}

impl Default for MetricSampleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSampleStore {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION_SECS)
    }

    pub fn with_retention(retention_secs: u64) -> Self {
        Self {
            series: Arc::new(RwLock::new(HashMap::new())),
            retention_secs,
        }
    }

    /// Record one sample, keeping the series ordered by timestamp and
    /// pruned to the retention window.
    pub async fn record(&self, sample: MetricSample) {
        let mut series = self.series.write().await;
        let queue = series
            .entry(sample.target_id.clone())
            .or_default()
            .entry(sample.metric_id.clone())
            .or_default();

        // Samples almost always arrive in order; walk back for the rare
        // late arrival so the series stays sorted.
        let mut idx = queue.len();
        while idx > 0 && queue[idx - 1].at > sample.at {
            idx -= 1;
        }
        queue.insert(idx, sample);

        if let Some(newest) = queue.back().map(|s| s.at) {
            let cutoff = newest.saturating_sub(self.retention_secs);
            while queue.front().is_some_and(|s| s.at < cutoff) {
                queue.pop_front();
            }
        }
    }

    /// Record a batch of samples (one fetch's worth).
    pub async fn record_batch(&self, samples: Vec<MetricSample>) {
        for sample in samples {
            self.record(sample).await;
        }
    }

    /// Most recent sample for a series.
    pub async fn latest(&self, target_id: &str, metric_id: &str) -> Option<MetricSample> {
        let series = self.series.read().await;
        series
            .get(target_id)
            .and_then(|m| m.get(metric_id))
            .and_then(|q| q.back().cloned())
    }

    /// Samples no older than `staleness_secs` relative to `now`.
    pub async fn fresh(
        &self,
        target_id: &str,
        metric_id: &str,
        now: u64,
        staleness_secs: u64,
    ) -> Vec<MetricSample> {
        self.window(target_id, metric_id, now.saturating_sub(staleness_secs))
            .await
    }

    /// Samples observed at or after `since`.
    pub async fn window(&self, target_id: &str, metric_id: &str, since: u64) -> Vec<MetricSample> {
        let series = self.series.read().await;
        series
            .get(target_id)
            .and_then(|m| m.get(metric_id))
            .map(|q| q.iter().filter(|s| s.at >= since).cloned().collect())
            .unwrap_or_default()
    }

    /// Drop the history of one metric series.
    pub async fn reset_metric(&self, target_id: &str, metric_id: &str) {
        let mut series = self.series.write().await;
        if let Some(metrics) = series.get_mut(target_id) {
            metrics.remove(metric_id);
            if metrics.is_empty() {
                series.remove(target_id);
            }
        }
        debug!(%target_id, %metric_id, "metric history reset");
    }

    /// Drop every series belonging to a target.
    pub async fn reset_target(&self, target_id: &str) {
        let mut series = self.series.write().await;
        series.remove(target_id);
        debug!(%target_id, "target history reset");
    }

    /// Target ids with at least one recorded series.
    pub async fn tracked_targets(&self) -> Vec<TargetId> {
        let series = self.series.read().await;
        series.keys().cloned().collect()
    }
}

//! Control loop driver — one evaluation loop per registered target.
//!
//! Each registered target gets its own spawned task that ticks on the
//! configured interval: read the target from the cluster view, fetch
//! every configured metric under a bounded timeout, evaluate, publish
//! the decision. Loops are independent across targets; within a target
//! ticks are strictly sequential.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use setpoint_core::time::epoch_secs;
use setpoint_core::{ClusterView, MetricSampleStore, MetricsSource, ScalingDecision, TargetSpec};

use crate::error::EngineResult;
use crate::evaluator::{FetchedMetric, TargetEvaluator, changed_metric_keys};
use crate::settings::EngineSettings;

/// Callback invoked with every decision a loop emits.
///
/// The orchestrator applies the decision; the engine never scales
/// anything itself.
pub type DecisionCallback = Arc<dyn Fn(ScalingDecision) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Per-target loop state.
struct LoopSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Everything a target loop needs, cloned out of the driver.
struct LoopCtx {
    metrics: Arc<dyn MetricsSource>,
    view: Arc<dyn ClusterView>,
    store: MetricSampleStore,
    settings: EngineSettings,
    decisions: Arc<RwLock<HashMap<String, ScalingDecision>>>,
    callback: Option<DecisionCallback>,
}

/// Drives one evaluation loop per registered target.
pub struct ControlLoopDriver {
    metrics: Arc<dyn MetricsSource>,
    view: Arc<dyn ClusterView>,
    store: MetricSampleStore,
    settings: EngineSettings,
    /// Active loops: target_id → slot.
    loops: Arc<RwLock<HashMap<String, LoopSlot>>>,
    /// Attached specs, kept for spec-change diffing.
    specs: Arc<RwLock<HashMap<String, TargetSpec>>>,
    /// Latest decision per target.
    decisions: Arc<RwLock<HashMap<String, ScalingDecision>>>,
    on_decision: Option<DecisionCallback>,
}

impl ControlLoopDriver {
    pub fn new(
        metrics: Arc<dyn MetricsSource>,
        view: Arc<dyn ClusterView>,
        store: MetricSampleStore,
        settings: EngineSettings,
    ) -> EngineResult<Self> {
        settings.validate()?;
        Ok(Self {
            metrics,
            view,
            store,
            settings,
            loops: Arc::new(RwLock::new(HashMap::new())),
            specs: Arc::new(RwLock::new(HashMap::new())),
            decisions: Arc::new(RwLock::new(HashMap::new())),
            on_decision: None,
        })
    }

    /// Set the callback invoked with every emitted decision.
    pub fn with_decision_callback(mut self, callback: DecisionCallback) -> Self {
        self.on_decision = Some(callback);
        self
    }

    /// Start (or restart) the loop for a target.
    ///
    /// Re-registering an id is a spec change: the old loop stops,
    /// histories of changed metrics reset, and a fresh loop takes over.
    pub async fn register(&self, spec: TargetSpec) -> EngineResult<()> {
        spec.validate()?;
        let target_id = spec.id.clone();

        let changed = {
            let mut specs = self.specs.write().await;
            let changed = specs
                .get(&target_id)
                .map(|old| changed_metric_keys(old, &spec))
                .unwrap_or_default();
            specs.insert(target_id.clone(), spec.clone());
            changed
        };
        for key in &changed {
            self.store.reset_metric(&target_id, key).await;
        }

        let evaluator = TargetEvaluator::new(spec, self.settings.clone())?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = LoopCtx {
            metrics: self.metrics.clone(),
            view: self.view.clone(),
            store: self.store.clone(),
            settings: self.settings.clone(),
            decisions: self.decisions.clone(),
            callback: self.on_decision.clone(),
        };
        let handle = tokio::spawn(async move {
            run_target_loop(evaluator, ctx, shutdown_rx).await;
        });

        let mut loops = self.loops.write().await;
        if let Some(old) = loops.insert(
            target_id.clone(),
            LoopSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(target = %target_id, "target loop started");
        Ok(())
    }

    /// Stop a target's loop. No further decisions are emitted for it.
    pub async fn deregister(&self, target_id: &str) {
        self.specs.write().await.remove(target_id);
        let mut loops = self.loops.write().await;
        if let Some(slot) = loops.remove(target_id) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(target = %target_id, "target loop stopped");
        }
        drop(loops);
        self.store.reset_target(target_id).await;
        self.decisions.write().await.remove(target_id);
    }

    /// Latest decision for a target, once a tick has completed.
    pub async fn latest_decision(&self, target_id: &str) -> Option<ScalingDecision> {
        let decisions = self.decisions.read().await;
        decisions.get(target_id).cloned()
    }

    /// Target ids with an active loop.
    pub async fn active_targets(&self) -> Vec<String> {
        let loops = self.loops.read().await;
        loops.keys().cloned().collect()
    }

    /// Stop every loop (graceful shutdown).
    pub async fn stop_all(&self) {
        let mut loops = self.loops.write().await;
        for (id, slot) in loops.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(target = %id, "target loop stopped");
        }
        info!("all target loops stopped");
    }
}

/// The evaluation loop for a single target.
async fn run_target_loop(
    mut evaluator: TargetEvaluator,
    ctx: LoopCtx,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = Duration::from_secs(ctx.settings.tick_interval_seconds);
    let target_id = evaluator.spec().id.clone();
    debug!(target = %target_id, interval_secs = interval.as_secs(), "target loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match tick_target(&mut evaluator, &ctx).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(target = %target_id, "target deleted, loop exiting");
                        break;
                    }
                    Err(e) => {
                        error!(target = %target_id, error = %e, "tick failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!(target = %target_id, "target loop shutting down");
                break;
            }
        }
    }
}

/// One tick: read the target, fetch metrics, evaluate, publish.
///
/// Returns `Ok(false)` when the target no longer exists.
async fn tick_target(evaluator: &mut TargetEvaluator, ctx: &LoopCtx) -> anyhow::Result<bool> {
    let spec = evaluator.spec().clone();

    let target = match ctx.view.target(&spec.id).await? {
        Some(t) => t,
        None => return Ok(false),
    };

    let now = epoch_secs();
    let timeout = Duration::from_secs(ctx.settings.fetch_timeout_seconds);
    let mut fetched: Vec<FetchedMetric> = Vec::with_capacity(spec.metrics.len());

    for metric in &spec.metrics {
        let batch = match tokio::time::timeout(timeout, ctx.metrics.samples(&spec.id, metric)).await
        {
            Ok(Ok(samples)) => Some(samples),
            Ok(Err(e)) => {
                warn!(
                    target = %spec.id,
                    metric = %metric.metric_key(),
                    error = %e,
                    "metric fetch failed"
                );
                None
            }
            Err(_) => {
                warn!(
                    target = %spec.id,
                    metric = %metric.metric_key(),
                    timeout_secs = timeout.as_secs(),
                    "metric fetch timed out"
                );
                None
            }
        };
        if let Some(samples) = &batch {
            ctx.store.record_batch(samples.clone()).await;
        }
        fetched.push(batch);
    }

    let decision = evaluator.evaluate(now, &target, &fetched);

    if decision.degraded {
        warn!(
            target = %decision.target_id,
            scale = decision.applied_scale,
            reason = %decision.reason,
            "no usable metric this tick"
        );
    } else if decision.applied_scale != target.current_scale {
        info!(
            target = %decision.target_id,
            from = target.current_scale,
            to = decision.applied_scale,
            proposed = decision.proposed_scale,
            reason = %decision.reason,
            "scaling decision"
        );
    } else {
        debug!(
            target = %decision.target_id,
            scale = decision.applied_scale,
            reason = %decision.reason,
            "holding scale"
        );
    }

    ctx.decisions
        .write()
        .await
        .insert(decision.target_id.clone(), decision.clone());

    if let Some(cb) = &ctx.callback {
        cb(decision).await;
    }
    Ok(true)
}

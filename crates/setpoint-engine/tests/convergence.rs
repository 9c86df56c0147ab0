//! Closed-loop convergence tests.
//!
//! Wires a `ControlLoopDriver` against a simulated cluster where the
//! per-instance utilization is a fixed total load divided by the
//! current scale. Applying each decision back into the cluster closes
//! the loop, so the driver should settle on the equilibrium scale and
//! hold there.

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use setpoint_core::sources::BoxFuture;
use setpoint_core::time::epoch_secs;
use setpoint_core::{
    Behavior, ClusterView, MetricSample, MetricSampleStore, MetricSpec, MetricTarget,
    MetricsSource, NodeGroup, NodeState, PendingPodSpec, ScaleDirection, ScalingDecision,
    ScalingTarget, TargetSpec,
};
use setpoint_engine::{ControlLoopDriver, DecisionCallback, EngineSettings};

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Initialize tracing subscriber for debug output in CI.
/// Controlled by `RUST_LOG` env var (e.g. `RUST_LOG=debug`).
/// Safe to call multiple times — only the first call takes effect.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Simulated cluster ────────────────────────────────────────────

/// A single mutable target shared between the view, the source, and
/// the decision callback.
struct SharedCluster {
    target: Mutex<ScalingTarget>,
}

impl SharedCluster {
    fn starting_at(current: u32, min: u32, max: u32) -> Arc<Self> {
        Arc::new(Self {
            target: Mutex::new(ScalingTarget {
                id: "default/api".to_string(),
                min_scale: min,
                max_scale: max,
                current_scale: current,
                desired_scale: current,
                last_scale_up_at: 0,
                last_scale_down_at: 0,
            }),
        })
    }

    fn current_scale(&self) -> u32 {
        self.target.lock().unwrap().current_scale
    }

    fn apply(&self, decision: &ScalingDecision) {
        let mut target = self.target.lock().unwrap();
        if decision.applied_scale != target.current_scale {
            match decision.direction {
                ScaleDirection::Up => target.last_scale_up_at = decision.at,
                ScaleDirection::Down => target.last_scale_down_at = decision.at,
                ScaleDirection::Hold => {}
            }
            target.current_scale = decision.applied_scale;
        }
        target.desired_scale = decision.applied_scale;
    }
}

impl ClusterView for SharedCluster {
    fn target<'a>(
        &'a self,
        _target_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<ScalingTarget>>> {
        let t = self.target.lock().unwrap().clone();
        Box::pin(async move { Ok(Some(t)) })
    }

    fn pending_pods(&self) -> BoxFuture<'_, anyhow::Result<Vec<PendingPodSpec>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn node_groups(&self) -> BoxFuture<'_, anyhow::Result<Vec<NodeGroup>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn nodes(&self) -> BoxFuture<'_, anyhow::Result<Vec<NodeState>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// Reports per-instance utilization as `total_load / current_scale`.
struct LoadSource {
    total_load: f64,
    cluster: Arc<SharedCluster>,
}

impl MetricsSource for LoadSource {
    fn samples<'a>(
        &'a self,
        target_id: &'a str,
        spec: &'a MetricSpec,
    ) -> BoxFuture<'a, anyhow::Result<Vec<MetricSample>>> {
        let current = self.cluster.current_scale().max(1);
        let per_instance = self.total_load / current as f64;
        let at = epoch_secs();
        let samples: Vec<MetricSample> = (0..current)
            .map(|_| MetricSample {
                metric_id: spec.metric_key(),
                target_id: target_id.to_string(),
                value: per_instance,
                at,
            })
            .collect();
        Box::pin(async move { Ok(samples) })
    }
}

/// Source whose fetches always fail.
struct BrokenSource;

impl MetricsSource for BrokenSource {
    fn samples<'a>(
        &'a self,
        _target_id: &'a str,
        _spec: &'a MetricSpec,
    ) -> BoxFuture<'a, anyhow::Result<Vec<MetricSample>>> {
        Box::pin(async { Err(anyhow::anyhow!("metrics backend unreachable")) })
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn cpu_spec(min: u32, max: u32) -> TargetSpec {
    TargetSpec {
        id: "default/api".to_string(),
        min_replicas: min,
        max_replicas: max,
        metrics: vec![MetricSpec::Resource {
            name: "cpu".to_string(),
            target: MetricTarget::Utilization {
                average_utilization: 50.0,
            },
        }],
        behavior: Behavior::default(),
    }
}

fn fast_settings() -> EngineSettings {
    EngineSettings {
        tick_interval_seconds: 1,
        ..Default::default()
    }
}

/// Callback that applies each decision to the cluster and appends it
/// to a shared log.
fn applying_callback(
    cluster: Arc<SharedCluster>,
    log: Arc<Mutex<Vec<ScalingDecision>>>,
) -> DecisionCallback {
    Arc::new(move |decision: ScalingDecision| {
        let cluster = cluster.clone();
        let log = log.clone();
        Box::pin(async move {
            cluster.apply(&decision);
            log.lock().unwrap().push(decision);
        })
    })
}

/// Poll until `pred` holds or the deadline passes.
async fn wait_for(deadline: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    pred()
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn loop_converges_to_equilibrium_and_holds() {
    init_tracing();

    // 300 load units against a 50% per-instance target: equilibrium 6.
    let cluster = SharedCluster::starting_at(2, 1, 20);
    let source = Arc::new(LoadSource {
        total_load: 300.0,
        cluster: cluster.clone(),
    });
    let log = Arc::new(Mutex::new(Vec::new()));

    let driver = ControlLoopDriver::new(
        source,
        cluster.clone(),
        MetricSampleStore::new(),
        fast_settings(),
    )
    .unwrap()
    .with_decision_callback(applying_callback(cluster.clone(), log.clone()));

    driver.register(cpu_spec(1, 20)).await.unwrap();

    let converged = wait_for(Duration::from_secs(10), || cluster.current_scale() == 6).await;
    assert!(converged, "never reached equilibrium scale 6");

    // A few more ticks at equilibrium must all hold.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(cluster.current_scale(), 6);
    let last = driver.latest_decision("default/api").await.unwrap();
    assert_eq!(last.applied_scale, 6);
    assert_eq!(last.direction, ScaleDirection::Hold);
    assert!(!last.degraded);

    driver.stop_all().await;
}

#[tokio::test]
async fn decisions_never_leave_the_scale_bounds() {
    init_tracing();

    // Equilibrium would be 6, but the target caps out at 4.
    let cluster = SharedCluster::starting_at(2, 1, 4);
    let source = Arc::new(LoadSource {
        total_load: 300.0,
        cluster: cluster.clone(),
    });
    let log = Arc::new(Mutex::new(Vec::new()));

    let driver = ControlLoopDriver::new(
        source,
        cluster.clone(),
        MetricSampleStore::new(),
        fast_settings(),
    )
    .unwrap()
    .with_decision_callback(applying_callback(cluster.clone(), log.clone()));

    driver.register(cpu_spec(1, 4)).await.unwrap();

    let capped = wait_for(Duration::from_secs(10), || cluster.current_scale() == 4).await;
    assert!(capped, "never reached the max bound");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let decisions = log.lock().unwrap();
    assert!(!decisions.is_empty());
    for decision in decisions.iter() {
        assert!(
            (1..=4).contains(&decision.applied_scale),
            "decision {} left the bounds",
            decision.applied_scale
        );
    }
    drop(decisions);

    driver.stop_all().await;
}

#[tokio::test]
async fn failing_source_holds_and_flags_degraded() {
    init_tracing();

    let cluster = SharedCluster::starting_at(3, 1, 10);
    let log = Arc::new(Mutex::new(Vec::new()));

    let driver = ControlLoopDriver::new(
        Arc::new(BrokenSource),
        cluster.clone(),
        MetricSampleStore::new(),
        fast_settings(),
    )
    .unwrap()
    .with_decision_callback(applying_callback(cluster.clone(), log.clone()));

    driver.register(cpu_spec(1, 10)).await.unwrap();

    let decided = wait_for(Duration::from_secs(10), || {
        !log.lock().unwrap().is_empty()
    })
    .await;
    assert!(decided, "no decision emitted");

    let decisions = log.lock().unwrap();
    let first = &decisions[0];
    assert!(first.degraded);
    assert_eq!(first.applied_scale, 3);
    assert_eq!(first.direction, ScaleDirection::Hold);
    assert!(first.reason.contains("no usable metric"));
    drop(decisions);
    assert_eq!(cluster.current_scale(), 3);

    driver.stop_all().await;
}

#[tokio::test]
async fn deregister_stops_decision_emission() {
    init_tracing();

    let cluster = SharedCluster::starting_at(2, 1, 20);
    let source = Arc::new(LoadSource {
        total_load: 300.0,
        cluster: cluster.clone(),
    });
    let log = Arc::new(Mutex::new(Vec::new()));

    let driver = ControlLoopDriver::new(
        source,
        cluster.clone(),
        MetricSampleStore::new(),
        fast_settings(),
    )
    .unwrap()
    .with_decision_callback(applying_callback(cluster.clone(), log.clone()));

    driver.register(cpu_spec(1, 20)).await.unwrap();
    let decided = wait_for(Duration::from_secs(10), || {
        !log.lock().unwrap().is_empty()
    })
    .await;
    assert!(decided, "no decision emitted before deregister");

    driver.deregister("default/api").await;
    assert!(driver.active_targets().await.is_empty());
    assert!(driver.latest_decision("default/api").await.is_none());

    // Let any in-flight tick drain, then confirm the stream is quiet.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let settled = log.lock().unwrap().len();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(log.lock().unwrap().len(), settled);
}

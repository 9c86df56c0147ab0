//! Per-container resource recommendation.
//!
//! Each tracked container keeps a pair of decaying histograms (CPU
//! millicores, memory bytes). Recommendations are percentile reads
//! over those histograms, clamped into the container's policy bounds.
//! How a recommendation takes effect is the caller's business; the
//! update mode only says what the caller is allowed to do with it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tracing::{debug, info};

use setpoint_core::time::epoch_secs;
use setpoint_core::{ContainerId, MetricSampleStore, ResourceVec};

use crate::error::{RecommendError, RecommendResult};
use crate::histogram::{DecayingHistogram, HistogramOptions};

/// Store metric ids the recommender loop reads per container.
const CPU_METRIC: &str = "cpu";
const MEMORY_METRIC: &str = "memory";

/// Percentiles and cadence for the recommender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecommenderConfig {
    /// Percentile backing the target request.
    pub target_percentile: f64,
    /// Percentile backing the lower bound.
    pub lower_bound_percentile: f64,
    /// Percentile backing the upper bound, before the safety margin.
    pub upper_bound_percentile: f64,
    /// Fractional headroom added on top of the upper percentile.
    pub safety_margin: f64,
    /// Recommendation loop interval.
    pub interval_seconds: u64,
    /// Histogram decay half-life.
    pub half_life_seconds: u64,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            target_percentile: 0.90,
            lower_bound_percentile: 0.50,
            upper_bound_percentile: 0.95,
            safety_margin: 0.15,
            interval_seconds: 60,
            half_life_seconds: 24 * 3600,
        }
    }
}

impl RecommenderConfig {
    pub fn validate(&self) -> RecommendResult<()> {
        for (name, p) in [
            ("targetPercentile", self.target_percentile),
            ("lowerBoundPercentile", self.lower_bound_percentile),
            ("upperBoundPercentile", self.upper_bound_percentile),
        ] {
            if !(p > 0.0 && p <= 1.0) {
                return Err(RecommendError::InvalidConfig(format!(
                    "{name} {p} must be in (0, 1]"
                )));
            }
        }
        if self.lower_bound_percentile > self.target_percentile
            || self.target_percentile > self.upper_bound_percentile
        {
            return Err(RecommendError::InvalidConfig(
                "percentiles must be ordered lower <= target <= upper".to_string(),
            ));
        }
        if !(self.safety_margin >= 0.0 && self.safety_margin.is_finite()) {
            return Err(RecommendError::InvalidConfig(format!(
                "safetyMargin {} must be finite and non-negative",
                self.safety_margin
            )));
        }
        if self.interval_seconds == 0 {
            return Err(RecommendError::InvalidConfig(
                "intervalSeconds must be positive".to_string(),
            ));
        }
        if self.half_life_seconds == 0 {
            return Err(RecommendError::InvalidConfig(
                "halfLifeSeconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// How recommendations may be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdateMode {
    /// Publish numbers, never touch running instances.
    Off,
    /// Apply only to instances created from now on.
    Initial,
    /// Apply continuously, respecting the availability floor.
    #[default]
    Auto,
}

/// Per-container recommendation bounds and update behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerPolicy {
    pub min_allowed: Option<ResourceVec>,
    pub max_allowed: Option<ResourceVec>,
    pub update_mode: UpdateMode,
    /// Instances that must stay available while applying in `Auto`.
    pub availability_floor: u32,
}

impl Default for ContainerPolicy {
    fn default() -> Self {
        Self {
            min_allowed: None,
            max_allowed: None,
            update_mode: UpdateMode::Auto,
            availability_floor: 1,
        }
    }
}

impl ContainerPolicy {
    fn validate(&self) -> RecommendResult<()> {
        if let (Some(min), Some(max)) = (&self.min_allowed, &self.max_allowed)
            && (min.cpu_millis > max.cpu_millis || min.memory_bytes > max.memory_bytes)
        {
            return Err(RecommendError::InvalidPolicy(
                "minAllowed exceeds maxAllowed".to_string(),
            ));
        }
        Ok(())
    }
}

/// Published resource recommendation for one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub container_id: ContainerId,
    pub at: u64,
    pub target: ResourceVec,
    pub lower_bound: ResourceVec,
    pub upper_bound: ResourceVec,
}

/// What the caller may do with the current recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyDecision {
    /// Evict and recreate instances with the new requests now.
    Restart,
    /// Hand the new requests only to instances created from now on.
    OnCreate,
    /// Recommendation-only; leave instances alone.
    Observe,
    /// Applying now would breach the availability floor; retry later.
    Deferred,
}

struct ContainerState {
    cpu: DecayingHistogram,
    memory: DecayingHistogram,
    policy: ContainerPolicy,
    /// Store watermarks: samples at or past these are still unread.
    cpu_seen_through: u64,
    memory_seen_through: u64,
}

impl ContainerState {
    fn fresh(config: &RecommenderConfig, policy: ContainerPolicy) -> Self {
        Self {
            cpu: DecayingHistogram::new(
                HistogramOptions::cpu_millis().with_half_life(config.half_life_seconds),
            ),
            memory: DecayingHistogram::new(
                HistogramOptions::memory_bytes().with_half_life(config.half_life_seconds),
            ),
            policy,
            cpu_seen_through: 0,
            memory_seen_through: 0,
        }
    }
}

/// Builds per-container resource recommendations from usage history.
#[derive(Clone)]
pub struct ResourceRecommender {
    config: RecommenderConfig,
    store: MetricSampleStore,
    containers: Arc<RwLock<HashMap<ContainerId, ContainerState>>>,
    recommendations: Arc<RwLock<HashMap<ContainerId, Recommendation>>>,
}

impl ResourceRecommender {
    pub fn new(config: RecommenderConfig, store: MetricSampleStore) -> RecommendResult<Self> {
        config.validate()?;
        HistogramOptions::cpu_millis()
            .with_half_life(config.half_life_seconds)
            .validate()?;
        Ok(Self {
            config,
            store,
            containers: Arc::new(RwLock::new(HashMap::new())),
            recommendations: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Track a container. Re-registering an id starts its history
    /// over, which is what a container spec change calls for.
    pub async fn register(
        &self,
        container_id: &str,
        policy: ContainerPolicy,
    ) -> RecommendResult<()> {
        policy.validate()?;
        let mut containers = self.containers.write().await;
        containers.insert(
            container_id.to_string(),
            ContainerState::fresh(&self.config, policy),
        );
        info!(container = %container_id, "container registered");
        Ok(())
    }

    /// Swap a container's policy without touching its history.
    pub async fn set_policy(
        &self,
        container_id: &str,
        policy: ContainerPolicy,
    ) -> RecommendResult<bool> {
        policy.validate()?;
        let mut containers = self.containers.write().await;
        match containers.get_mut(container_id) {
            Some(state) => {
                state.policy = policy;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop a container and its published recommendation.
    pub async fn deregister(&self, container_id: &str) {
        self.containers.write().await.remove(container_id);
        self.recommendations.write().await.remove(container_id);
        self.store.reset_target(container_id).await;
        info!(container = %container_id, "container deregistered");
    }

    /// Feed one usage observation directly, bypassing the store.
    /// Unknown containers are picked up with the default policy.
    pub async fn observe(&self, container_id: &str, cpu_millis: f64, memory_bytes: f64, at: u64) {
        let mut containers = self.containers.write().await;
        let state = containers
            .entry(container_id.to_string())
            .or_insert_with(|| ContainerState::fresh(&self.config, ContainerPolicy::default()));
        state.cpu.record(cpu_millis, at);
        state.memory.record(memory_bytes, at);
    }

    /// Compute a recommendation from the current histograms.
    /// `None` until the container has usable history.
    pub async fn recommend(&self, container_id: &str) -> Option<Recommendation> {
        let containers = self.containers.read().await;
        let state = containers.get(container_id)?;
        self.recommend_from(container_id, state, epoch_secs())
    }

    /// Latest recommendation published by the loop.
    pub async fn latest(&self, container_id: &str) -> Option<Recommendation> {
        let recommendations = self.recommendations.read().await;
        recommendations.get(container_id).cloned()
    }

    /// What the caller may do with the recommendation right now,
    /// given how many instances are currently available.
    pub async fn apply_decision(&self, container_id: &str, available: u32) -> ApplyDecision {
        let containers = self.containers.read().await;
        let Some(state) = containers.get(container_id) else {
            return ApplyDecision::Observe;
        };
        match state.policy.update_mode {
            UpdateMode::Off => ApplyDecision::Observe,
            UpdateMode::Initial => ApplyDecision::OnCreate,
            UpdateMode::Auto => {
                // Evicting an instance drops availability by one.
                if available <= state.policy.availability_floor {
                    ApplyDecision::Deferred
                } else {
                    ApplyDecision::Restart
                }
            }
        }
    }

    /// One pass: pull new usage samples from the store into the
    /// histograms, then publish recommendations. Returns how many
    /// containers got one.
    pub async fn tick(&self, now: u64) -> usize {
        let mut published = 0;
        let mut containers = self.containers.write().await;
        let mut fresh: Vec<Recommendation> = Vec::new();

        for (container_id, state) in containers.iter_mut() {
            let cpu_batch = self
                .store
                .window(container_id, CPU_METRIC, state.cpu_seen_through)
                .await;
            for sample in &cpu_batch {
                state.cpu.record(sample.value, sample.at);
                state.cpu_seen_through = state.cpu_seen_through.max(sample.at + 1);
            }
            let memory_batch = self
                .store
                .window(container_id, MEMORY_METRIC, state.memory_seen_through)
                .await;
            for sample in &memory_batch {
                state.memory.record(sample.value, sample.at);
                state.memory_seen_through = state.memory_seen_through.max(sample.at + 1);
            }

            if let Some(recommendation) = self.recommend_from(container_id, state, now) {
                debug!(
                    container = %container_id,
                    cpu_millis = recommendation.target.cpu_millis,
                    memory_bytes = recommendation.target.memory_bytes,
                    "recommendation published"
                );
                fresh.push(recommendation);
                published += 1;
            }
        }
        drop(containers);

        let mut recommendations = self.recommendations.write().await;
        for recommendation in fresh {
            recommendations.insert(recommendation.container_id.clone(), recommendation);
        }
        published
    }

    /// Run the recommendation loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.interval_seconds);
        info!(interval_secs = interval.as_secs(), "recommender loop starting");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let published = self.tick(epoch_secs()).await;
                    debug!(published, "recommender tick complete");
                }
                _ = shutdown.changed() => {
                    info!("recommender loop shutting down");
                    break;
                }
            }
        }
    }

    fn recommend_from(
        &self,
        container_id: &str,
        state: &ContainerState,
        now: u64,
    ) -> Option<Recommendation> {
        if state.cpu.is_empty() && state.memory.is_empty() {
            return None;
        }
        let margin = 1.0 + self.config.safety_margin;

        let target = self.percentile_pair(state, self.config.target_percentile, 1.0);
        let lower = self.percentile_pair(state, self.config.lower_bound_percentile, 1.0);
        let upper = self.percentile_pair(state, self.config.upper_bound_percentile, margin);

        let target = clamp_to_policy(target, &state.policy);
        let mut lower = clamp_to_policy(lower, &state.policy);
        let mut upper = clamp_to_policy(upper, &state.policy);

        // Clamping can cross the bounds over; the target wins.
        lower.cpu_millis = lower.cpu_millis.min(target.cpu_millis);
        lower.memory_bytes = lower.memory_bytes.min(target.memory_bytes);
        upper.cpu_millis = upper.cpu_millis.max(target.cpu_millis);
        upper.memory_bytes = upper.memory_bytes.max(target.memory_bytes);

        Some(Recommendation {
            container_id: container_id.to_string(),
            at: now,
            target,
            lower_bound: lower,
            upper_bound: upper,
        })
    }

    fn percentile_pair(&self, state: &ContainerState, p: f64, scale: f64) -> ResourceVec {
        let cpu = state.cpu.percentile(p).unwrap_or(0.0) * scale;
        let memory = state.memory.percentile(p).unwrap_or(0.0) * scale;
        ResourceVec {
            cpu_millis: to_units(cpu),
            memory_bytes: to_units(memory),
            gpus: 0,
        }
    }
}

fn clamp_to_policy(mut value: ResourceVec, policy: &ContainerPolicy) -> ResourceVec {
    if let Some(min) = &policy.min_allowed {
        value.cpu_millis = value.cpu_millis.max(min.cpu_millis);
        value.memory_bytes = value.memory_bytes.max(min.memory_bytes);
    }
    if let Some(max) = &policy.max_allowed {
        value.cpu_millis = value.cpu_millis.min(max.cpu_millis);
        value.memory_bytes = value.memory_bytes.min(max.memory_bytes);
    }
    value
}

fn to_units(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    value.ceil() as u64
}

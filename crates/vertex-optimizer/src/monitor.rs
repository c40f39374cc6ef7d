// Resource Monitor
// Ring-buffered usage sampling with idle detection over a one-minute window.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

const HISTORY_CAP: usize = 1000;
const IDLE_WINDOW_SECS: f64 = 60.0;
/// A resource is idle when its windowed average is at or below this fraction
/// of its limit.
const IDLE_FRACTION: f64 = 0.3;

#[derive(Debug, Clone, Serialize)]
pub struct IdleStatus {
    pub is_idle: bool,
    pub avg_usage: HashMap<String, f64>,
    pub idle_resources: HashMap<String, f64>,
    /// Combination of sample freshness and inter-sample consistency, in
    /// [0, 1].
    pub confidence: f64,
}

struct Sample {
    at: Instant,
    usage: HashMap<String, f64>,
}

struct MonitorState {
    usage: HashMap<String, f64>,
    limits: HashMap<String, f64>,
    history: VecDeque<Sample>,
    last_update: Instant,
}

/// Tracks per-resource usage against configurable limits.
pub struct ResourceMonitor {
    state: RwLock<MonitorState>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let usage = HashMap::from([
            ("cpu".to_string(), 0.0),
            ("memory".to_string(), 0.0),
            ("credits".to_string(), 0.0),
        ]);
        let limits = HashMap::from([
            ("cpu".to_string(), 100.0),
            ("memory".to_string(), 1000.0),
            ("credits".to_string(), f64::INFINITY),
        ]);
        Self {
            state: RwLock::new(MonitorState {
                usage,
                limits,
                history: VecDeque::new(),
                last_update: Instant::now(),
            }),
        }
    }

    /// Merge in fresh usage readings and record a history sample.
    pub async fn update_usage(&self, readings: HashMap<String, f64>) {
        let mut state = self.state.write().await;
        for (resource, value) in readings {
            state.usage.insert(resource, value);
        }
        let snapshot = state.usage.clone();
        state.history.push_back(Sample {
            at: Instant::now(),
            usage: snapshot,
        });
        while state.history.len() > HISTORY_CAP {
            state.history.pop_front();
        }
        state.last_update = Instant::now();
    }

    pub async fn set_limit(&self, resource: &str, limit: f64) {
        let mut state = self.state.write().await;
        state.limits.insert(resource.to_string(), limit);
        state.usage.entry(resource.to_string()).or_insert(0.0);
    }

    pub async fn current_usage(&self) -> HashMap<String, f64> {
        self.state.read().await.usage.clone()
    }

    pub async fn limits(&self) -> HashMap<String, f64> {
        self.state.read().await.limits.clone()
    }

    /// Per-resource headroom: max(0, limit - usage).
    pub async fn available(&self) -> HashMap<String, f64> {
        let state = self.state.read().await;
        state
            .usage
            .iter()
            .map(|(resource, used)| {
                let limit = state.limits.get(resource).copied().unwrap_or(f64::INFINITY);
                (resource.clone(), (limit - used).max(0.0))
            })
            .collect()
    }

    /// Whether the current headroom covers an estimated requirement.
    pub async fn can_execute(&self, estimated: &HashMap<String, f64>) -> bool {
        let available = self.available().await;
        estimated.iter().all(|(resource, required)| {
            available
                .get(resource)
                .map_or(true, |have| have >= required)
        })
    }

    pub async fn idle_status(&self) -> IdleStatus {
        let state = self.state.read().await;
        let now = Instant::now();

        let recent: Vec<&Sample> = state
            .history
            .iter()
            .filter(|s| now.duration_since(s.at).as_secs_f64() <= IDLE_WINDOW_SECS)
            .collect();

        if recent.is_empty() {
            let idle_resources = state
                .usage
                .iter()
                .map(|(resource, used)| {
                    let limit = state.limits.get(resource).copied().unwrap_or(f64::INFINITY);
                    (resource.clone(), (limit - used).max(0.0))
                })
                .collect();
            // No data: assume idle, with middling confidence.
            return IdleStatus {
                is_idle: true,
                avg_usage: HashMap::new(),
                idle_resources,
                confidence: 0.5,
            };
        }

        let mut avg_usage = HashMap::new();
        for resource in state.usage.keys() {
            let mean = recent
                .iter()
                .map(|s| s.usage.get(resource).copied().unwrap_or(0.0))
                .sum::<f64>()
                / recent.len() as f64;
            avg_usage.insert(resource.clone(), mean);
        }

        let is_idle = avg_usage.iter().all(|(resource, avg)| {
            let limit = state.limits.get(resource).copied().unwrap_or(f64::INFINITY);
            *avg <= limit * IDLE_FRACTION
        });

        let idle_resources = avg_usage
            .iter()
            .map(|(resource, avg)| {
                let limit = state.limits.get(resource).copied().unwrap_or(f64::INFINITY);
                (resource.clone(), (limit - avg).max(0.0))
            })
            .collect();

        // Freshness decays linearly to zero over the idle window.
        let data_age = now.duration_since(state.last_update).as_secs_f64();
        let age_factor = (1.0 - data_age / IDLE_WINDOW_SECS).clamp(0.0, 1.0);

        // Consistency from the normalized standard deviation per resource.
        let mut consistency: f64 = 1.0;
        if recent.len() > 1 {
            for resource in state.usage.keys() {
                let values: Vec<f64> = recent
                    .iter()
                    .map(|s| s.usage.get(resource).copied().unwrap_or(0.0))
                    .collect();
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let variance =
                    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
                let std_dev = variance.sqrt();

                let limit = state.limits.get(resource).copied().unwrap_or(f64::INFINITY);
                let normalized = if limit.is_finite() {
                    std_dev / limit.max(1.0)
                } else {
                    0.0
                };
                consistency = consistency.min((1.0 - normalized * 5.0).max(0.0));
            }
        }

        IdleStatus {
            is_idle,
            avg_usage,
            idle_resources,
            confidence: (age_factor + consistency) / 2.0,
        }
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cpu(value: f64) -> HashMap<String, f64> {
        HashMap::from([("cpu".to_string(), value)])
    }

    #[tokio::test]
    async fn available_is_limit_minus_usage_floored_at_zero() {
        let monitor = ResourceMonitor::new();
        monitor.update_usage(cpu(120.0)).await;

        let available = monitor.available().await;
        assert_eq!(available["cpu"], 0.0);
        assert_eq!(available["memory"], 1000.0);
        assert!(available["credits"].is_infinite());
    }

    #[tokio::test]
    async fn can_execute_checks_every_estimated_resource() {
        let monitor = ResourceMonitor::new();
        monitor.update_usage(cpu(50.0)).await;

        assert!(monitor.can_execute(&cpu(40.0)).await);
        assert!(!monitor.can_execute(&cpu(60.0)).await);
        // Untracked resources are not limiting.
        assert!(
            monitor
                .can_execute(&HashMap::from([("gpu".to_string(), 1.0)]))
                .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn busy_average_is_not_idle() {
        let monitor = ResourceMonitor::new();
        for _ in 0..5 {
            monitor.update_usage(cpu(80.0)).await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let status = monitor.idle_status().await;
        assert!(!status.is_idle);
        assert!((status.avg_usage["cpu"] - 80.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_low_usage_is_idle_with_high_confidence() {
        let monitor = ResourceMonitor::new();
        for _ in 0..10 {
            monitor.update_usage(cpu(20.0)).await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let status = monitor.idle_status().await;
        assert!(status.is_idle);
        assert!(status.confidence >= 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_samples_fall_out_of_the_window() {
        let monitor = ResourceMonitor::new();
        monitor.update_usage(cpu(80.0)).await;
        tokio::time::sleep(Duration::from_secs(61)).await;

        let status = monitor.idle_status().await;
        // No recent data: idle by default with middling confidence.
        assert!(status.is_idle);
        assert_eq!(status.confidence, 0.5);
    }
}

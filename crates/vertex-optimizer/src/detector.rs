// Sleep Detector
// Debounces the resource monitor's idle signal: idle is reported only after
// the system has been continuously idle for `min_idle_time`, and any
// activity resets the timer. Also predicts upcoming idle windows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Local, Timelike};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::monitor::ResourceMonitor;

pub const DEFAULT_MIN_IDLE_TIME: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct IdleState {
    pub is_idle: bool,
    pub idle_duration_secs: f64,
    pub idle_resources: HashMap<String, f64>,
    pub confidence: f64,
}

/// A recurring daily window in which the system is expected to be idle.
#[derive(Debug, Clone)]
pub struct IdleWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    pub available_resources: HashMap<String, f64>,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct IdleWindows {
    pub windows: Vec<IdleWindow>,
}

impl Default for IdleWindows {
    fn default() -> Self {
        Self {
            windows: vec![
                IdleWindow {
                    start_hour: 0,
                    end_hour: 6,
                    available_resources: HashMap::from([
                        ("cpu".to_string(), 90.0),
                        ("memory".to_string(), 900.0),
                        ("credits".to_string(), 100.0),
                    ]),
                    confidence: 0.8,
                },
                IdleWindow {
                    start_hour: 12,
                    end_hour: 13,
                    available_resources: HashMap::from([
                        ("cpu".to_string(), 50.0),
                        ("memory".to_string(), 500.0),
                        ("credits".to_string(), 20.0),
                    ]),
                    confidence: 0.6,
                },
            ],
        }
    }
}

/// One concrete predicted idle period.
#[derive(Debug, Clone)]
pub struct IdlePeriod {
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub duration_secs: f64,
    pub available_resources: HashMap<String, f64>,
    pub confidence: f64,
}

struct DetectorState {
    idle_since: Option<Instant>,
    is_idle: bool,
}

pub struct SleepDetector {
    monitor: Arc<ResourceMonitor>,
    min_idle_time: Duration,
    windows: IdleWindows,
    state: Mutex<DetectorState>,
}

impl SleepDetector {
    pub fn new(monitor: Arc<ResourceMonitor>) -> Self {
        Self::with_min_idle_time(monitor, DEFAULT_MIN_IDLE_TIME)
    }

    pub fn with_min_idle_time(monitor: Arc<ResourceMonitor>, min_idle_time: Duration) -> Self {
        Self {
            monitor,
            min_idle_time,
            windows: IdleWindows::default(),
            state: Mutex::new(DetectorState {
                idle_since: None,
                is_idle: false,
            }),
        }
    }

    pub fn with_windows(mut self, windows: IdleWindows) -> Self {
        self.windows = windows;
        self
    }

    pub async fn check_idle_state(&self) -> IdleState {
        let status = self.monitor.idle_status().await;
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if status.is_idle {
            let since = *state.idle_since.get_or_insert(now);
            if now.duration_since(since) >= self.min_idle_time {
                state.is_idle = true;
            }
        } else {
            state.is_idle = false;
            state.idle_since = None;
        }

        let idle_duration_secs = state
            .idle_since
            .map(|since| now.duration_since(since).as_secs_f64())
            .unwrap_or(0.0);

        IdleState {
            is_idle: state.is_idle,
            idle_duration_secs,
            idle_resources: status.idle_resources,
            confidence: status.confidence,
        }
    }

    /// Concrete idle periods over the next `lookahead_hours`, from the
    /// configured daily windows. Periods already fully past are skipped; a
    /// period underway starts now.
    pub fn predict_idle_periods(
        &self,
        lookahead_hours: i64,
        now: DateTime<Local>,
    ) -> Vec<IdlePeriod> {
        let horizon = now + ChronoDuration::hours(lookahead_hours);
        let mut periods = Vec::new();

        let midnight = |dt: DateTime<Local>| {
            dt.with_hour(0)
                .and_then(|d| d.with_minute(0))
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
        };

        let Some(day_start) = midnight(now) else {
            return periods;
        };

        let days = lookahead_hours / 24 + 2;
        for day in 0..days {
            let base = day_start + ChronoDuration::days(day);
            for window in &self.windows.windows {
                let start = base + ChronoDuration::hours(window.start_hour as i64);
                let end = base + ChronoDuration::hours(window.end_hour as i64);

                if end <= now || start >= horizon {
                    continue;
                }

                let start = start.max(now);
                periods.push(IdlePeriod {
                    start,
                    end,
                    duration_secs: (end - start).num_seconds() as f64,
                    available_resources: window.available_resources.clone(),
                    confidence: window.confidence,
                });
            }
        }

        periods.sort_by_key(|p| p.start);
        periods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cpu(value: f64) -> HashMap<String, f64> {
        HashMap::from([("cpu".to_string(), value)])
    }

    #[tokio::test]
    async fn busy_system_is_not_idle() {
        let monitor = Arc::new(ResourceMonitor::new());
        let detector = SleepDetector::new(monitor.clone());

        monitor.update_usage(cpu(80.0)).await;
        let state = detector.check_idle_state().await;
        assert!(!state.is_idle);
        assert_eq!(state.idle_duration_secs, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_requires_sustained_quiet() {
        let monitor = Arc::new(ResourceMonitor::new());
        let detector = SleepDetector::new(monitor.clone());

        // Quiet readings, checked every second. The report flips to idle
        // only once the quiet stretch exceeds min_idle_time.
        for second in 0..=11u64 {
            monitor.update_usage(cpu(20.0)).await;
            let state = detector.check_idle_state().await;
            if second < 10 {
                assert!(!state.is_idle, "reported idle too early at {second}s");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let state = detector.check_idle_state().await;
        assert!(state.is_idle);
        assert!(state.confidence >= 0.5);
        assert!(state.idle_duration_secs >= 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_the_idle_timer() {
        let monitor = Arc::new(ResourceMonitor::new());
        let detector = SleepDetector::new(monitor.clone());

        for _ in 0..11 {
            monitor.update_usage(cpu(10.0)).await;
            detector.check_idle_state().await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert!(detector.check_idle_state().await.is_idle);

        // A burst of activity cancels idle immediately. The spike has to
        // dominate the 60s average to flip the monitor.
        for _ in 0..30 {
            monitor.update_usage(cpu(100.0)).await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let state = detector.check_idle_state().await;
        assert!(!state.is_idle);
        assert_eq!(state.idle_duration_secs, 0.0);
    }

    #[test]
    fn predicted_periods_cover_night_and_lunch() {
        let monitor = Arc::new(ResourceMonitor::new());
        let detector = SleepDetector::new(monitor);

        // 9am local.
        let now = Local.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let periods = detector.predict_idle_periods(24, now);

        // Lunch today, night tomorrow, and the start of tomorrow's lunch
        // window may fall outside the horizon depending on bounds.
        assert!(!periods.is_empty());
        assert_eq!(periods[0].start.hour(), 12);
        assert_eq!(periods[0].end.hour(), 13);
        assert_eq!(periods[1].start.hour(), 0);
        assert_eq!(periods[1].end.hour(), 6);
        assert!(periods[0].available_resources["credits"] < periods[1].available_resources["credits"]);
    }

    #[test]
    fn period_underway_starts_now() {
        let monitor = Arc::new(ResourceMonitor::new());
        let detector = SleepDetector::new(monitor);

        // 2am: inside the night window.
        let now = Local.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();
        let periods = detector.predict_idle_periods(24, now);

        assert_eq!(periods[0].start, now);
        assert_eq!(periods[0].end.hour(), 6);
        assert_eq!(periods[0].duration_secs, 4.0 * 3600.0);
    }
}

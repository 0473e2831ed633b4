//! Load-time and cache-hit metrics for calculator modules.
//!
//! The monitor only observes; nothing in the cache or lifecycle depends on
//! it. A poisoned lock turns recording into a no-op instead of failing the
//! caller.

use crate::config::MonitorConfig;
use crate::types::PluginId;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// One bracketed module load
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct LoadMeasurement {
    pub id: PluginId,
    pub load_time_ms: f64,
    pub cache_hit: bool,
    pub size_bytes: usize,
}

/// Aggregate over the retained measurements
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct LoadStats {
    /// Distinct modules measured
    pub total_modules: usize,
    pub total_loads: usize,
    pub average_load_time_ms: f64,
    pub cache_hit_rate: f64,
    /// Latest size of each distinct module, summed
    pub memory_usage: usize,
    pub slowest_module: Option<PluginId>,
    pub fastest_module: Option<PluginId>,
}

/// Timer for one in-progress load, returned by
/// [`PerformanceMonitor::start_module_load`]
#[derive(Debug)]
#[must_use = "pass the timer to end_module_load or cancel_module_load"]
pub struct LoadTimer {
    id: PluginId,
    started: Instant,
    generation: u64,
}

impl LoadTimer {
    pub fn id(&self) -> &PluginId {
        &self.id
    }
}

#[derive(Default)]
struct MonitorState {
    /// Bumped by `reset`; timers from an older generation are discarded
    generation: u64,
    measurements: VecDeque<LoadMeasurement>,
}

/// Ring buffer of recent module load measurements
pub struct PerformanceMonitor {
    state: Mutex<MonitorState>,
    config: MonitorConfig,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            config,
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, MonitorState>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!("Performance monitor lock poisoned; metrics disabled");
                None
            }
        }
    }

    /// Begin timing a load of `id`
    ///
    /// Each call gets its own timer, so concurrent loads of the same id are
    /// measured independently.
    pub fn start_module_load(&self, id: &PluginId) -> LoadTimer {
        let generation = self.lock().map(|s| s.generation).unwrap_or_default();
        LoadTimer {
            id: id.clone(),
            started: Instant::now(),
            generation,
        }
    }

    /// Finish timing a load; ignored if the monitor was reset meanwhile
    pub fn end_module_load(&self, timer: LoadTimer, cache_hit: bool, size_bytes: usize) {
        let elapsed = timer.started.elapsed();
        let Some(mut state) = self.lock() else {
            return;
        };
        if timer.generation != state.generation {
            tracing::debug!("Discarding load timer for {} started before reset", timer.id);
            return;
        }
        self.push(
            &mut state,
            LoadMeasurement {
                id: timer.id,
                load_time_ms: duration_ms(elapsed),
                cache_hit,
                size_bytes,
            },
        );
    }

    /// Drop the timer for a load that did not complete
    pub fn cancel_module_load(&self, timer: LoadTimer) {
        tracing::debug!("Load of {} did not complete", timer.id);
    }

    /// Record a measurement taken elsewhere
    pub fn record(&self, measurement: LoadMeasurement) {
        if let Some(mut state) = self.lock() {
            self.push(&mut state, measurement);
        }
    }

    fn push(&self, state: &mut MonitorState, measurement: LoadMeasurement) {
        tracing::debug!(
            "Load of {} took {:.3}ms (cache hit: {})",
            measurement.id,
            measurement.load_time_ms,
            measurement.cache_hit
        );
        state.measurements.push_back(measurement);
        while state.measurements.len() > self.config.max_measurements {
            state.measurements.pop_front();
        }
    }

    /// Retained measurements, oldest first
    pub fn measurements(&self) -> Vec<LoadMeasurement> {
        self.lock()
            .map(|s| s.measurements.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_load_stats(&self) -> LoadStats {
        let Some(state) = self.lock() else {
            return LoadStats::default();
        };
        let measurements = &state.measurements;
        if measurements.is_empty() {
            return LoadStats::default();
        }

        let total_loads = measurements.len();
        let total_time: f64 = measurements.iter().map(|m| m.load_time_ms).sum();
        let hits = measurements.iter().filter(|m| m.cache_hit).count();

        let mut latest_sizes: HashMap<&PluginId, usize> = HashMap::new();
        for m in measurements {
            latest_sizes.insert(&m.id, m.size_bytes);
        }

        let slowest_module = measurements
            .iter()
            .max_by(|a, b| a.load_time_ms.total_cmp(&b.load_time_ms))
            .map(|m| m.id.clone());
        let fastest_module = measurements
            .iter()
            .min_by(|a, b| a.load_time_ms.total_cmp(&b.load_time_ms))
            .map(|m| m.id.clone());

        LoadStats {
            total_modules: latest_sizes.len(),
            total_loads,
            average_load_time_ms: total_time / total_loads as f64,
            cache_hit_rate: hits as f64 / total_loads as f64,
            memory_usage: latest_sizes.values().sum(),
            slowest_module,
            fastest_module,
        }
    }

    /// Human-readable warnings for thresholds that are exceeded
    pub fn check_performance_issues(&self) -> Vec<String> {
        let stats = self.get_load_stats();
        let mut issues = Vec::new();
        if stats.total_loads == 0 {
            return issues;
        }

        if stats.average_load_time_ms > self.config.max_average_load_ms {
            issues.push(format!(
                "Average module load time {:.1}ms exceeds {:.1}ms",
                stats.average_load_time_ms, self.config.max_average_load_ms
            ));
        }
        if stats.cache_hit_rate < self.config.min_cache_hit_rate {
            issues.push(format!(
                "Cache hit rate {:.0}% is below {:.0}%",
                stats.cache_hit_rate * 100.0,
                self.config.min_cache_hit_rate * 100.0
            ));
        }
        if stats.memory_usage > self.config.max_memory_bytes {
            issues.push(format!(
                "Module memory usage {} bytes exceeds {} bytes",
                stats.memory_usage, self.config.max_memory_bytes
            ));
        }
        issues
    }

    /// Drop all measurements and invalidate in-progress timers
    pub fn reset(&self) {
        if let Some(mut state) = self.lock() {
            state.generation += 1;
            state.measurements.clear();
        }
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(id: &str, ms: f64, hit: bool, size: usize) -> LoadMeasurement {
        LoadMeasurement {
            id: PluginId::from(id),
            load_time_ms: ms,
            cache_hit: hit,
            size_bytes: size,
        }
    }

    #[test]
    fn test_start_end_records_measurement() {
        let monitor = PerformanceMonitor::default();
        let id = PluginId::from("general.bmi");
        let timer = monitor.start_module_load(&id);
        assert_eq!(timer.id(), &id);
        monitor.end_module_load(timer, false, 128);

        let measurements = monitor.measurements();
        assert_eq!(measurements.len(), 1);
        assert!(!measurements[0].cache_hit);
        assert!(measurements[0].load_time_ms >= 0.0);
    }

    #[test]
    fn test_cancelled_load_is_not_recorded() {
        let monitor = PerformanceMonitor::default();
        let id = PluginId::from("general.bmi");
        let timer = monitor.start_module_load(&id);
        monitor.cancel_module_load(timer);
        assert!(monitor.measurements().is_empty());
    }

    #[test]
    fn test_overlapping_loads_of_one_id_are_all_recorded() {
        let monitor = PerformanceMonitor::default();
        let id = PluginId::from("general.bmi");
        let first = monitor.start_module_load(&id);
        let second = monitor.start_module_load(&id);
        let third = monitor.start_module_load(&id);

        monitor.cancel_module_load(second);
        monitor.end_module_load(first, false, 64);
        monitor.end_module_load(third, true, 64);

        let hits: Vec<_> = monitor.measurements().iter().map(|m| m.cache_hit).collect();
        assert_eq!(hits, vec![false, true]);
    }

    #[test]
    fn test_timer_started_before_reset_is_discarded() {
        let monitor = PerformanceMonitor::default();
        let stale = monitor.start_module_load(&PluginId::from("general.bmi"));
        monitor.reset();
        monitor.end_module_load(stale, false, 0);
        assert!(monitor.measurements().is_empty());

        let fresh = monitor.start_module_load(&PluginId::from("general.bmi"));
        monitor.end_module_load(fresh, true, 0);
        assert_eq!(monitor.measurements().len(), 1);
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let monitor = PerformanceMonitor::new(MonitorConfig {
            max_measurements: 3,
            ..MonitorConfig::default()
        });
        for i in 0..5 {
            monitor.record(measurement(&format!("m.{}", i), 1.0, true, 10));
        }

        let ids: Vec<_> = monitor
            .measurements()
            .into_iter()
            .map(|m| m.id.to_string())
            .collect();
        assert_eq!(ids, vec!["m.2", "m.3", "m.4"]);
    }

    #[test]
    fn test_load_stats_aggregate() {
        let monitor = PerformanceMonitor::default();
        monitor.record(measurement("a.x", 10.0, false, 100));
        monitor.record(measurement("a.x", 2.0, true, 120));
        monitor.record(measurement("b.y", 30.0, false, 50));
        monitor.record(measurement("b.y", 2.0, true, 50));

        let stats = monitor.get_load_stats();
        assert_eq!(stats.total_modules, 2);
        assert_eq!(stats.total_loads, 4);
        assert!((stats.average_load_time_ms - 11.0).abs() < 1e-9);
        assert!((stats.cache_hit_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.memory_usage, 170);
        assert_eq!(stats.slowest_module, Some(PluginId::from("b.y")));
        assert_eq!(stats.fastest_module, Some(PluginId::from("a.x")));
    }

    #[test]
    fn test_performance_issues_against_thresholds() {
        let monitor = PerformanceMonitor::new(MonitorConfig {
            max_average_load_ms: 5.0,
            min_cache_hit_rate: 0.9,
            max_memory_bytes: 10,
            ..MonitorConfig::default()
        });
        assert!(monitor.check_performance_issues().is_empty());

        monitor.record(measurement("a.x", 50.0, false, 100));
        let issues = monitor.check_performance_issues();
        assert_eq!(issues.len(), 3);
        assert!(issues[0].contains("load time"));
        assert!(issues[1].contains("hit rate"));
        assert!(issues[2].contains("memory"));
    }

    #[test]
    fn test_reset_clears_everything() {
        let monitor = PerformanceMonitor::default();
        monitor.record(measurement("a.x", 1.0, true, 1));
        monitor.reset();
        assert_eq!(monitor.get_load_stats(), LoadStats::default());
    }
}

//! Metrics Collector
//!
//! A Prometheus registry where services register labelled counters, gauges
//! and histograms by name at startup and update them by name afterwards.
//! Updates to unknown names, wrong label arity, or a disabled collector are
//! silently ignored so instrumentation never fails a caller.

use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, error, warn};

/// Collects and exports metrics
pub struct Metrics {
    enabled: bool,
    registry: Registry,
    counters: RwLock<HashMap<String, CounterVec>>,
    gauges: RwLock<HashMap<String, GaugeVec>>,
    histograms: RwLock<HashMap<String, HistogramVec>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create an enabled collector with an empty registry.
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Collector that accepts registrations and updates but records nothing.
    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        Self {
            enabled,
            registry: Registry::new(),
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn register_counter(&self, name: &str, help: &str, labels: &[&str]) {
        if !self.enabled {
            return;
        }
        let Ok(mut counters) = self.counters.write() else {
            warn!(metric = %name, "Failed to acquire write lock on counters");
            return;
        };
        if counters.contains_key(name) {
            return;
        }
        match CounterVec::new(Opts::new(name, help), labels) {
            Ok(counter) => {
                if self.register(name, Box::new(counter.clone())) {
                    counters.insert(name.to_string(), counter);
                }
            }
            Err(e) => error!(metric = %name, error = %e, "Failed to create counter"),
        }
    }

    pub fn register_gauge(&self, name: &str, help: &str, labels: &[&str]) {
        if !self.enabled {
            return;
        }
        let Ok(mut gauges) = self.gauges.write() else {
            warn!(metric = %name, "Failed to acquire write lock on gauges");
            return;
        };
        if gauges.contains_key(name) {
            return;
        }
        match GaugeVec::new(Opts::new(name, help), labels) {
            Ok(gauge) => {
                if self.register(name, Box::new(gauge.clone())) {
                    gauges.insert(name.to_string(), gauge);
                }
            }
            Err(e) => error!(metric = %name, error = %e, "Failed to create gauge"),
        }
    }

    /// Register a histogram. `buckets` of `None` uses the Prometheus defaults.
    pub fn register_histogram(&self, name: &str, help: &str, labels: &[&str], buckets: Option<Vec<f64>>) {
        if !self.enabled {
            return;
        }
        let Ok(mut histograms) = self.histograms.write() else {
            warn!(metric = %name, "Failed to acquire write lock on histograms");
            return;
        };
        if histograms.contains_key(name) {
            return;
        }
        let mut opts = HistogramOpts::new(name, help);
        if let Some(buckets) = buckets {
            opts = opts.buckets(buckets);
        }
        match HistogramVec::new(opts, labels) {
            Ok(histogram) => {
                if self.register(name, Box::new(histogram.clone())) {
                    histograms.insert(name.to_string(), histogram);
                }
            }
            Err(e) => error!(metric = %name, error = %e, "Failed to create histogram"),
        }
    }

    fn register(&self, name: &str, collector: Box<dyn prometheus::core::Collector>) -> bool {
        match self.registry.register(collector) {
            Ok(()) => {
                debug!(metric = %name, "Registered metric");
                true
            }
            Err(e) => {
                error!(metric = %name, error = %e, "Failed to register metric");
                false
            }
        }
    }

    pub fn add(&self, name: &str, value: f64, labels: &[&str]) {
        if let Ok(counters) = self.counters.read() {
            if let Some(counter) = counters.get(name) {
                match counter.get_metric_with_label_values(labels) {
                    Ok(c) => c.inc_by(value),
                    Err(e) => debug!(metric = %name, error = %e, "Counter update ignored"),
                }
            }
        }
    }

    pub fn inc(&self, name: &str, labels: &[&str]) {
        self.add(name, 1.0, labels);
    }

    pub fn set(&self, name: &str, value: f64, labels: &[&str]) {
        if let Ok(gauges) = self.gauges.read() {
            if let Some(gauge) = gauges.get(name) {
                match gauge.get_metric_with_label_values(labels) {
                    Ok(g) => g.set(value),
                    Err(e) => debug!(metric = %name, error = %e, "Gauge update ignored"),
                }
            }
        }
    }

    pub fn observe(&self, name: &str, value: f64, labels: &[&str]) {
        if let Ok(histograms) = self.histograms.read() {
            if let Some(histogram) = histograms.get(name) {
                match histogram.get_metric_with_label_values(labels) {
                    Ok(h) => h.observe(value),
                    Err(e) => debug!(metric = %name, error = %e, "Histogram update ignored"),
                }
            }
        }
    }

    /// Current value of a counter series, if the counter is registered.
    pub fn counter_value(&self, name: &str, labels: &[&str]) -> Option<f64> {
        let counters = self.counters.read().ok()?;
        let counter = counters.get(name)?;
        counter.get_metric_with_label_values(labels).ok().map(|c| c.get())
    }

    /// Current value of a gauge series, if the gauge is registered.
    pub fn gauge_value(&self, name: &str, labels: &[&str]) -> Option<f64> {
        let gauges = self.gauges.read().ok()?;
        let gauge = gauges.get(name)?;
        gauge.get_metric_with_label_values(labels).ok().map(|g| g.get())
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}

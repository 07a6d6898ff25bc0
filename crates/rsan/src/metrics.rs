//! Session metrics through the `metrics` facade, plus an in-process recorder
//! that the CLI prints at exit.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{
    Counter, Gauge, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    describe_counter, describe_gauge, describe_histogram,
};
use parking_lot::{Mutex, RwLock};

/// Register metric descriptions. Call once at startup.
pub fn init() {
    describe_counter!(
        "rsan_accesses_total",
        Unit::Count,
        "Memory accesses checked"
    );
    describe_counter!(
        "rsan_races_detected_total",
        Unit::Count,
        "Races detected, including suppressed duplicates"
    );
    describe_counter!(
        "rsan_reports_suppressed_total",
        Unit::Count,
        "Race reports dropped as duplicates"
    );
    describe_counter!(
        "rsan_threads_created_total",
        Unit::Count,
        "Threads registered"
    );
    describe_counter!(
        "rsan_sync_objects_created_total",
        Unit::Count,
        "Synchronization object identities created"
    );
    describe_gauge!(
        "rsan_shadow_units",
        Unit::Count,
        "Shadow units holding access history"
    );
    describe_histogram!(
        "rsan_report_frames",
        Unit::Count,
        "Frames printed per report for the two racing accesses"
    );
}

/// Recorded histogram samples.
#[derive(Default)]
struct Samples(Mutex<Vec<f64>>);

impl HistogramFn for Samples {
    fn record(&self, value: f64) {
        self.0.lock().push(value);
    }
}

/// Handles created so far, keyed by rendered metric name.
#[derive(Default)]
struct Store {
    counters: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    histograms: RwLock<BTreeMap<String, Arc<Samples>>>,
}

fn handle<T: Default>(map: &RwLock<BTreeMap<String, Arc<T>>>, key: String) -> Arc<T> {
    if let Some(existing) = map.read().get(&key) {
        return Arc::clone(existing);
    }
    Arc::clone(map.write().entry(key).or_default())
}

/// Recorder keeping everything in memory.
#[derive(Default)]
pub struct SessionRecorder {
    store: Arc<Store>,
}

impl SessionRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the global recorder. `None` if one is already installed.
    #[must_use]
    pub fn install(self) -> Option<MetricsHandle> {
        let store = Arc::clone(&self.store);
        metrics::set_global_recorder(self).ok()?;
        Some(MetricsHandle { store })
    }

    /// Read access without installing, for scoped use.
    #[must_use]
    pub fn handle(&self) -> MetricsHandle {
        MetricsHandle {
            store: Arc::clone(&self.store),
        }
    }
}

fn key_name(key: &Key) -> String {
    let mut labels = key.labels().peekable();
    if labels.peek().is_none() {
        return key.name().to_string();
    }
    let rendered: Vec<String> = labels.map(|l| format!("{}={}", l.key(), l.value())).collect();
    format!("{}{{{}}}", key.name(), rendered.join(","))
}

impl Recorder for SessionRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(handle(&self.store.counters, key_name(key)))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(handle(&self.store.gauges, key_name(key)))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(handle(&self.store.histograms, key_name(key)))
    }
}

/// Read side of a [`SessionRecorder`].
#[derive(Clone)]
pub struct MetricsHandle {
    store: Arc<Store>,
}

impl MetricsHandle {
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.store
            .counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.store
            .gauges
            .read()
            .get(name)
            .map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
    }

    #[must_use]
    pub fn histogram(&self, name: &str) -> Option<Vec<f64>> {
        self.store
            .histograms
            .read()
            .get(name)
            .map(|h| h.0.lock().clone())
    }

    /// Human-readable dump, sorted by name.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for (name, value) in self.store.counters.read().iter() {
            lines.push(format!("  {name}: {}", value.load(Ordering::Relaxed)));
        }
        for (name, value) in self.store.gauges.read().iter() {
            lines.push(format!("  {name}: {}", f64::from_bits(value.load(Ordering::Relaxed))));
        }
        for (name, samples) in self.store.histograms.read().iter() {
            let samples = samples.0.lock();
            if samples.is_empty() {
                continue;
            }
            let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            #[allow(clippy::cast_precision_loss)]
            let avg = samples.iter().sum::<f64>() / samples.len() as f64;
            lines.push(format!(
                "  {name}: count={}, min={min}, max={max}, avg={avg:.2}",
                samples.len()
            ));
        }
        if lines.is_empty() {
            return "No metrics collected.\n".to_string();
        }
        format!("## Metrics\n{}\n", lines.join("\n"))
    }

    pub fn print_summary(&self) {
        eprint!("{}", self.summary());
    }
}

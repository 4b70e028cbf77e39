//! Statistics Registry
//!
//! A [`StatsRegistry`] maps metric names to live [`Stat`] sources. The key set
//! is frozen when the registry is built, so the map itself is shared between
//! connections without a lock; only the counters inside it change, and each
//! counter serializes its own updates.
//!
//! ## Built-in Metrics
//!
//! | Name | Source |
//! |------|--------|
//! | `pid`, `version`, `pointer_size` | captured once at construction |
//! | `uptime` | seconds since the registry was built |
//! | `time`, `rusage_user`, `rusage_system`, `threads`, `tasks` | sampled on every render |
//! | `cmd_get`, `cmd_set`, `get_hits`, ... | [`Counter`]s |

use crate::stats::counter::{Counter, DEFAULT_QUEUE_CAPACITY};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Names of the built-in metrics.
pub mod names {
    pub const PID: &str = "pid";
    pub const UPTIME: &str = "uptime";
    pub const TIME: &str = "time";
    pub const VERSION: &str = "version";
    pub const POINTER_SIZE: &str = "pointer_size";
    pub const RUSAGE_USER: &str = "rusage_user";
    pub const RUSAGE_SYSTEM: &str = "rusage_system";
    pub const THREADS: &str = "threads";
    pub const TASKS: &str = "tasks";

    pub const CMD_GET: &str = "cmd_get";
    pub const CMD_SET: &str = "cmd_set";
    pub const CMD_DELETE: &str = "cmd_delete";
    pub const GET_HITS: &str = "get_hits";
    pub const GET_MISSES: &str = "get_misses";
    pub const DELETE_HITS: &str = "delete_hits";
    pub const DELETE_MISSES: &str = "delete_misses";
    pub const CURR_CONNECTIONS: &str = "curr_connections";
    pub const TOTAL_CONNECTIONS: &str = "total_connections";
    pub const BYTES_READ: &str = "bytes_read";
    pub const BYTES_WRITTEN: &str = "bytes_written";

    // Maintained by the handler through the statistics push
    pub const EVICTIONS: &str = "evictions";
    pub const BYTES: &str = "bytes";
    pub const CURR_ITEMS: &str = "curr_items";
    pub const TOTAL_ITEMS: &str = "total_items";
    pub const EXPIRED_UNFETCHED: &str = "expired_unfetched";

    /// Every built-in counter
    pub const COUNTERS: &[&str] = &[
        CMD_GET,
        CMD_SET,
        CMD_DELETE,
        GET_HITS,
        GET_MISSES,
        DELETE_HITS,
        DELETE_MISSES,
        CURR_CONNECTIONS,
        TOTAL_CONNECTIONS,
        BYTES_READ,
        BYTES_WRITTEN,
        EVICTIONS,
        BYTES,
        CURR_ITEMS,
        TOTAL_ITEMS,
        EXPIRED_UNFETCHED,
    ];
}

/// A function sampled every time the metric is rendered.
pub type Sample = Arc<dyn Fn() -> String + Send + Sync>;

/// One metric source.
#[derive(Clone)]
pub enum Stat {
    /// A value captured once
    Static(String),
    /// Whole seconds elapsed since `started`
    Timer { started: Instant },
    /// Recomputed on every render
    Computed(Sample),
    /// A concurrently updated integer
    Counter(Counter),
}

impl Stat {
    /// Renders the current value as text.
    ///
    /// Counters report their last applied value; use
    /// [`StatsRegistry::snapshot`] to wait for queued updates first.
    pub fn render(&self) -> String {
        match self {
            Stat::Static(value) => value.clone(),
            Stat::Timer { started } => started.elapsed().as_secs().to_string(),
            Stat::Computed(sample) => sample(),
            Stat::Counter(counter) => counter.value().to_string(),
        }
    }

    async fn render_settled(&self) -> String {
        match self {
            Stat::Counter(counter) => counter.settled().await.to_string(),
            other => other.render(),
        }
    }
}

impl fmt::Debug for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stat::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Stat::Timer { started } => f.debug_struct("Timer").field("started", started).finish(),
            Stat::Computed(_) => f.write_str("Computed(..)"),
            Stat::Counter(counter) => f.debug_tuple("Counter").field(counter).finish(),
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// The named collection of metrics shared by a server and its connections.
///
/// # Example
///
/// ```
/// use mcwire::stats::{names, StatsRegistry};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let stats = StatsRegistry::new();
/// stats.increment(names::CMD_GET, 1).await;
///
/// let snapshot = stats.snapshot().await;
/// assert!(snapshot.iter().any(|(name, value)| name == "cmd_get" && value == "1"));
/// # }
/// ```
#[derive(Debug)]
pub struct StatsRegistry {
    stats: HashMap<String, Stat>,
}

impl StatsRegistry {
    /// Creates a registry holding the built-in metrics.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime (counters spawn their apply
    /// tasks on construction).
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts a builder for adding custom metrics next to the built-ins.
    pub fn builder() -> StatsRegistryBuilder {
        StatsRegistryBuilder::default()
    }

    /// Looks up a metric by name.
    pub fn get(&self, name: &str) -> Option<&Stat> {
        self.stats.get(name)
    }

    /// Looks up a counter by name.
    pub fn counter(&self, name: &str) -> Option<&Counter> {
        match self.stats.get(name) {
            Some(Stat::Counter(counter)) => Some(counter),
            _ => None,
        }
    }

    /// Adds `n` to the named counter. Unknown names are ignored.
    pub async fn increment(&self, name: &str, n: i64) {
        match self.counter(name) {
            Some(counter) => counter.increment(n).await,
            None => debug!(stat = name, "Increment of unknown counter ignored"),
        }
    }

    /// Subtracts `n` from the named counter. Unknown names are ignored.
    pub async fn decrement(&self, name: &str, n: i64) {
        match self.counter(name) {
            Some(counter) => counter.decrement(n).await,
            None => debug!(stat = name, "Decrement of unknown counter ignored"),
        }
    }

    /// Renders every metric, sorted by name.
    ///
    /// Counters are read after the updates already queued for them have been
    /// applied.
    pub async fn snapshot(&self) -> Vec<(String, String)> {
        let mut names: Vec<&String> = self.stats.keys().collect();
        names.sort();

        let mut snapshot = Vec::with_capacity(names.len());
        for name in names {
            let value = self.stats[name].render_settled().await;
            snapshot.push((name.clone(), value));
        }
        snapshot
    }

    /// Metric names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stats.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered metrics.
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// Returns true if no metrics are registered.
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a [`StatsRegistry`]. Once built, the key set cannot change.
pub struct StatsRegistryBuilder {
    queue_capacity: usize,
    custom: Vec<(String, CustomStat)>,
}

enum CustomStat {
    Counter,
    Static(String),
    Computed(Sample),
}

impl Default for StatsRegistryBuilder {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            custom: Vec::new(),
        }
    }
}

impl StatsRegistryBuilder {
    /// Sets the queue capacity of every counter.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Adds a custom counter.
    pub fn counter(mut self, name: impl Into<String>) -> Self {
        self.custom.push((name.into(), CustomStat::Counter));
        self
    }

    /// Adds a value captured now.
    pub fn static_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.push((name.into(), CustomStat::Static(value.into())));
        self
    }

    /// Adds a value sampled on every render.
    pub fn computed<F>(mut self, name: impl Into<String>, sample: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.custom
            .push((name.into(), CustomStat::Computed(Arc::new(sample))));
        self
    }

    /// Builds the registry. Custom metrics replace built-ins of the same name.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn build(self) -> StatsRegistry {
        let mut stats = builtin_stats(self.queue_capacity);

        for (name, stat) in self.custom {
            let stat = match stat {
                CustomStat::Counter => Stat::Counter(Counter::with_capacity(self.queue_capacity)),
                CustomStat::Static(value) => Stat::Static(value),
                CustomStat::Computed(sample) => Stat::Computed(sample),
            };
            stats.insert(name, stat);
        }

        StatsRegistry { stats }
    }
}

fn builtin_stats(queue_capacity: usize) -> HashMap<String, Stat> {
    let mut stats = HashMap::new();

    stats.insert(
        names::PID.to_string(),
        Stat::Static(std::process::id().to_string()),
    );
    stats.insert(
        names::VERSION.to_string(),
        Stat::Static(crate::VERSION.to_string()),
    );
    stats.insert(
        names::POINTER_SIZE.to_string(),
        Stat::Static(usize::BITS.to_string()),
    );
    stats.insert(
        names::UPTIME.to_string(),
        Stat::Timer {
            started: Instant::now(),
        },
    );
    stats.insert(names::TIME.to_string(), computed(unix_time));
    stats.insert(
        names::RUSAGE_USER.to_string(),
        computed(|| format!("{:.6}", rusage::seconds(rusage::Kind::User))),
    );
    stats.insert(
        names::RUSAGE_SYSTEM.to_string(),
        computed(|| format!("{:.6}", rusage::seconds(rusage::Kind::System))),
    );
    stats.insert(
        names::THREADS.to_string(),
        computed(|| runtime_sample(|m| m.num_workers())),
    );
    stats.insert(
        names::TASKS.to_string(),
        computed(|| runtime_sample(|m| m.num_alive_tasks())),
    );

    for name in names::COUNTERS {
        stats.insert(
            name.to_string(),
            Stat::Counter(Counter::with_capacity(queue_capacity)),
        );
    }

    stats
}

fn computed<F>(sample: F) -> Stat
where
    F: Fn() -> String + Send + Sync + 'static,
{
    Stat::Computed(Arc::new(sample))
}

fn unix_time() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        .to_string()
}

fn runtime_sample(read: impl Fn(&tokio::runtime::RuntimeMetrics) -> usize) -> String {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => read(&handle.metrics()).to_string(),
        Err(_) => "0".to_string(),
    }
}

/// Process CPU time from `getrusage(2)`.
mod rusage {
    #[derive(Clone, Copy)]
    pub enum Kind {
        User,
        System,
    }

    #[cfg(unix)]
    pub fn seconds(kind: Kind) -> f64 {
        let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
        // SAFETY: getrusage only writes into the struct we pass it
        let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
        if rc != 0 {
            return 0.0;
        }
        // SAFETY: zero-initialized and filled in by a successful call
        let usage = unsafe { usage.assume_init() };

        let tv = match kind {
            Kind::User => usage.ru_utime,
            Kind::System => usage.ru_stime,
        };
        tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0
    }

    #[cfg(not(unix))]
    pub fn seconds(_kind: Kind) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_metrics_present() {
        let stats = StatsRegistry::new();

        for name in [
            names::PID,
            names::UPTIME,
            names::TIME,
            names::VERSION,
            names::POINTER_SIZE,
            names::RUSAGE_USER,
            names::RUSAGE_SYSTEM,
            names::THREADS,
            names::TASKS,
        ] {
            assert!(stats.get(name).is_some(), "missing {}", name);
        }
        for name in names::COUNTERS {
            assert!(stats.counter(name).is_some(), "missing counter {}", name);
        }
        assert_eq!(stats.len(), 9 + names::COUNTERS.len());
    }

    #[tokio::test]
    async fn test_static_values() {
        let stats = StatsRegistry::new();
        assert_eq!(
            stats.get(names::PID).unwrap().render(),
            std::process::id().to_string()
        );
        assert_eq!(stats.get(names::VERSION).unwrap().render(), crate::VERSION);
        assert!(stats.counter(names::PID).is_none());
    }

    #[tokio::test]
    async fn test_sampled_values_are_numeric() {
        let stats = StatsRegistry::new();

        let time: u64 = stats.get(names::TIME).unwrap().render().parse().unwrap();
        assert!(time > 1_600_000_000);

        let uptime: u64 = stats.get(names::UPTIME).unwrap().render().parse().unwrap();
        assert!(uptime < 5);

        let user: f64 = stats.get(names::RUSAGE_USER).unwrap().render().parse().unwrap();
        assert!(user >= 0.0);

        let tasks: usize = stats.get(names::TASKS).unwrap().render().parse().unwrap();
        assert!(tasks >= names::COUNTERS.len());
    }

    #[tokio::test]
    async fn test_increment_by_name() {
        let stats = StatsRegistry::new();

        stats.increment(names::BYTES_READ, 100).await;
        stats.increment(names::BYTES_READ, 20).await;
        stats.decrement(names::BYTES_READ, 5).await;
        // Unknown and non-counter names are ignored
        stats.increment("no_such_counter", 1).await;
        stats.increment(names::PID, 1).await;

        let counter = stats.counter(names::BYTES_READ).unwrap();
        assert_eq!(counter.settled().await, 115);
    }

    #[tokio::test]
    async fn test_snapshot_sorted_and_settled() {
        let stats = StatsRegistry::new();
        stats.increment(names::CMD_GET, 3).await;

        let snapshot = stats.snapshot().await;
        assert_eq!(snapshot.len(), stats.len());

        let names: Vec<&str> = snapshot.iter().map(|(n, _)| n.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);

        let cmd_get = snapshot.iter().find(|(n, _)| n == "cmd_get").unwrap();
        assert_eq!(cmd_get.1, "3");
    }

    #[tokio::test]
    async fn test_builder_custom_metrics() {
        let stats = StatsRegistry::builder()
            .queue_capacity(8)
            .counter("proxy_upstream_errors")
            .static_value("role", "replica")
            .computed("answer", || "42".to_string())
            .build();

        stats.increment("proxy_upstream_errors", 2).await;

        assert_eq!(
            stats
                .counter("proxy_upstream_errors")
                .unwrap()
                .settled()
                .await,
            2
        );
        assert_eq!(stats.get("role").unwrap().to_string(), "replica");
        assert_eq!(stats.get("answer").unwrap().render(), "42");
        assert!(stats.names().contains(&"answer"));
    }
}

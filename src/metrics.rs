//! Prometheus-style metrics collection for ops observability.
//!
//! Provides atomic counters and gauges exposed via the `/metrics` endpoint
//! in Prometheus text exposition format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::collections::VecDeque;

/// Maximum latency samples to keep for P99 calculation
const LATENCY_WINDOW_SIZE: usize = 1000;

/// Collects and exposes Prometheus-format metrics
pub struct MetricsCollector {
    /// Total document ingestions (completed or failed) since startup
    pub ingestion_count: AtomicU64,
    /// Total search requests since startup
    pub search_count: AtomicU64,
    /// Total cache hits among text searches since startup
    pub cache_hit_count: AtomicU64,
    /// Sliding window of recent search latencies (ms)
    search_latencies: RwLock<VecDeque<f64>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            ingestion_count: AtomicU64::new(0),
            search_count: AtomicU64::new(0),
            cache_hit_count: AtomicU64::new(0),
            search_latencies: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW_SIZE)),
        }
    }

    pub fn record_ingestion(&self) {
        self.ingestion_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a search request with its latency and whether it was served from cache.
    pub fn record_search(&self, latency_ms: f64, cached: bool) {
        self.search_count.fetch_add(1, Ordering::Relaxed);
        if cached {
            self.cache_hit_count.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut latencies) = self.search_latencies.write() {
            if latencies.len() >= LATENCY_WINDOW_SIZE {
                latencies.pop_front();
            }
            latencies.push_back(latency_ms);
        }
    }

    /// Calculate P99 latency from the sliding window
    pub fn get_p99_latency(&self) -> f64 {
        if let Ok(latencies) = self.search_latencies.read() {
            if latencies.is_empty() {
                return 0.0;
            }

            let mut sorted: Vec<f64> = latencies.iter().copied().collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let p99_index = ((sorted.len() as f64) * 0.99).ceil() as usize - 1;
            let p99_index = p99_index.min(sorted.len() - 1);
            sorted[p99_index]
        } else {
            0.0
        }
    }

    /// Get average latency from the sliding window
    pub fn get_avg_latency(&self) -> f64 {
        if let Ok(latencies) = self.search_latencies.read() {
            if latencies.is_empty() {
                return 0.0;
            }
            latencies.iter().sum::<f64>() / latencies.len() as f64
        } else {
            0.0
        }
    }

    /// Get the number of latency samples in the window
    pub fn get_sample_count(&self) -> usize {
        if let Ok(latencies) = self.search_latencies.read() {
            latencies.len()
        } else {
            0
        }
    }

    /// Renders counters and gauges in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        format!(
            "# TYPE knowbase_ingestions_total counter\n\
             knowbase_ingestions_total {}\n\
             # TYPE knowbase_searches_total counter\n\
             knowbase_searches_total {}\n\
             # TYPE knowbase_cache_hits_total counter\n\
             knowbase_cache_hits_total {}\n\
             # TYPE knowbase_search_latency_ms_avg gauge\n\
             knowbase_search_latency_ms_avg {:.3}\n\
             # TYPE knowbase_search_latency_ms_p99 gauge\n\
             knowbase_search_latency_ms_p99 {:.3}\n\
             # TYPE knowbase_rss_bytes gauge\n\
             knowbase_rss_bytes {}\n",
            self.ingestion_count.load(Ordering::Relaxed),
            self.search_count.load(Ordering::Relaxed),
            self.cache_hit_count.load(Ordering::Relaxed),
            self.get_avg_latency(),
            self.get_p99_latency(),
            get_memory_usage_bytes(),
        )
    }
}

/// Get current process memory usage in bytes (RSS)
/// Uses getrusage() which works on both Linux and macOS
pub fn get_memory_usage_bytes() -> u64 {
    #[cfg(unix)]
    {
        use std::mem::MaybeUninit;

        let mut rusage = MaybeUninit::<libc::rusage>::uninit();
        let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, rusage.as_mut_ptr()) };

        if ret == 0 {
            let rusage = unsafe { rusage.assume_init() };
            // ru_maxrss is in kilobytes on Linux, bytes on macOS
            #[cfg(target_os = "macos")]
            {
                rusage.ru_maxrss as u64
            }
            #[cfg(not(target_os = "macos"))]
            {
                (rusage.ru_maxrss as u64) * 1024
            }
        } else {
            0
        }
    }
    #[cfg(not(unix))]
    {
        0
    }
}

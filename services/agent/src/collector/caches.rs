//! Slow-path caches and their refresh workers.
//!
//! The fast collection path must never block on an expensive probe, so
//! temperatures, the process list, the load average, the public IP, and
//! ping latency live in read-write-locked caches that dedicated workers
//! refresh on their own cadences.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use scribe_probes::SlowMetrics;
use scribe_protocol::ProcessSample;
use tokio::sync::watch;

use super::Collector;

pub const SLOW_INTERVAL: Duration = Duration::from_secs(2);
pub const PROCESS_INTERVAL: Duration = Duration::from_secs(30);
pub const PUBLIC_IP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);
pub const PUBLIC_IP_TIMEOUT: Duration = Duration::from_secs(5);
pub const TOP_PROCESS_COUNT: usize = 10;

const PUBLIC_IP_URL: &str = "https://api.ipify.org";

// ---------------------------------------------------------------------------
// Caches
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SharedCaches {
    pub slow: RwLock<SlowMetrics>,
    pub processes: RwLock<Vec<ProcessSample>>,
    pub load_avg: RwLock<Option<f64>>,
    pub public_ip: RwLock<Option<String>>,
    pub ping_ms: RwLock<Option<f64>>,
}

impl SharedCaches {
    pub fn slow_snapshot(&self) -> SlowMetrics {
        self.slow.read().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn processes_snapshot(&self) -> Vec<ProcessSample> {
        self.processes.read().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn load_avg_snapshot(&self) -> Option<f64> {
        self.load_avg.read().ok().and_then(|g| *g)
    }

    pub fn public_ip_snapshot(&self) -> Option<String> {
        self.public_ip.read().ok().and_then(|g| g.clone())
    }

    pub fn ping_snapshot(&self) -> Option<f64> {
        self.ping_ms.read().ok().and_then(|g| *g)
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Temperatures and ping, every two seconds.
pub async fn run_slow_worker(collector: Arc<Collector>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let slow = {
            let mut probe = collector.lock_probe();
            probe.sample_slow()
        };
        if let Ok(mut cache) = collector.caches.slow.write() {
            *cache = slow;
        }

        let ping =
            scribe_probes::ping_host(&collector.connection_address, PING_TIMEOUT).await;
        if let Ok(mut cache) = collector.caches.ping_ms.write() {
            // A failed probe keeps nothing: ping is a live measurement, a
            // stale value would misreport the link.
            *cache = ping;
        }

        tokio::select! {
            _ = tokio::time::sleep(SLOW_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }
}

/// Top processes and load average, every thirty seconds.
pub async fn run_process_worker(collector: Arc<Collector>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let (processes, load) = {
            let mut probe = collector.lock_probe();
            (probe.top_processes(TOP_PROCESS_COUNT), probe.load_avg())
        };
        if let Ok(mut cache) = collector.caches.processes.write() {
            *cache = processes;
        }
        if let Ok(mut cache) = collector.caches.load_avg.write() {
            *cache = load;
        }

        tokio::select! {
            _ = tokio::time::sleep(PROCESS_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }
}

/// Public IP, every five minutes.  A fetch failure keeps the cached value.
pub async fn run_public_ip_worker(collector: Arc<Collector>, mut shutdown: watch::Receiver<bool>) {
    let client = reqwest::Client::new();
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Some(ip) =
            scribe_probes::fetch_public_ip(&client, PUBLIC_IP_URL, PUBLIC_IP_TIMEOUT).await
        {
            if let Ok(mut cache) = collector.caches.public_ip.write() {
                *cache = Some(ip);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(PUBLIC_IP_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }
}

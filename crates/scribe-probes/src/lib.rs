// scribe-probes: Host telemetry probe layer.
//
// The agent core never touches OS sensors directly; it talks to the `Probe`
// trait.  `HostProbe` is the sysinfo-backed implementation; the mock probe
// (feature `test-support`) returns scripted samples so the pipeline is
// testable on hosts without real sensors.
//
// Rate semantics: `sample_basic` emits differential rates computed against
// the previous counter snapshot.  The first call after construction has no
// previous snapshot and zero-fills every rate field.

use scribe_protocol::{DiskSample, ProcessSample, SystemInfo};

pub mod host;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use host::HostProbe;

// ---------------------------------------------------------------------------
// Sample types
// ---------------------------------------------------------------------------

/// Cheap counters gathered synchronously on every collector tick.
#[derive(Debug, Clone, Default)]
pub struct BasicMetrics {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub net_in_bps: u64,
    pub net_out_bps: u64,
    pub disk_read_bps: u64,
    pub disk_write_bps: u64,
    pub disks: Vec<DiskSample>,
    pub is_vm: bool,
}

/// Expensive readings refreshed by the slow worker, never on the fast path.
#[derive(Debug, Clone, Default)]
pub struct SlowMetrics {
    pub cpu_temp_c: Option<f32>,
    pub gpu_temp_c: Option<f32>,
    pub cpu_name: Option<String>,
    pub gpu_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Probe trait
// ---------------------------------------------------------------------------

/// OS sensor adapter.
///
/// A probe failure never fails the sample: implementations return zeroed or
/// empty values and the collector carries on.
pub trait Probe: Send {
    /// Fast-path counters.  Rates are differentials against the previous
    /// call; the first call zero-fills them.
    fn sample_basic(&mut self) -> BasicMetrics;

    /// Slow-path sensor readings (temperatures, device names).
    fn sample_slow(&mut self) -> SlowMetrics;

    /// Top `n` processes by CPU usage.
    fn top_processes(&mut self, n: usize) -> Vec<ProcessSample>;

    /// One-minute load average, where the platform reports one.
    fn load_avg(&mut self) -> Option<f64>;

    /// Full host inventory for the once-per-connection descriptor.
    fn system_info(&mut self) -> SystemInfo;
}

/// OS hostname, where the platform reports one.
pub fn hostname() -> Option<String> {
    sysinfo::System::host_name()
}

// ---------------------------------------------------------------------------
// Async probes (network-bound; used by dedicated workers, not the trait)
// ---------------------------------------------------------------------------

/// Measure TCP connect latency to `addr` ("host:port") in milliseconds.
///
/// Returns None on timeout or connect failure.
pub async fn ping_host(addr: &str, timeout: std::time::Duration) -> Option<f64> {
    let started = std::time::Instant::now();
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => Some(started.elapsed().as_secs_f64() * 1000.0),
        _ => None,
    }
}

/// Fetch the host's public IP from a plain-text echo service.
///
/// Returns None on any failure; the cached previous value stays in use.
pub async fn fetch_public_ip(
    client: &reqwest::Client,
    url: &str,
    timeout: std::time::Duration,
) -> Option<String> {
    let response = client.get(url).timeout(timeout).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    let body = response.text().await.ok()?;
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.len() > 64 {
        return None;
    }
    Some(trimmed.to_owned())
}

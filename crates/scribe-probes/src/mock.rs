//! Scripted probe for tests.
//!
//! Returns fixed values, optionally advancing a counter so successive samples
//! are distinguishable.  Shared-state handles let a test inspect how many
//! samples the pipeline pulled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use scribe_protocol::{ProcessSample, SystemInfo};

use crate::{BasicMetrics, Probe, SlowMetrics};

/// Deterministic probe: cpu_percent counts up by one per sample from a base.
pub struct MockProbe {
    base_cpu: f32,
    calls: Arc<AtomicU64>,
}

impl MockProbe {
    pub fn new() -> Self {
        MockProbe {
            base_cpu: 10.0,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle that reports how many `sample_basic` calls happened.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

impl Default for MockProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for MockProbe {
    fn sample_basic(&mut self) -> BasicMetrics {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        BasicMetrics {
            cpu_percent: self.base_cpu + n as f32,
            ram_percent: 50.0,
            // First sample after init carries zero rates, like the real probe.
            net_in_bps: if n == 0 { 0 } else { 1000 + n },
            net_out_bps: if n == 0 { 0 } else { 500 + n },
            disk_read_bps: 0,
            disk_write_bps: if n == 0 { 0 } else { 200 },
            disks: vec![],
            is_vm: false,
        }
    }

    fn sample_slow(&mut self) -> SlowMetrics {
        SlowMetrics {
            cpu_temp_c: Some(42.0),
            gpu_temp_c: None,
            cpu_name: Some("MockCPU".to_owned()),
            gpu_name: None,
        }
    }

    fn top_processes(&mut self, n: usize) -> Vec<ProcessSample> {
        (0..n.min(3))
            .map(|i| ProcessSample {
                pid: 100 + i as u32,
                name: format!("proc-{i}"),
                cpu_percent: 30.0 - i as f32,
                ram_percent: 5.0,
            })
            .collect()
    }

    fn load_avg(&mut self) -> Option<f64> {
        Some(0.42)
    }

    fn system_info(&mut self) -> SystemInfo {
        SystemInfo {
            os_name: "MockOS".to_owned(),
            os_version: "1.0".to_owned(),
            cpu_model: "MockCPU".to_owned(),
            cpu_cores: 4,
            ram_total_bytes: 8 * 1024 * 1024 * 1024,
            disks: vec![],
            interfaces: vec![],
            product_name: None,
            firmware_vendor: None,
            is_vm: false,
            is_container: false,
        }
    }
}

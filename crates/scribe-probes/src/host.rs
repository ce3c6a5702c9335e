//! sysinfo-backed host probe.
//!
//! Fast-path counters come from `System`, `Networks`, and `Disks`; the first
//! `sample_basic` call after construction zero-fills all rate fields because
//! there is no previous counter snapshot to diff against.
//!
//! Temperature readout searches component labels for CPU/GPU markers; hosts
//! without readable sensors simply report None.

use std::path::Path;
use std::time::Instant;

use scribe_protocol::{DiskInfo, DiskSample, NetworkInterfaceInfo, ProcessSample, SystemInfo};
use sysinfo::{Components, Disks, Networks, ProcessesToUpdate, System};

use crate::{BasicMetrics, Probe, SlowMetrics};

// ---------------------------------------------------------------------------
// Counter snapshot for rate computation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct CounterSnapshot {
    taken: Instant,
    net_rx: u64,
    net_tx: u64,
    disk_read: u64,
    disk_write: u64,
}

// ---------------------------------------------------------------------------
// HostProbe
// ---------------------------------------------------------------------------

/// Production probe backed by the `sysinfo` crate.
pub struct HostProbe {
    sys: System,
    networks: Networks,
    disks: Disks,
    prev: Option<CounterSnapshot>,
    /// Per-device previous (read, written) totals for per-disk rates.
    prev_disk_io: std::collections::HashMap<String, (u64, u64)>,
    is_vm: bool,
}

impl HostProbe {
    pub fn new() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();
        HostProbe {
            sys,
            networks: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            prev: None,
            prev_disk_io: std::collections::HashMap::new(),
            is_vm: detect_vm(),
        }
    }

    fn net_totals(&self) -> (u64, u64) {
        let mut rx = 0u64;
        let mut tx = 0u64;
        for (_name, data) in self.networks.iter() {
            rx += data.total_received();
            tx += data.total_transmitted();
        }
        (rx, tx)
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for HostProbe {
    fn sample_basic(&mut self) -> BasicMetrics {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.networks.refresh(false);
        self.disks.refresh(false);

        let cpu_percent = self.sys.global_cpu_usage();
        let ram_percent = {
            let total = self.sys.total_memory();
            if total > 0 {
                (self.sys.used_memory() as f64 / total as f64 * 100.0) as f32
            } else {
                0.0
            }
        };

        let now = Instant::now();
        let (net_rx, net_tx) = self.net_totals();
        let (disk_read, disk_write) = {
            let mut read = 0u64;
            let mut write = 0u64;
            for disk in self.disks.iter() {
                let usage = disk.usage();
                read += usage.total_read_bytes;
                write += usage.total_written_bytes;
            }
            (read, write)
        };

        let (net_in_bps, net_out_bps, disk_read_bps, disk_write_bps, elapsed) = match self.prev {
            Some(prev) => {
                let dt = now.duration_since(prev.taken).as_secs_f64();
                if dt > 0.0 {
                    (
                        rate(net_rx, prev.net_rx, dt),
                        rate(net_tx, prev.net_tx, dt),
                        rate(disk_read, prev.disk_read, dt),
                        rate(disk_write, prev.disk_write, dt),
                        dt,
                    )
                } else {
                    (0, 0, 0, 0, 0.0)
                }
            }
            // First sample after (re)init: rates are undefined, zero-fill.
            None => (0, 0, 0, 0, 0.0),
        };

        let disks = self.per_disk_samples(elapsed);

        self.prev = Some(CounterSnapshot {
            taken: now,
            net_rx,
            net_tx,
            disk_read,
            disk_write,
        });

        BasicMetrics {
            cpu_percent,
            ram_percent,
            net_in_bps,
            net_out_bps,
            disk_read_bps,
            disk_write_bps,
            disks,
            is_vm: self.is_vm,
        }
    }

    fn sample_slow(&mut self) -> SlowMetrics {
        let components = Components::new_with_refreshed_list();
        let cpu_temp_c = components
            .iter()
            .find(|c| {
                let label = c.label().to_lowercase();
                label.contains("cpu") || label.contains("core") || label.contains("soc")
            })
            .and_then(|c| c.temperature());
        let gpu_temp_c = components
            .iter()
            .find(|c| {
                let label = c.label().to_lowercase();
                label.contains("gpu") || label.contains("video")
            })
            .and_then(|c| c.temperature());

        let cpu_name = self
            .sys
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_owned())
            .filter(|s| !s.is_empty());

        SlowMetrics {
            cpu_temp_c,
            gpu_temp_c,
            cpu_name,
            // Discrete GPU enumeration needs vendor channels; label search is
            // the portable ceiling here.
            gpu_name: None,
        }
    }

    fn top_processes(&mut self, n: usize) -> Vec<ProcessSample> {
        self.sys.refresh_processes(ProcessesToUpdate::All, true);
        let total_mem = self.sys.total_memory().max(1);

        let mut procs: Vec<ProcessSample> = self
            .sys
            .processes()
            .iter()
            .map(|(pid, p)| ProcessSample {
                pid: pid.as_u32(),
                name: p.name().to_string_lossy().into_owned(),
                cpu_percent: p.cpu_usage(),
                ram_percent: (p.memory() as f64 / total_mem as f64 * 100.0) as f32,
            })
            .collect();
        procs.sort_by(|a, b| {
            b.cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        procs.truncate(n);
        procs
    }

    fn load_avg(&mut self) -> Option<f64> {
        let load = System::load_average();
        // Windows reports zeroes across the board; treat that as absent.
        if load.one == 0.0 && load.five == 0.0 && load.fifteen == 0.0 {
            None
        } else {
            Some(load.one)
        }
    }

    fn system_info(&mut self) -> SystemInfo {
        self.sys.refresh_memory();
        self.networks.refresh(true);
        self.disks.refresh(true);

        let interfaces = self
            .networks
            .iter()
            .map(|(name, data)| NetworkInterfaceInfo {
                name: name.clone(),
                mac: data.mac_address().to_string(),
            })
            .collect();

        let disks = self
            .disks
            .iter()
            .map(|d| DiskInfo {
                mount: d.mount_point().to_string_lossy().into_owned(),
                device: d.name().to_string_lossy().into_owned(),
                total_bytes: d.total_space(),
            })
            .collect();

        SystemInfo {
            os_name: System::name().unwrap_or_else(|| "unknown".to_owned()),
            os_version: System::os_version().unwrap_or_else(|| "unknown".to_owned()),
            cpu_model: self
                .sys
                .cpus()
                .first()
                .map(|c| c.brand().trim().to_owned())
                .unwrap_or_default(),
            cpu_cores: self.sys.cpus().len(),
            ram_total_bytes: self.sys.total_memory(),
            disks,
            interfaces,
            product_name: read_dmi("product_name"),
            firmware_vendor: read_dmi("bios_vendor"),
            is_vm: self.is_vm,
            is_container: detect_container(),
        }
    }
}

impl HostProbe {
    fn per_disk_samples(&mut self, elapsed: f64) -> Vec<DiskSample> {
        let mut out = Vec::with_capacity(self.disks.iter().count());
        for disk in self.disks.iter() {
            let device = disk.name().to_string_lossy().into_owned();
            let total = disk.total_space();
            let usage_percent = if total > 0 {
                ((total - disk.available_space()) as f64 / total as f64 * 100.0) as f32
            } else {
                0.0
            };
            let io = disk.usage();
            let (read_bps, write_bps) = match self.prev_disk_io.get(&device) {
                Some(&(prev_read, prev_write)) if elapsed > 0.0 => (
                    rate(io.total_read_bytes, prev_read, elapsed),
                    rate(io.total_written_bytes, prev_write, elapsed),
                ),
                _ => (0, 0),
            };
            self.prev_disk_io
                .insert(device.clone(), (io.total_read_bytes, io.total_written_bytes));
            out.push(DiskSample {
                mount: disk.mount_point().to_string_lossy().into_owned(),
                device,
                usage_percent,
                read_bps,
                write_bps,
            });
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rate(current: u64, previous: u64, elapsed_secs: f64) -> u64 {
    (current.saturating_sub(previous) as f64 / elapsed_secs) as u64
}

fn read_dmi(field: &str) -> Option<String> {
    let path = format!("/sys/class/dmi/id/{field}");
    let value = std::fs::read_to_string(path).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn detect_vm() -> bool {
    const MARKERS: [&str; 7] = [
        "vmware",
        "virtualbox",
        "kvm",
        "qemu",
        "xen",
        "hyper-v",
        "parallels",
    ];
    for field in ["product_name", "sys_vendor", "bios_vendor"] {
        if let Some(value) = read_dmi(field) {
            let lower = value.to_lowercase();
            if MARKERS.iter().any(|m| lower.contains(m)) {
                return true;
            }
        }
    }
    false
}

fn detect_container() -> bool {
    if Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists() {
        return true;
    }
    match std::fs::read_to_string("/proc/1/cgroup") {
        Ok(content) => content.contains("docker") || content.contains("lxc"),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_basic_sample_zero_fills_rates() {
        let mut probe = HostProbe::new();
        let basic = probe.sample_basic();
        assert_eq!(basic.net_in_bps, 0);
        assert_eq!(basic.net_out_bps, 0);
        assert_eq!(basic.disk_read_bps, 0);
        assert_eq!(basic.disk_write_bps, 0);
    }

    #[test]
    fn ram_percent_is_bounded() {
        let mut probe = HostProbe::new();
        let basic = probe.sample_basic();
        assert!(basic.ram_percent >= 0.0);
        assert!(basic.ram_percent <= 100.0);
    }

    #[test]
    fn top_processes_respects_n_and_order() {
        let mut probe = HostProbe::new();
        let procs = probe.top_processes(10);
        assert!(procs.len() <= 10);
        for pair in procs.windows(2) {
            assert!(pair[0].cpu_percent >= pair[1].cpu_percent);
        }
    }

    #[test]
    fn system_info_has_inventory() {
        let mut probe = HostProbe::new();
        let info = probe.system_info();
        assert!(info.cpu_cores > 0);
        assert!(info.ram_total_bytes > 0);
    }
}

//! Disk size cap enforcement.
//!
//! The durable store never grows past the configured cap: exceeding it
//! prunes the oldest tenth by timestamp in one transaction, so the newest
//! data always survives.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use scribe_agent::buffer::{BufferStore, OfflineBuffer};
use scribe_protocol::{BufferedMetric, MetricSample};

fn entry(n: i64) -> BufferedMetric {
    BufferedMetric {
        agent_id: "agent-prune".to_owned(),
        hostname: "host".to_owned(),
        sample: MetricSample {
            timestamp: Utc.timestamp_opt(1_770_000_000 + n, 0).unwrap(),
            cpu_percent: n as f32,
            ram_percent: 0.0,
            net_in_bps: 0,
            net_out_bps: 0,
            disk_read_bps: 0,
            disk_write_bps: 0,
            ping_ms: Some(1.0),
            cpu_temp_c: Some(40.0),
            gpu_temp_c: None,
            cpu_name: Some("cpu-model-string-for-padding".to_owned()),
            gpu_name: None,
            is_vm: false,
            disks: vec![],
        },
        top_processes: vec![],
        load_avg: Some(0.5),
        public_ip: Some("198.51.100.77".to_owned()),
        persisted: false,
    }
}

#[test]
fn store_prunes_oldest_tenth_when_over_cap() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("scribe_buffer.db");

    // Tiny cap: 16 KiB fills after a few dozen entries.
    let cap_bytes: u64 = 16 * 1024;
    let store = BufferStore::open(&db).unwrap();
    let buffer = OfflineBuffer::new(10_000, Duration::from_secs(3600), cap_bytes, Some(store));

    for n in 0..400 {
        buffer.add(entry(n));
    }

    let surviving = buffer.load_from_disk();
    assert!(surviving < 400, "pruning happened, {surviving} rows remain");
    assert!(surviving > 0, "newest data survives");

    // The oldest entries went first.
    let all = {
        let store = BufferStore::open(&db).unwrap();
        store.load_all().unwrap()
    };
    assert!(
        all.first().unwrap().sample.timestamp > Utc.timestamp_opt(1_770_000_000, 0).unwrap(),
        "oldest rows were pruned"
    );
    let newest = all.last().unwrap();
    assert_eq!(
        newest.sample.timestamp,
        Utc.timestamp_opt(1_770_000_399, 0).unwrap(),
        "latest entry survives"
    );

    // File size stays in the cap's neighborhood (one enforcement cycle of
    // slack allowed).
    let file_len = std::fs::metadata(&db).unwrap().len();
    assert!(
        file_len < cap_bytes * 4,
        "file size bounded, got {file_len}"
    );
}

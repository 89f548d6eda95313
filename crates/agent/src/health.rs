use std::path::Path;
use std::time::Duration;

use sysinfo::{Disks, System};
use tokio_util::sync::CancellationToken;

use agent_protocol::{HealthFrame, Outbound};

use crate::sink::OutboundSink;

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically samples system resources and reports them upstream. The first
/// sample goes out immediately so a fresh connection is not blind for a
/// minute.
pub fn spawn_sampler(sink: OutboundSink, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut system = System::new();
        let mut tick = tokio::time::interval(SAMPLE_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick.tick() => {
                    let frame = sample(&mut system);
                    if let Err(err) = sink.send(Outbound::Health(frame)) {
                        tracing::debug!(error = %err, "dropping health frame");
                    }
                }
            }
        }
    })
}

pub fn sample(system: &mut System) -> HealthFrame {
    system.refresh_cpu();
    system.refresh_memory();

    let (disk_used, disk_total) = root_disk_usage();
    let load = System::load_average();

    HealthFrame {
        cpu_percent: f64::from(system.global_cpu_info().cpu_usage()),
        memory_used: system.used_memory(),
        memory_total: system.total_memory(),
        disk_used,
        disk_total,
        load_avg: vec![load.one, load.five, load.fifteen],
    }
}

fn root_disk_usage() -> (u64, u64) {
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .or_else(|| disks.list().first());

    match root {
        Some(disk) => {
            let total = disk.total_space();
            (total.saturating_sub(disk.available_space()), total)
        }
        None => (0, 0),
    }
}

//! Host metrics of the machine the beat runs on

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sysinfo::System;
use tracing::trace;

use crate::MetricSample;

use super::{AdapterError, AdapterResult, MetricSource};

/// Polls cpu usage, memory, swap and load average via `sysinfo`.
///
/// CPU usage is the average across all cores since the previous poll, so the
/// very first poll reports whatever `sysinfo` measured at construction.
pub struct SystemSource {
    system: Arc<Mutex<System>>,
    host: String,
}

impl SystemSource {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();

        Self {
            system: Arc::new(Mutex::new(system)),
            host: System::host_name().unwrap_or_else(|| String::from("unknown")),
        }
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for SystemSource {
    fn name(&self) -> &str {
        "system"
    }

    async fn poll(&self) -> AdapterResult<Vec<MetricSample>> {
        let system = self.system.clone();
        let host = self.host.clone();

        tokio::task::spawn_blocking(move || {
            let mut sys = system
                .lock()
                .map_err(|_| AdapterError::permanent("system info lock poisoned"))?;
            sys.refresh_cpu_usage();
            sys.refresh_memory();

            let now = Utc::now();
            let load = System::load_average();

            let samples: Vec<MetricSample> = [
                ("system.cpu.usage", sys.global_cpu_usage() as f64),
                ("system.memory.used", sys.used_memory() as f64),
                ("system.memory.total", sys.total_memory() as f64),
                ("system.swap.used", sys.used_swap() as f64),
                ("system.load.1", load.one),
            ]
            .into_iter()
            .map(|(name, value)| MetricSample::new(name, value, now).with_tag("host", &host))
            .collect();

            trace!("collected {} host samples", samples.len());
            Ok::<_, AdapterError>(samples)
        })
        .await
        .map_err(|e| AdapterError::transient(format!("system poll task failed: {e}")))?
    }
}

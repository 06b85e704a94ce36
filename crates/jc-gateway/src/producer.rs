//! Periodic `system_metrics` publisher.
//!
//! Samples CPU and memory on a fixed interval and broadcasts a snapshot.
//! Ticks with no connected clients skip sampling entirely.

use crate::domain::config::ProducerConfig;
use jc_hub::{Event, EventHub, EventKind, Payload};
use serde::Serialize;
use std::time::Duration;
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// One CPU/memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

impl SystemSnapshot {
    pub fn new(cpu_percent: f32, memory_used_bytes: u64, memory_total_bytes: u64) -> Self {
        let memory_percent = if memory_total_bytes == 0 {
            0.0
        } else {
            (memory_used_bytes as f64 / memory_total_bytes as f64 * 100.0) as f32
        };
        Self {
            cpu_percent,
            memory_percent,
            memory_used_bytes,
            memory_total_bytes,
        }
    }

    pub fn to_payload(&self) -> Payload {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Payload::new(),
        }
    }
}

/// Source of system readings.
pub trait Sampler: Send + 'static {
    fn sample(&mut self) -> SystemSnapshot;
}

/// [`Sampler`] backed by `sysinfo`.
pub struct SysinfoSampler {
    system: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta; prime the first reading.
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SysinfoSampler {
    fn sample(&mut self) -> SystemSnapshot {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        SystemSnapshot::new(
            self.system.global_cpu_usage(),
            self.system.used_memory(),
            self.system.total_memory(),
        )
    }
}

/// Publishes [`EventKind::SystemMetrics`] while anyone is listening.
pub struct SystemMetricsProducer<S = SysinfoSampler> {
    hub: EventHub,
    sampler: S,
    interval: Duration,
}

impl SystemMetricsProducer<SysinfoSampler> {
    pub fn new(hub: EventHub, config: &ProducerConfig) -> Self {
        Self::with_sampler(hub, SysinfoSampler::new(), config.interval)
    }
}

impl<S: Sampler> SystemMetricsProducer<S> {
    pub fn with_sampler(hub: EventHub, sampler: S, interval: Duration) -> Self {
        Self {
            hub,
            sampler,
            interval,
        }
    }

    /// One tick: sample and broadcast, unless there are no clients.
    /// Returns whether a sample was taken.
    pub fn tick(&mut self) -> bool {
        if self.hub.client_count() == 0 {
            return false;
        }
        let snapshot = self.sampler.sample();
        debug!(
            cpu = snapshot.cpu_percent,
            memory = snapshot.memory_percent,
            "Publishing system metrics"
        );
        self.hub
            .broadcast(Event::new(EventKind::SystemMetrics, snapshot.to_payload()));
        true
    }

    /// Run until the task is aborted.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "System metrics producer started");
        loop {
            ticker.tick().await;
            self.tick();
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

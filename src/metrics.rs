//! Prometheus-compatible metrics endpoint
//!
//! Exposes realtime server metrics in Prometheus text format.
//! Default endpoint: http://localhost:9090/metrics

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

const TICK_HISTORY_LEN: usize = 1000;

/// Metrics registry for the realtime server
#[derive(Debug)]
pub struct Metrics {
    // Population
    pub sessions_active: AtomicU64,
    pub connections_active: AtomicU64,
    pub npc_count: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Network
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,

    // Movement and input
    pub movement_corrections: AtomicU64,
    pub inputs_rate_limited: AtomicU64,
    pub joins_rejected: AtomicU64,

    // Persistence
    pub persistence_writes: AtomicU64,
    pub persistence_failures: AtomicU64,
    pub persistence_skipped: AtomicU64,
    pub full_syncs: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_active: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            npc_count: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            movement_corrections: AtomicU64::new(0),
            inputs_rate_limited: AtomicU64::new(0),
            joins_rejected: AtomicU64::new(0),
            persistence_writes: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            persistence_skipped: AtomicU64::new(0),
            full_syncs: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY_LEN)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY_LEN {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us
                .store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("regnum_sessions_active", "Players currently in the world", "gauge",
            self.sessions_active.load(Ordering::Relaxed));
        metric!("regnum_connections_active", "Open WebTransport connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("regnum_npcs", "NPCs in the world roster", "gauge",
            self.npc_count.load(Ordering::Relaxed));

        metric!("regnum_tick_time_microseconds", "Last tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("regnum_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("regnum_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("regnum_tick_time_max_microseconds", "Maximum tick time in the window", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("regnum_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        metric!("regnum_messages_sent_total", "Messages queued to clients", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("regnum_messages_received_total", "Messages received from clients", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("regnum_messages_dropped_total", "Messages dropped on full outbound queues", "counter",
            self.messages_dropped.load(Ordering::Relaxed));
        metric!("regnum_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("regnum_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));

        metric!("regnum_movement_corrections_total", "Rejected position submissions", "counter",
            self.movement_corrections.load(Ordering::Relaxed));
        metric!("regnum_inputs_rate_limited_total", "Inputs dropped by the rate limiter", "counter",
            self.inputs_rate_limited.load(Ordering::Relaxed));
        metric!("regnum_joins_rejected_total", "Join requests rejected", "counter",
            self.joins_rejected.load(Ordering::Relaxed));

        metric!("regnum_persistence_writes_total", "Character state writes completed", "counter",
            self.persistence_writes.load(Ordering::Relaxed));
        metric!("regnum_persistence_failures_total", "Character state writes failed", "counter",
            self.persistence_failures.load(Ordering::Relaxed));
        metric!("regnum_persistence_skipped_total", "Writes skipped while one was in flight", "counter",
            self.persistence_skipped.load(Ordering::Relaxed));
        metric!("regnum_full_syncs_total", "Periodic full sync passes", "counter",
            self.full_syncs.load(Ordering::Relaxed));

        metric!("regnum_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON snapshot for direct API access
    pub fn to_json(&self) -> String {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        serde_json::json!({
            "population": {
                "sessions": load(&self.sessions_active),
                "connections": load(&self.connections_active),
                "npcs": load(&self.npc_count),
            },
            "performance": {
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_p99_us": load(&self.tick_time_p99_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
                "tick_count": load(&self.tick_count),
            },
            "network": {
                "messages_sent": load(&self.messages_sent),
                "messages_received": load(&self.messages_received),
                "messages_dropped": load(&self.messages_dropped),
                "bytes_sent": load(&self.bytes_sent),
                "bytes_received": load(&self.bytes_received),
            },
            "movement": {
                "corrections": load(&self.movement_corrections),
                "rate_limited": load(&self.inputs_rate_limited),
                "joins_rejected": load(&self.joins_rejected),
            },
            "persistence": {
                "writes": load(&self.persistence_writes),
                "failures": load(&self.persistence_failures),
                "skipped": load(&self.persistence_skipped),
                "full_syncs": load(&self.full_syncs),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Build the HTTP response for one raw request
fn route_request(metrics: &Metrics, request: &str) -> String {
    if request.starts_with("GET /metrics/json") || request.starts_with("GET /json") {
        http_response("application/json", &metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        http_response("text/plain; version=0.0.4", &metrics.to_prometheus())
    } else if request.starts_with("GET /health") || request.starts_with("GET / ") {
        http_response("text/plain", "OK")
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route_request(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use baton_token::SubstrateStats;

#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    next_session_id: AtomicU64,

    sessions_active: AtomicU64,
    sessions_total: AtomicU64,
    sessions_rejected_total: AtomicU64,

    operations_total: AtomicU64,
    protocol_errors_total: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                next_session_id: AtomicU64::new(1),
                sessions_active: AtomicU64::new(0),
                sessions_total: AtomicU64::new(0),
                sessions_rejected_total: AtomicU64::new(0),
                operations_total: AtomicU64::new(0),
                protocol_errors_total: AtomicU64::new(0),
            }),
        }
    }

    pub fn next_session_id(&self) -> u64 {
        self.inner.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn session_opened(&self) {
        self.inner.sessions_total.fetch_add(1, Ordering::Relaxed);
        self.inner.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.inner.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn session_rejected(&self) {
        self.inner
            .sessions_rejected_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn operation(&self) {
        self.inner.operations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.inner
            .protocol_errors_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Prometheus text exposition of the session counters plus the substrate's own stats.
    pub fn render_prometheus(&self, substrate: SubstrateStats) -> String {
        let sessions_active = self.inner.sessions_active.load(Ordering::Relaxed);
        let sessions_total = self.inner.sessions_total.load(Ordering::Relaxed);
        let sessions_rejected_total = self.inner.sessions_rejected_total.load(Ordering::Relaxed);
        let operations_total = self.inner.operations_total.load(Ordering::Relaxed);
        let protocol_errors_total = self.inner.protocol_errors_total.load(Ordering::Relaxed);

        let mut out = String::new();
        push_gauge(&mut out, "baton_sessions_active", sessions_active);
        push_counter(&mut out, "baton_sessions_total", sessions_total);
        push_counter(
            &mut out,
            "baton_sessions_rejected_total",
            sessions_rejected_total,
        );
        push_counter(&mut out, "baton_operations_total", operations_total);
        push_counter(&mut out, "baton_protocol_errors_total", protocol_errors_total);
        push_gauge(&mut out, "baton_tokens_active", substrate.tokens);
        push_counter(&mut out, "baton_grants_total", substrate.grants_total);
        push_counter(&mut out, "baton_handoffs_total", substrate.handoffs_total);
        push_counter(
            &mut out,
            "baton_ack_timeouts_total",
            substrate.ack_timeouts_total,
        );
        out
    }
}

fn push_gauge(out: &mut String, name: &str, val: u64) {
    push_sample(out, name, "gauge", val);
}

fn push_counter(out: &mut String, name: &str, val: u64) {
    push_sample(out, name, "counter", val);
}

fn push_sample(out: &mut String, name: &str, kind: &str, val: u64) {
    out.push_str("# TYPE ");
    out.push_str(name);
    out.push(' ');
    out.push_str(kind);
    out.push('\n');
    out.push_str(name);
    out.push(' ');
    out.push_str(&val.to_string());
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_session_and_substrate_samples() {
        let metrics = Metrics::new();
        metrics.session_opened();
        metrics.session_opened();
        metrics.session_closed();
        metrics.protocol_error();

        let body = metrics.render_prometheus(SubstrateStats {
            tokens: 3,
            grants_total: 5,
            handoffs_total: 2,
            ack_timeouts_total: 1,
        });
        assert!(body.contains("# TYPE baton_sessions_active gauge\nbaton_sessions_active 1\n"));
        assert!(body.contains("baton_sessions_total 2\n"));
        assert!(body.contains("baton_protocol_errors_total 1\n"));
        assert!(body.contains("# TYPE baton_grants_total counter\nbaton_grants_total 5\n"));
        assert!(body.contains("baton_tokens_active 3\n"));
        assert!(body.contains("baton_ack_timeouts_total 1\n"));
    }

    #[test]
    fn session_ids_are_unique() {
        let metrics = Metrics::new();
        let a = metrics.next_session_id();
        let b = metrics.clone().next_session_id();
        assert_ne!(a, b);
    }
}

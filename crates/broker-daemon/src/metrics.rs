//! Process-local counters exposed as a Prometheus text file (spec §4.10).
//!
//! The Metrics Writer periodically renders [`Metrics::render`] to
//! `{BROKER_HOME}/metrics.prom` via an atomic write. Counters are plain
//! `AtomicU64`s rendered by hand rather than pulled from a metrics crate
//! (see DESIGN.md).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

macro_rules! counters {
    ($($field:ident => $name:literal, $help:literal),* $(,)?) => {
        #[derive(Debug, Default)]
        pub struct Metrics {
            $(pub $field: AtomicU64,)*
            pub message_queue_size: AtomicI64,
        }

        impl Metrics {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn render(&self) -> String {
                let mut out = String::new();
                $(
                    out.push_str(&format!(
                        "# HELP {0} {2}\n# TYPE {0} counter\n{0} {1}\n",
                        $name,
                        self.$field.load(Ordering::Relaxed),
                        $help,
                    ));
                )*
                out.push_str(
                    "# HELP broker_message_queue_size Pending delivery tasks waiting on a worker\n\
                     # TYPE broker_message_queue_size gauge\n",
                );
                out.push_str(&format!(
                    "broker_message_queue_size {}\n",
                    self.message_queue_size.load(Ordering::Relaxed)
                ));
                out
            }
        }
    };
}

counters! {
    messages_total => "broker_messages_total", "Messages successfully injected into their recipient session",
    messages_failed_rate_total => "broker_messages_failed_rate_total", "Messages archived after rate-limit rejection",
    messages_failed_expired_total => "broker_messages_failed_expired_total", "Messages archived after exceeding message_ttl_seconds",
    messages_failed_parse_total => "broker_messages_failed_parse_total", "Messages archived after failing to parse as JSON",
    messages_failed_undeliverable_total => "broker_messages_failed_undeliverable_total", "Messages archived after recipient resolution exhausted retries",
    messages_failed_inject_total => "broker_messages_failed_inject_total", "Messages archived after relay injection exhausted retries",
    injections_total => "broker_injections_total", "Successful relay prompt injections",
    injections_retried_total => "broker_injections_retried_total", "Relay injection attempts retried after a transient failure",
    sessions_oriented_total => "broker_sessions_oriented_total", "Sessions that received their one-time orientation prompt",
    agents_registered_total => "broker_agents_registered_total", "Agent records created or refreshed by the session poller",
    gc_agents_pruned_total => "broker_gc_agents_pruned_total", "Stale agent records removed by the garbage collector",
    gc_threads_pruned_total => "broker_gc_threads_pruned_total", "Thread records removed by the garbage collector",
    gc_sessions_unbound_total => "broker_gc_sessions_unbound_total", "Session->agent map entries dropped by the garbage collector",
    gc_messages_expired_total => "broker_gc_messages_expired_total", "Spool messages expired by the garbage collector sweep",
    gc_runs_total => "broker_gc_runs_total", "Garbage collector sweep cycles completed",
}

impl Metrics {
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_size(&self, size: i64) {
        self.message_queue_size.store(size, Ordering::Relaxed);
    }
}

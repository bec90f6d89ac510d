use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: commands executed. Labels: command, kind.
pub const COMMANDS_TOTAL: &str = "slotbook_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "slotbook_command_duration_seconds";

/// Counter: bookings created by claiming a vacancy.
pub const BOOKINGS_CLAIMED_TOTAL: &str = "slotbook_bookings_claimed_total";

/// Counter: bookings cancelled (actual deletions, not idempotent no-ops).
pub const BOOKINGS_CANCELLED_TOTAL: &str = "slotbook_bookings_cancelled_total";

// ── Saga / transaction metrics ──────────────────────────────────

/// Counter: vacancies re-opened after a cancellation (merged or plain).
pub const VACANCIES_REOPENED_TOTAL: &str = "slotbook_vacancies_reopened_total";

/// Counter: reopen attempts that failed after the deletion committed.
/// This is the escalation channel for the cancellation saga's second leg.
pub const VACANCY_REOPEN_FAILURES_TOTAL: &str = "slotbook_vacancy_reopen_failures_total";

/// Counter: transactions rolled back.
pub const TXN_ROLLBACKS_TOTAL: &str = "slotbook_txn_rollbacks_total";

// ── Mail queue metrics ──────────────────────────────────────────

/// Counter: notifications rejected by the full bounded queue.
pub const MAIL_QUEUE_REJECTED_TOTAL: &str = "slotbook_mail_queue_rejected_total";

/// Counter: deliveries the provider failed.
pub const MAIL_DELIVERY_FAILURES_TOTAL: &str = "slotbook_mail_delivery_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install the fmt tracing subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

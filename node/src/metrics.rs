//! # Prometheus Metrics
//!
//! Wallet metrics under the `tally` prefix, scraped at `/metrics` on the
//! metrics port. Gauges are refreshed and counters bumped from the wallet's
//! event broadcast by [`track`].

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use tally_wallet::{Wallet, WalletEvent};

/// Every metric the daemon exports.
#[derive(Clone)]
pub struct WalletMetrics {
    registry: Registry,
    /// Spendable balance in sats.
    pub balance_sats: IntGauge,
    /// Number of tokens held.
    pub tokens_held: IntGauge,
    /// Invoices awaiting settlement.
    pub pending_invoices: IntGauge,
    /// Log entries recorded or finalized, by kind and status.
    pub transactions_total: IntCounterVec,
    pub invoices_created_total: IntCounter,
    pub invoices_settled_total: IntCounter,
    pub invoices_expired_total: IntCounter,
}

impl WalletMetrics {
    /// Creates and registers all metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("tally".into()), None)?;

        let balance_sats = IntGauge::new("balance_sats", "Spendable wallet balance in sats")?;
        registry.register(Box::new(balance_sats.clone()))?;

        let tokens_held = IntGauge::new("tokens_held", "Number of unspent tokens held")?;
        registry.register(Box::new(tokens_held.clone()))?;

        let pending_invoices =
            IntGauge::new("pending_invoices", "Invoices awaiting settlement")?;
        registry.register(Box::new(pending_invoices.clone()))?;

        let transactions_total = IntCounterVec::new(
            Opts::new(
                "transactions_total",
                "Transaction log entries recorded, by kind and status",
            ),
            &["kind", "status"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let invoices_created_total =
            IntCounter::new("invoices_created_total", "Invoices requested from mints")?;
        registry.register(Box::new(invoices_created_total.clone()))?;

        let invoices_settled_total =
            IntCounter::new("invoices_settled_total", "Invoices settled into the ledger")?;
        registry.register(Box::new(invoices_settled_total.clone()))?;

        let invoices_expired_total =
            IntCounter::new("invoices_expired_total", "Invoices dropped unpaid")?;
        registry.register(Box::new(invoices_expired_total.clone()))?;

        Ok(Self {
            registry,
            balance_sats,
            tokens_held,
            pending_invoices,
            transactions_total,
            invoices_created_total,
            invoices_settled_total,
            invoices_expired_total,
        })
    }

    /// Encodes all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Sets the gauges from the wallet's current state.
    pub fn refresh(&self, wallet: &Wallet) {
        let state = wallet.state();
        self.balance_sats.set(i64::try_from(state.balance).unwrap_or(i64::MAX));
        self.tokens_held.set(state.token_count as i64);
        self.pending_invoices.set(state.pending_invoices as i64);
    }

    /// Applies one wallet event.
    pub fn observe(&self, event: &WalletEvent) {
        match event {
            WalletEvent::TransactionRecorded { transaction } => {
                self.transactions_total
                    .with_label_values(&[
                        &transaction.kind.to_string(),
                        &transaction.status.to_string().to_lowercase(),
                    ])
                    .inc();
            }
            WalletEvent::InvoiceCreated { .. } => self.invoices_created_total.inc(),
            WalletEvent::InvoiceSettled { .. } => self.invoices_settled_total.inc(),
            WalletEvent::InvoiceExpired { .. } => self.invoices_expired_total.inc(),
            WalletEvent::StatusChanged { .. } | WalletEvent::BalanceChanged { .. } => {}
        }
    }
}

pub type SharedMetrics = Arc<WalletMetrics>;

/// Feeds `metrics` from `wallet`'s events. Runs until aborted.
pub fn track(wallet: Wallet, metrics: SharedMetrics) -> JoinHandle<()> {
    let mut events = wallet.subscribe();
    metrics.refresh(&wallet);
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => metrics.observe(&event),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "metrics lagged behind wallet events");
                }
                Err(RecvError::Closed) => break,
            }
            metrics.refresh(&wallet);
        }
    })
}

/// Renders `/metrics`.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

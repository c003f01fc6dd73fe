use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};

#[derive(Clone)]
pub struct EngineMetrics {
    pub registry: Registry,
    pub deductions_total: IntCounterVec,
    pub deduction_failures_total: IntCounterVec,
    pub recalc_duration_seconds: Histogram,
    pub recalc_failures_total: IntCounter,
    pub sweeper_duration_seconds: Histogram,
    pub stock_alerts_total: IntCounterVec,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let deductions_total = IntCounterVec::new(
            prometheus::Opts::new(
                "inventory_deductions_total",
                "Committed inventory deductions by trigger (order, provision)",
            ),
            &["trigger"],
        ).unwrap();
        let deduction_failures_total = IntCounterVec::new(
            prometheus::Opts::new(
                "inventory_deduction_failures_total",
                "Aborted deduction transactions by reason (insufficient, not_found, db)",
            ),
            &["reason"],
        ).unwrap();
        let recalc_duration_seconds = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "out_of_stock_recalc_duration_seconds",
                "Duration of one out-of-stock recalculation",
            ).buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0]),
        ).unwrap();
        let recalc_failures_total = IntCounter::new(
            "out_of_stock_recalc_failures_total",
            "Best-effort recalculations that were logged and skipped",
        ).unwrap();
        let sweeper_duration_seconds = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "inventory_sweeper_duration_seconds",
                "Duration of a low-stock/expiry sweep across all stores",
            ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]),
        ).unwrap();
        let stock_alerts_total = IntCounterVec::new(
            prometheus::Opts::new(
                "stock_alerts_total",
                "Dispatched stock alerts by kind (low_stock, provision_expires_soon, provision_expired)",
            ),
            &["kind"],
        ).unwrap();
        let _ = registry.register(Box::new(deductions_total.clone()));
        let _ = registry.register(Box::new(deduction_failures_total.clone()));
        let _ = registry.register(Box::new(recalc_duration_seconds.clone()));
        let _ = registry.register(Box::new(recalc_failures_total.clone()));
        let _ = registry.register(Box::new(sweeper_duration_seconds.clone()));
        let _ = registry.register(Box::new(stock_alerts_total.clone()));
        EngineMetrics {
            registry,
            deductions_total,
            deduction_failures_total,
            recalc_duration_seconds,
            recalc_failures_total,
            sweeper_duration_seconds,
            stock_alerts_total,
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self { Self::new() }
}

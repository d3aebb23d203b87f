use clap::Parser;

/// Exists verifier: periodically scans pending billing-audit records,
/// cross-checks them against usage/delete data, and republishes verified
/// ones (§6).
#[derive(Debug, Parser)]
#[command(name = "iaudit-verifier", about = "Exists verifier for the instance telemetry pipeline", version)]
pub struct Cli {
    /// Seconds to sleep between scans.
    #[arg(long, default_value_t = 30)]
    pub tick_time: u64,

    /// How long to wait past `audit_period_ending` before considering a
    /// record settled, in `--settle-units`.
    #[arg(long, default_value_t = 10)]
    pub settle_time: i64,

    /// Time unit for `--settle-time`: seconds, minutes, or hours.
    #[arg(long, default_value = "minutes")]
    pub settle_units: String,

    /// Number of concurrent verify workers.
    #[arg(long, default_value_t = 10)]
    pub pool_size: usize,

    /// Process the current pending batch once and exit, instead of looping.
    #[arg(long, default_value_t = false)]
    pub run_once: bool,
}

//! CLI flags shared by both controller binaries (spec.md §6 "CLI").

use std::time::Duration;

use clap::Parser;

fn parse_duration(s: &str) -> Result<Duration, humantime_parse::Error> {
    humantime_parse::parse(s)
}

/// Flags common to `backend-controller` and `volume-modify-controller`.
#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Lower bound of the work queue's exponential backoff (spec.md §4.1).
    #[arg(long = "retry-interval-start", value_parser = parse_duration, default_value = "5s")]
    pub retry_interval_start: Duration,

    /// Upper bound of the work queue's exponential backoff.
    #[arg(long = "retry-interval-max", value_parser = parse_duration, default_value = "5m")]
    pub retry_interval_max: Duration,

    /// Per-API-call / per-RPC deadline (spec.md §5 "Suspension points").
    #[arg(long = "provision-timeout", value_parser = parse_duration, default_value = "5m")]
    pub provision_timeout: Duration,

    /// Worker threads per watched kind (spec.md §5 "Scheduling model").
    #[arg(long = "workers", default_value_t = 4)]
    pub workers: usize,

    /// Full-cache resync period (spec.md §5).
    #[arg(long = "resync-period", value_parser = parse_duration, default_value = "15m")]
    pub resync_period: Duration,

    /// Name of the leader-election lease.
    #[arg(long = "lease-name")]
    pub lease_name: String,

    /// Namespace holding singleton resources (election lease, lock ConfigMap).
    #[arg(long = "namespace", env = "POD_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Unix-domain-socket path of the storage provider's gRPC driver (spec.md §6 "Environment").
    #[arg(long = "driver-endpoint", env = "DRIVER_ENDPOINT")]
    pub driver_endpoint: String,

    /// Name of the storage provider driver this controller instance serves (spec.md §4.6 sidecar filter).
    #[arg(long = "provider", env = "STORAGE_PROVIDER")]
    pub provider: String,

    /// Address the liveness/readiness endpoint listens on (SPEC_FULL.md §6).
    #[arg(long = "healthz-addr", default_value = "0.0.0.0:8081")]
    pub healthz_addr: String,

    /// Print the generated CustomResourceDefinition YAML to stdout and exit (SPEC_FULL.md §3).
    #[arg(long = "print-crd")]
    pub print_crd: bool,

    /// Log output format.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Minimal `humantime`-backed duration parser usable as a `clap` `value_parser`.
///
/// kept as a private shim module rather than depending on `humantime` directly
/// for `clap::Parser`'s `value_parser` trait bound, matching the error-type
/// conventions the rest of the crate uses for small adapter shims.
mod humantime_parse {
    #[derive(Debug, thiserror::Error)]
    #[error("invalid duration: {0}")]
    pub struct Error(#[from] humantime::DurationError);

    pub fn parse(s: &str) -> Result<std::time::Duration, Error> {
        Ok(humantime::parse_duration(s)?)
    }
}

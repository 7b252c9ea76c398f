//! Check-config command: validates the environment without starting anything.

use super::{CliResult, Format};
use serde::Serialize;
use tracklog_server::{ServerConfig, TokenAuthenticator};

/// Effective configuration, minus the secret.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReport {
    /// Token lifetime in seconds.
    pub token_ttl_secs: u64,
    /// Whether unsigned legacy identities are accepted.
    pub allow_legacy_identity: bool,
    /// Rate-limit window in milliseconds.
    pub rate_limit_window_ms: u64,
    /// Requests admitted per window and client.
    pub rate_limit_max: u32,
}

/// Runs the check-config command.
pub fn run(config: &ServerConfig, format: Format) -> CliResult<ConfigReport> {
    // Same startup check the server performs.
    TokenAuthenticator::new(&config.auth)?;

    let report = ConfigReport {
        token_ttl_secs: config.auth.token_ttl.as_secs(),
        allow_legacy_identity: config.allow_legacy_identity,
        rate_limit_window_ms: config.rate_limit.window.as_millis() as u64,
        rate_limit_max: config.rate_limit.max_requests,
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => {
            println!("Configuration OK");
            println!("  Token TTL:        {}s", report.token_ttl_secs);
            println!(
                "  Legacy identity:  {}",
                if report.allow_legacy_identity {
                    "ENABLED (deprecated)"
                } else {
                    "disabled"
                }
            );
            println!(
                "  Rate limit:       {} requests / {} ms",
                report.rate_limit_max, report.rate_limit_window_ms
            );
        }
    }
    Ok(report)
}

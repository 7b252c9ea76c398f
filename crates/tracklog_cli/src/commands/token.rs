//! Token commands: issue, verify and refresh signed identity tokens.

use super::{format_millis, CliError, CliResult, Format};
use serde::Serialize;
use std::time::Duration;
use tracklog_core::UserId;
use tracklog_server::{ttl_from_days, ServerConfig, TokenAuthenticator, VerifiedToken};

/// A token and what it proves.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenReport {
    /// Token, omitted by `verify`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Identified user.
    pub user_id: String,
    /// Expiry in unix milliseconds.
    pub expires_at: u64,
}

impl TokenReport {
    fn new(token: Option<String>, verified: &VerifiedToken) -> Self {
        Self {
            token,
            user_id: verified.user_id.to_string(),
            expires_at: verified.expires_at,
        }
    }
}

/// Converts the `--ttl-days` argument.
pub fn ttl_arg(days: Option<u64>) -> CliResult<Option<Duration>> {
    days.map(|days| {
        ttl_from_days(days).ok_or_else(|| CliError::InvalidArgument {
            name: "--ttl-days",
            reason: format!("{days} days is too long"),
        })
    })
    .transpose()
}

fn authenticator(config: &ServerConfig) -> CliResult<TokenAuthenticator> {
    Ok(TokenAuthenticator::new(&config.auth)?)
}

/// Issues a token for `user` (or a freshly generated user).
pub fn issue(
    config: &ServerConfig,
    user: Option<&str>,
    ttl: Option<Duration>,
    format: Format,
) -> CliResult<TokenReport> {
    let auth = authenticator(config)?;
    let user_id = match user {
        Some(raw) => UserId::parse(raw)?,
        None => UserId::generate(),
    };
    let token = auth.issue(&user_id, ttl.unwrap_or(auth.token_ttl()));
    let verified = auth.verify(&token)?;
    let report = TokenReport::new(Some(token), &verified);
    print(&report, format)?;
    Ok(report)
}

/// Verifies `token` and prints its identity.
pub fn verify(config: &ServerConfig, token: &str, format: Format) -> CliResult<TokenReport> {
    let verified = authenticator(config)?.verify(token.trim())?;
    let report = TokenReport::new(None, &verified);
    print(&report, format)?;
    Ok(report)
}

/// Exchanges `token` for one with a fresh lifetime.
pub fn refresh(config: &ServerConfig, token: &str, format: Format) -> CliResult<TokenReport> {
    let (fresh, verified) = authenticator(config)?.refresh(token.trim())?;
    let report = TokenReport::new(Some(fresh), &verified);
    print(&report, format)?;
    Ok(report)
}

fn print(report: &TokenReport, format: Format) -> CliResult<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(report)?),
        Format::Text => {
            if let Some(token) = &report.token {
                println!("{token}");
            }
            println!("user:    {}", report.user_id);
            println!("expires: {}", format_millis(report.expires_at));
        }
    }
    Ok(())
}

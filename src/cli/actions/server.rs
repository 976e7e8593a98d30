use crate::{
    api::{self, handlers::auth::AuthConfig, AppState},
    cli::telemetry,
};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub cors_origin: Option<String>,
    pub token_ttl_seconds: i64,
    pub captcha_ttl_seconds: i64,
    pub captcha_base_url: String,
    pub login_captcha: bool,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        AuthConfig::new()
            .with_token_ttl_seconds(self.token_ttl_seconds)
            .with_captcha_ttl_seconds(self.captcha_ttl_seconds)
            .with_captcha_base_url(self.captcha_base_url.clone())
            .with_login_captcha(self.login_captcha)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);
    let config = args.auth_config();

    let state = match &args.dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to database")?;
            AppState::postgres(pool, config)
        }
        None => {
            warn!("No DSN configured; using the in-memory store");
            AppState::in_memory(config)
        }
    };

    let result = api::new(args.port, state, args.cors_origin).await;
    telemetry::shutdown_tracer();
    result
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "dsn",
            args.dsn
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_dsn),
        ),
        (
            "cors_origin",
            args.cors_origin
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        ),
        ("token_ttl_seconds", args.token_ttl_seconds.to_string()),
        ("captcha_ttl_seconds", args.captcha_ttl_seconds.to_string()),
        ("captcha_base_url", args.captcha_base_url.clone()),
        ("login_captcha", args.login_captcha.to_string()),
    ];
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\nStartup configuration:", banner());
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        message.push_str(&format!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn banner() -> String {
    let hash = crate::GIT_COMMIT_HASH.trim();
    let short_hash = hash.get(..7).unwrap_or(hash);
    format!(
        "G R I Z Z L Y - {} - {short_hash}",
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            port: 8080,
            dsn: None,
            cors_origin: None,
            token_ttl_seconds: 60,
            captcha_ttl_seconds: 30,
            captcha_base_url: "https://grizzly.dev/captcha/".to_string(),
            login_captcha: true,
        }
    }

    #[test]
    fn redact_dsn_hides_password() {
        assert_eq!(
            redact_dsn("postgres://grizzly:hunter2@db:5432/grizzly"),
            "postgres://grizzly:REDACTED@db:5432/grizzly"
        );
        assert_eq!(
            redact_dsn("postgres://db:5432/grizzly"),
            "postgres://db:5432/grizzly"
        );
        assert_eq!(redact_dsn("::"), "invalid-dsn");
    }

    #[test]
    fn auth_config_from_args() {
        let config = args().auth_config();
        assert_eq!(config.token_ttl_seconds(), 60);
        assert_eq!(config.captcha_ttl_seconds(), 30);
        assert_eq!(config.captcha_base_url(), "https://grizzly.dev/captcha");
        assert!(config.login_captcha());
    }

    #[test]
    fn banner_carries_version() {
        assert!(banner().contains(env!("CARGO_PKG_VERSION")));
    }
}

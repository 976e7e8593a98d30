use crate::cli::actions::{server::Args, Action};
use anyhow::Result;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches.get_one::<String>("dsn").cloned();
    let cors_origin = matches.get_one::<String>("cors-origin").cloned();

    let token_ttl_seconds = matches
        .get_one::<i64>("token-ttl-seconds")
        .copied()
        .unwrap_or(43_200);
    let captcha_ttl_seconds = matches
        .get_one::<i64>("captcha-ttl-seconds")
        .copied()
        .unwrap_or(300);
    let captcha_base_url = matches
        .get_one::<String>("captcha-base-url")
        .cloned()
        .unwrap_or_else(|| "/captcha".to_string());
    let login_captcha = matches.get_flag("login-captcha");

    Ok(Action::Server(Args {
        port,
        dsn,
        cors_origin,
        token_ttl_seconds,
        captcha_ttl_seconds,
        captcha_base_url,
        login_captcha,
    }))
}

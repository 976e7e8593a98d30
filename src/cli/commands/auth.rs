use crate::api::handlers::auth::MAX_TTL_SECONDS;
use clap::{Arg, ArgAction, Command};

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("token-ttl-seconds")
                .long("token-ttl-seconds")
                .help("Bearer token TTL in seconds")
                .env("GRIZZLY_TOKEN_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new("captcha-ttl-seconds")
                .long("captcha-ttl-seconds")
                .help("Captcha challenge TTL in seconds")
                .env("GRIZZLY_CAPTCHA_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new("captcha-base-url")
                .long("captcha-base-url")
                .help("Base URL captcha image links are built from")
                .env("GRIZZLY_CAPTCHA_BASE_URL")
                .default_value("/captcha"),
        )
        .arg(
            Arg::new("login-captcha")
                .long("login-captcha")
                .help("Require a solved captcha on login")
                .env("GRIZZLY_LOGIN_CAPTCHA")
                .action(ArgAction::SetTrue),
        )
}

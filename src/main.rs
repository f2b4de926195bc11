//! AdvisorDesk session tool.
//!
//! Usage:
//!   advisordesk                     bootstrap and print the session
//!   advisordesk sign-in             interactive sign-in (falls back if it fails)
//!   advisordesk sign-in-token TOK   sign in with a pasted bearer token
//!   advisordesk sign-out            clear the stored session
//!   advisordesk whoami              print identity and advisor
//!   advisordesk check               probe the backend with the current credential

use std::process::ExitCode;
use std::sync::Arc;

use advisordesk_lib::config::{config_path, load_config, AuthConfig};
use advisordesk_lib::AuthSession;

const USAGE: &str = "usage: advisordesk [sign-in | sign-in-token <token> | sign-out | whoami | check]";

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            log::warn!(
                "Ignoring config at {} ({}); using defaults",
                config_path().display(),
                e
            );
            let mut config = AuthConfig::default();
            config.apply_env();
            config
        }
    };

    let session = Arc::new(AuthSession::from_config(&config));
    session.bootstrap().await;

    let result = match args.first().map(String::as_str) {
        None | Some("whoami") => print_json(&session.snapshot()),
        Some("sign-in") => {
            let outcome = session.sign_in().await;
            if let Some(reason) = outcome.fallback_reason.as_deref() {
                eprintln!("Signed in with fallback identity: {}", reason);
            }
            print_json(&outcome)
        }
        Some("sign-in-token") => match args.get(1) {
            Some(token) => match session.sign_in_with_token(token).await {
                Ok(identity) => print_json(&identity),
                Err(e) => Err(e.to_string()),
            },
            None => Err(USAGE.to_string()),
        },
        Some("sign-out") => {
            session.sign_out();
            print_json(&session.snapshot())
        }
        Some("check") => match session.check_backend().await {
            Ok(body) => print_json(&body),
            Err(e) => Err(format!("Backend check failed: {}", e)),
        },
        Some(_) => Err(USAGE.to_string()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

//! Operator CLI for issuing and checking signed values. Secrets are never
//! printed; `load-config` only shows where each key came from and its length.

use std::env;
use std::process::ExitCode;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use cookie_signer::config::{load_config, RuntimeConfig, DEFAULT_DEBUG_LEVEL};
use cookie_signer::cookies::{CookieJar, SetCookie};
use cookie_signer::crypto::secret::{Secret, DERIVED_KEY_LEN};
use cookie_signer::logging::init_logging;

fn print_usage() -> ExitCode {
    eprintln!("Commands:\n  generate-secret [bytes]\n  sign <config> <payload>\n  verify <config> <token>\n  sign-cookie <config> <name> <value>\n  parse-cookies <config> <cookie-header>\n  load-config <config>");
    ExitCode::from(2)
}

fn load(path: &str) -> Result<RuntimeConfig, ExitCode> {
    match load_config(path) {
        Ok(config) => {
            init_logging(&config.debug_level);
            info!(
                keys = config.keyring.len(),
                algorithm = config.signer.mac_name(),
                format = ?config.signer.format(),
                "signing keyring loaded"
            );
            Ok(config)
        }
        Err(err) => {
            eprintln!("config load failed: {err}");
            Err(ExitCode::FAILURE)
        }
    }
}

/// Text payloads print as-is; anything else prints as base64 so no byte is
/// lost. The flag reports which one happened.
fn printable_payload(payload: Vec<u8>) -> (String, bool) {
    match String::from_utf8(payload) {
        Ok(text) => (text, true),
        Err(err) => (STANDARD_NO_PAD.encode(err.as_bytes()), false),
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        return print_usage();
    }

    match args[1].as_str() {
        "generate-secret" => {
            if args.len() > 3 {
                return print_usage();
            }
            init_logging(DEFAULT_DEBUG_LEVEL);
            let len = match args.get(2).map(|raw| raw.parse::<usize>()) {
                None => DERIVED_KEY_LEN,
                Some(Ok(len)) => len,
                Some(Err(err)) => {
                    eprintln!("invalid byte count: {err}");
                    return ExitCode::FAILURE;
                }
            };
            match Secret::generate(len) {
                Ok(secret) => {
                    println!("{}", secret.to_base64());
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("secret generation failed: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        "sign" => {
            if args.len() != 4 {
                return print_usage();
            }
            let config = match load(&args[2]) {
                Ok(config) => config,
                Err(code) => return code,
            };
            match config.signer.sign_with(args[3].as_bytes(), &config.keyring) {
                Ok(token) => {
                    println!("{token}");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("signing failed: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        "verify" => {
            if args.len() != 4 {
                return print_usage();
            }
            let config = match load(&args[2]) {
                Ok(config) => config,
                Err(code) => return code,
            };
            match config.signer.verify_with(&args[3], &config.keyring) {
                Ok(payload) => {
                    let (text, is_utf8) = printable_payload(payload);
                    if !is_utf8 {
                        eprintln!("payload is not UTF-8; printed as base64");
                    }
                    println!("{text}");
                    ExitCode::SUCCESS
                }
                Err(failure) => {
                    warn!(reason = %failure, "token rejected");
                    eprintln!("verification failed: {failure}");
                    ExitCode::FAILURE
                }
            }
        }
        "sign-cookie" => {
            if args.len() != 5 {
                return print_usage();
            }
            let config = match load(&args[2]) {
                Ok(config) => config,
                Err(code) => return code,
            };
            match SetCookie::signed(args[3].as_str(), &args[4], &config.signer, config.keyring.primary()) {
                Ok(cookie) => {
                    println!("{}", cookie.http_only(true).to_header_value());
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("cookie signing failed: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        "parse-cookies" => {
            if args.len() != 4 {
                return print_usage();
            }
            let config = match load(&args[2]) {
                Ok(config) => config,
                Err(code) => return code,
            };
            let jar = CookieJar::parse(&args[3], &config.signer, Some(&config.keyring));

            let mut signed = Map::new();
            for (name, value) in &jar.signed_cookies {
                let rendered = match value {
                    Ok(value) => json!(value),
                    Err(failure) => json!({ "rejected": failure.to_string() }),
                };
                signed.insert(name.clone(), rendered);
            }
            let printable = json!({
                "cookies": jar.cookies,
                "signedCookies": Value::Object(signed),
            });
            match serde_json::to_string_pretty(&printable) {
                Ok(text) => {
                    println!("{text}");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("output failed: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        "load-config" => {
            if args.len() != 3 {
                return print_usage();
            }
            let config = match load(&args[2]) {
                Ok(config) => config,
                Err(code) => return code,
            };
            let printable = json!({
                "algorithm": config.signer.mac_name(),
                "format": config.signer.format(),
                "debugLevel": config.debug_level,
                "keyCount": config.keyring.len(),
                "keys": config.key_summaries,
                "secrets": "<redacted in output>"
            });
            match serde_json::to_string_pretty(&printable) {
                Ok(text) => {
                    println!("{text}");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("output failed: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        _ => print_usage(),
    }
}

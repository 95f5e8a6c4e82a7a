use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use threshold_client::app::{self, AppConfig};
use threshold_client::settings::SETTINGS_PATH;

fn main() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();

    let mut settings_path = PathBuf::from(SETTINGS_PATH);
    let mut max_ticks = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--settings" => {
                let Some(value) = args.next() else {
                    eprintln!("--settings expects a path argument");
                    std::process::exit(2);
                };
                settings_path = PathBuf::from(value);
            }
            "--ticks" => {
                let Some(value) = args.next() else {
                    eprintln!("--ticks expects a numeric argument");
                    std::process::exit(2);
                };
                match value.parse::<u64>() {
                    Ok(parsed) => max_ticks = Some(parsed),
                    Err(err) => {
                        eprintln!("invalid tick count '{value}': {err}");
                        std::process::exit(2);
                    }
                }
            }
            "--help" | "-h" => {
                println!("Usage: threshold_client [--settings <path>] [--ticks <u64>]");
                return;
            }
            other => {
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nShutdown signal received, stopping...");
        r.store(false, Ordering::SeqCst);
    })
    .expect("failed to set Ctrl+C handler");

    let config = AppConfig {
        settings_path,
        max_ticks,
    };
    if let Err(err) = app::run(config, running) {
        eprintln!("threshold failed: {err}");
        std::process::exit(1);
    }
}

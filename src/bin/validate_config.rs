// =============================================================================
// validate-config — load a YAML config, validate, print the key facts
// =============================================================================
//
// Exit codes: 0 config ok, 2 validation failure, 1 unhandled error.
// =============================================================================

use clap::Parser;

use quotebridge::config::load_config;

#[derive(Debug, Parser)]
#[command(name = "validate-config", about = "Validate a bridge YAML config")]
struct Args {
    /// Path to the YAML config file.
    #[arg(long)]
    config: String,
}

fn main() {
    let args = Args::parse();
    match load_config(&args.config) {
        Ok(cfg) => {
            let (host, port) = cfg.redis.endpoint();
            println!("config ok:");
            println!("  qmt.mode = {}", cfg.qmt.mode);
            println!("  redis = {host}:{port} topic={}", cfg.redis.topic);
            println!(
                "  subscription: codes={} periods={:?} mode={}",
                cfg.subscription.codes.len(),
                cfg.subscription.periods,
                cfg.subscription.mode
            );
            println!(
                "  preload_days = {}, close_delay_ms = {}",
                cfg.subscription.preload_days, cfg.subscription.close_delay_ms
            );
            println!(
                "  control = {}, health = {}, mock = {}",
                cfg.control.enabled, cfg.health.enabled, cfg.mock.enabled
            );
        }
        Err(e) => {
            eprintln!("config invalid: {e}");
            std::process::exit(2);
        }
    }
}

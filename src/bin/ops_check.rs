// =============================================================================
// ops-check — environment self-check: bus reachability + quote source
// =============================================================================
//
// Exit codes: 0 every check passed, 2 a check failed, 1 unhandled error.
// =============================================================================

use clap::Parser;

use quotebridge::bus::{Bus, RedisBus};
use quotebridge::config::load_config;

#[derive(Debug, Parser)]
#[command(name = "ops-check", about = "Bridge environment self-check")]
struct Args {
    /// Redis URL to probe.
    #[arg(long, default_value = "redis://127.0.0.1:6379/0")]
    redis_url: String,

    /// Optional config; when given, the configured quote source is checked
    /// and the redis settings from the config win over --redis-url.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let mut ok = true;

    let mut redis_url = args.redis_url.clone();
    let mut check_source = None;

    if let Some(path) = &args.config {
        match load_config(path) {
            Ok(cfg) => {
                match cfg.redis.connection_url() {
                    Ok(url) => redis_url = url,
                    Err(e) => {
                        println!("config redis: FAIL - {e}");
                        ok = false;
                    }
                }
                check_source = Some(cfg.mock.enabled);
            }
            Err(e) => {
                println!("config: FAIL - {e}");
                ok = false;
            }
        }
    }

    match RedisBus::connect(&redis_url).await {
        Ok(bus) => match bus.ping().await {
            Ok(()) => println!("redis: OK - {redis_url}"),
            Err(e) => {
                println!("redis: FAIL - {e}");
                ok = false;
            }
        },
        Err(e) => {
            println!("redis: FAIL - {e}");
            ok = false;
        }
    }

    match check_source {
        Some(true) => println!("quote source: OK - mock feed"),
        Some(false) => {
            println!("quote source: FAIL - native vendor bindings unavailable in this build");
            ok = false;
        }
        None => {}
    }

    std::process::exit(if ok { 0 } else { 2 });
}

// =============================================================================
// send-cmd — publish a control command to the bridge's command channel
// =============================================================================

use clap::Parser;
use serde_json::json;

use quotebridge::bus::{Bus, RedisBus};

#[derive(Debug, Parser)]
#[command(name = "send-cmd", about = "Send subscribe/unsubscribe/status commands")]
struct Args {
    #[arg(long, default_value = "redis://127.0.0.1:6379/0")]
    url: String,

    #[arg(long, default_value = "xt:ctrl:sub")]
    channel: String,

    #[arg(long, value_parser = ["subscribe", "unsubscribe", "status"])]
    action: String,

    #[arg(long)]
    strategy_id: String,

    /// Comma-separated symbol list.
    #[arg(long, default_value = "")]
    codes: String,

    /// Comma-separated period list (1m/1h/1d).
    #[arg(long, default_value = "")]
    periods: String,

    #[arg(long)]
    preload_days: Option<u32>,

    #[arg(long)]
    topic: Option<String>,

    /// Unsubscribe by persisted sub_id instead of codes/periods.
    #[arg(long)]
    sub_id: Option<String>,
}

fn parse_csv(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut payload = json!({
        "action": args.action,
        "strategy_id": args.strategy_id,
    });
    let codes = parse_csv(&args.codes);
    if !codes.is_empty() {
        payload["codes"] = json!(codes);
    }
    let periods = parse_csv(&args.periods);
    if !periods.is_empty() {
        payload["periods"] = json!(periods);
    }
    if let Some(days) = args.preload_days {
        payload["preload_days"] = json!(days);
    }
    if let Some(topic) = &args.topic {
        payload["topic"] = json!(topic);
    }
    if let Some(sub_id) = &args.sub_id {
        payload["sub_id"] = json!(sub_id);
    }

    let body = serde_json::to_string(&payload)?;
    let bus = RedisBus::connect(&args.url).await?;
    bus.publish(&args.channel, &body).await?;
    println!("sent: {body}");
    Ok(())
}

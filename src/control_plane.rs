// =============================================================================
// ControlPlane — dynamic subscribe/unsubscribe/status over the bus
// =============================================================================
//
// Commands arrive as JSON on a dedicated channel; outcomes ACK on
// `<ack_prefix>:<strategy_id>`. A subscribe persists its spec to the registry
// before touching the engine and rolls the registry back if the engine
// refuses, so the registry only ever describes subscriptions that went live.
// Commands are fire-and-forget: anything lost during a bus outage is the
// sender's problem (clients re-send on ACK timeout).
// =============================================================================

use std::str::FromStr;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::engine::SubscriptionEngine;
use crate::registry::{Registry, SubscriptionSpec};
use crate::timefmt;
use crate::types::Period;

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub channel: String,
    pub ack_prefix: String,
    pub accept_strategies: Vec<String>,
}

pub struct ControlPlane {
    bus: Arc<dyn Bus>,
    registry: Registry,
    engine: Arc<SubscriptionEngine>,
    cfg: ControlPlaneConfig,
    default_topic: String,
}

impl ControlPlane {
    pub fn new(
        bus: Arc<dyn Bus>,
        registry: Registry,
        engine: Arc<SubscriptionEngine>,
        cfg: ControlPlaneConfig,
        default_topic: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            registry,
            engine,
            cfg: ControlPlaneConfig {
                ack_prefix: cfg.ack_prefix.trim_end_matches(':').to_string(),
                ..cfg
            },
            default_topic: default_topic.into(),
        }
    }

    /// Consume the control channel until `stop` flips. The bus subscription
    /// reconnects internally; this loop only ends on the stop signal.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut rx = match self.bus.subscribe(&self.cfg.channel).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(channel = %self.cfg.channel, error = %e, "control channel unavailable");
                return;
            }
        };
        info!(channel = %self.cfg.channel, "control plane listening");

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        info!("control plane stopping");
                        return;
                    }
                }
                msg = rx.recv() => {
                    match msg {
                        Some(text) => self.handle_message(&text).await,
                        None => {
                            warn!("control channel closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Parse and dispatch one raw command. Malformed JSON and unknown
    /// actions are ignored without an ACK.
    pub async fn handle_message(&self, text: &str) {
        let cmd: Value = match serde_json::from_str(text) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => {
                debug!("ignoring non-object control message");
                return;
            }
        };

        let action = cmd
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        match action.as_str() {
            "subscribe" => self.handle_subscribe(&cmd).await,
            "unsubscribe" => self.handle_unsubscribe(&cmd).await,
            "status" => self.handle_status(&cmd).await,
            other => {
                debug!(action = %other, "ignoring unknown control action");
            }
        }
    }

    fn allowed(&self, strategy_id: &str) -> bool {
        self.cfg.accept_strategies.is_empty()
            || self.cfg.accept_strategies.iter().any(|s| s == strategy_id)
    }

    async fn ack(&self, strategy_id: &str, payload: Value) {
        let channel = format!("{}:{}", self.cfg.ack_prefix, strategy_id);
        match serde_json::to_string(&payload) {
            Ok(body) => {
                if let Err(e) = self.bus.publish(&channel, &body).await {
                    warn!(channel = %channel, error = %e, "ack publish failed");
                }
            }
            Err(e) => warn!(error = %e, "ack serialization failed"),
        }
    }

    async fn handle_subscribe(&self, cmd: &Value) {
        let strategy_id = str_field(cmd, "strategy_id");
        if strategy_id.is_empty() || !self.allowed(&strategy_id) {
            let target = if strategy_id.is_empty() {
                "unknown"
            } else {
                strategy_id.as_str()
            };
            self.ack(target, json!({"ok": false, "error": "strategy not allowed"}))
                .await;
            return;
        }

        let codes = list_field(cmd, "codes");
        let periods = list_field(cmd, "periods");
        if codes.is_empty() || periods.is_empty() {
            self.ack(
                &strategy_id,
                json!({"ok": false, "error": "codes/periods required"}),
            )
            .await;
            return;
        }

        let mode = cmd
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or(self.engine.mode().as_str())
            .to_string();
        let preload_days = cmd
            .get("preload_days")
            .and_then(Value::as_u64)
            .map(|d| d as u32)
            .unwrap_or(self.engine.default_preload_days());
        let topic = cmd
            .get("topic")
            .and_then(Value::as_str)
            .unwrap_or(&self.default_topic)
            .to_string();

        let sub_id = Registry::gen_sub_id();
        let spec = SubscriptionSpec {
            strategy_id: strategy_id.clone(),
            codes: codes.clone(),
            periods: periods.clone(),
            mode: mode.clone(),
            preload_days,
            topic: topic.clone(),
            created_at: timefmt::now_cn().timestamp(),
        };
        if let Err(e) = self.registry.save(&sub_id, &spec).await {
            self.ack(
                &strategy_id,
                json!({"ok": false, "error": format!("subscribe failed: {e}")}),
            )
            .await;
            return;
        }

        match self.activate(&codes, &periods, preload_days).await {
            Ok(()) => {
                info!(sub_id = %sub_id, strategy = %strategy_id, "subscribe accepted");
                self.ack(
                    &strategy_id,
                    json!({
                        "ok": true,
                        "action": "subscribe",
                        "sub_id": sub_id,
                        "codes": codes,
                        "periods": periods,
                        "mode": mode,
                        "topic": topic,
                    }),
                )
                .await;
            }
            Err(e) => {
                // Roll the registry back so it never describes a dead spec.
                if let Err(del) = self.registry.delete(&sub_id).await {
                    warn!(sub_id = %sub_id, error = %del, "registry rollback failed");
                }
                self.ack(
                    &strategy_id,
                    json!({"ok": false, "error": format!("subscribe failed: {e}")}),
                )
                .await;
            }
        }
    }

    async fn activate(
        &self,
        codes: &[String],
        periods: &[String],
        preload_days: u32,
    ) -> crate::error::Result<()> {
        let parsed = parse_periods(periods)?;
        self.engine
            .add_subscription(codes, &parsed, preload_days)
            .await
    }

    async fn handle_unsubscribe(&self, cmd: &Value) {
        let strategy_id = str_field(cmd, "strategy_id");
        let target = if strategy_id.is_empty() {
            "unknown".to_string()
        } else {
            strategy_id
        };

        let mut codes = list_field(cmd, "codes");
        let mut periods = list_field(cmd, "periods");

        if let Some(sub_id) = cmd.get("sub_id").and_then(Value::as_str) {
            let spec = match self.registry.load(sub_id).await {
                Ok(Some(spec)) => spec,
                Ok(None) => {
                    self.ack(&target, json!({"ok": false, "error": "sub_id not found"}))
                        .await;
                    return;
                }
                Err(e) => {
                    self.ack(
                        &target,
                        json!({"ok": false, "error": format!("unsubscribe failed: {e}")}),
                    )
                    .await;
                    return;
                }
            };
            // Explicit codes/periods override the persisted spec.
            if codes.is_empty() {
                codes = spec.codes;
            }
            if periods.is_empty() {
                periods = spec.periods;
            }
            if let Err(e) = self.registry.delete(sub_id).await {
                warn!(sub_id = %sub_id, error = %e, "registry delete failed");
            }
        }

        if codes.is_empty() || periods.is_empty() {
            self.ack(
                &target,
                json!({"ok": false, "error": "codes/periods required"}),
            )
            .await;
            return;
        }

        match parse_periods(&periods) {
            Ok(parsed) => {
                self.engine.remove_subscription(&codes, &parsed).await;
                info!(strategy = %target, ?codes, "unsubscribe accepted");
                self.ack(
                    &target,
                    json!({
                        "ok": true,
                        "action": "unsubscribe",
                        "codes": codes,
                        "periods": periods,
                    }),
                )
                .await;
            }
            Err(e) => {
                self.ack(
                    &target,
                    json!({"ok": false, "error": format!("unsubscribe failed: {e}")}),
                )
                .await;
            }
        }
    }

    async fn handle_status(&self, cmd: &Value) {
        let strategy_id = str_field(cmd, "strategy_id");
        let target = if strategy_id.is_empty() {
            "unknown".to_string()
        } else {
            strategy_id
        };
        let subs = self.registry.list_all().await.unwrap_or_default();
        let status = self.engine.status();
        self.ack(
            &target,
            json!({
                "ok": true,
                "action": "status",
                "status": status,
                "subs": subs,
            }),
        )
        .await;
    }
}

fn str_field(cmd: &Value, name: &str) -> String {
    cmd.get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn list_field(cmd: &Value, name: &str) -> Vec<String> {
    cmd.get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_periods(periods: &[String]) -> crate::error::Result<Vec<Period>> {
    periods.iter().map(|p| Period::from_str(p)).collect()
}

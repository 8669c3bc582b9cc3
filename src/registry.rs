// =============================================================================
// Registry — SubscriptionSpec persistence in bus KV
// =============================================================================
//
// Key layout, with <p> = registry prefix:
//   <p>:subs                      set of all sub_id
//   <p>:sub:<sub_id>              hash of spec fields (lists as JSON strings)
//   <p>:strategy:<sid>:subs       set of sub_id belonging to that strategy
//
// Hash values are strings only; codes/periods encode as JSON strings and
// created_at as a decimal string. All operations are idempotent writes/reads
// so restart recovery can replay them safely.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::error::Result;
use crate::timefmt;

/// Persisted control-plane intent: one subscribe command's full shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub strategy_id: String,
    pub codes: Vec<String>,
    pub periods: Vec<String>,
    pub mode: String,
    pub preload_days: u32,
    pub topic: String,
    pub created_at: i64,
}

pub struct Registry {
    bus: Arc<dyn Bus>,
    prefix: String,
}

impl Registry {
    pub fn new(bus: Arc<dyn Bus>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_end_matches(':').to_string();
        Self { bus, prefix }
    }

    fn k_subs(&self) -> String {
        format!("{}:subs", self.prefix)
    }

    fn k_sub(&self, sub_id: &str) -> String {
        format!("{}:sub:{}", self.prefix, sub_id)
    }

    fn k_strategy_subs(&self, strategy_id: &str) -> String {
        format!("{}:strategy:{}:subs", self.prefix, strategy_id)
    }

    /// Server-generated subscription id: `sub-<YYYYMMDD-HHMMSS>-<8hex>`.
    pub fn gen_sub_id() -> String {
        let stamp = timefmt::now_cn().format("%Y%m%d-%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("sub-{stamp}-{}", &suffix[..8])
    }

    pub async fn save(&self, sub_id: &str, spec: &SubscriptionSpec) -> Result<()> {
        let fields = encode_spec(spec)?;
        self.bus.hset_all(&self.k_sub(sub_id), &fields).await?;
        self.bus.sadd(&self.k_subs(), sub_id).await?;
        self.bus
            .sadd(&self.k_strategy_subs(&spec.strategy_id), sub_id)
            .await?;
        Ok(())
    }

    pub async fn load(&self, sub_id: &str) -> Result<Option<SubscriptionSpec>> {
        let data = self.bus.hgetall(&self.k_sub(sub_id)).await?;
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(decode_spec(&data)))
    }

    pub async fn delete(&self, sub_id: &str) -> Result<()> {
        let data = self.bus.hgetall(&self.k_sub(sub_id)).await?;
        if let Some(strategy_id) = data.get("strategy_id") {
            self.bus
                .srem(&self.k_strategy_subs(strategy_id), sub_id)
                .await?;
        }
        self.bus.del(&self.k_sub(sub_id)).await?;
        self.bus.srem(&self.k_subs(), sub_id).await?;
        Ok(())
    }

    pub async fn list_all(&self) -> Result<Vec<String>> {
        let mut ids = self.bus.smembers(&self.k_subs()).await?;
        ids.sort();
        Ok(ids)
    }

    pub async fn list_by_strategy(&self, strategy_id: &str) -> Result<Vec<String>> {
        let mut ids = self
            .bus
            .smembers(&self.k_strategy_subs(strategy_id))
            .await?;
        ids.sort();
        Ok(ids)
    }
}

fn encode_spec(spec: &SubscriptionSpec) -> Result<Vec<(String, String)>> {
    Ok(vec![
        ("strategy_id".into(), spec.strategy_id.clone()),
        ("codes".into(), serde_json::to_string(&spec.codes)?),
        ("periods".into(), serde_json::to_string(&spec.periods)?),
        ("mode".into(), spec.mode.clone()),
        ("preload_days".into(), spec.preload_days.to_string()),
        ("topic".into(), spec.topic.clone()),
        ("created_at".into(), spec.created_at.to_string()),
    ])
}

fn decode_spec(data: &std::collections::HashMap<String, String>) -> SubscriptionSpec {
    let lists = |field: &str| -> Vec<String> {
        data.get(field)
            .and_then(|v| serde_json::from_str(v).ok())
            .unwrap_or_default()
    };
    SubscriptionSpec {
        strategy_id: data.get("strategy_id").cloned().unwrap_or_default(),
        codes: lists("codes"),
        periods: lists("periods"),
        mode: data.get("mode").cloned().unwrap_or_default(),
        preload_days: data
            .get("preload_days")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        topic: data.get("topic").cloned().unwrap_or_default(),
        created_at: data
            .get("created_at")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;

    fn spec() -> SubscriptionSpec {
        SubscriptionSpec {
            strategy_id: "demo".into(),
            codes: vec!["518880.SH".into(), "510050.SH".into()],
            periods: vec!["1m".into()],
            mode: "close_only".into(),
            preload_days: 3,
            topic: "xt:topic:bar".into(),
            created_at: 1_758_000_000,
        }
    }

    #[test]
    fn sub_id_shape() {
        let id = Registry::gen_sub_id();
        assert!(id.starts_with("sub-"));
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn save_load_roundtrip() {
        let bus = Arc::new(MockBus::new());
        let reg = Registry::new(bus.clone(), "xt:bridge");
        reg.save("sub-x", &spec()).await.unwrap();

        let loaded = reg.load("sub-x").await.unwrap().unwrap();
        assert_eq!(loaded, spec());

        // Hash fields are strings; list fields are JSON-encoded.
        let raw = bus.hashes.lock().get("xt:bridge:sub:sub-x").cloned().unwrap();
        assert_eq!(raw["periods"], r#"["1m"]"#);
        assert_eq!(raw["created_at"], "1758000000");
    }

    #[tokio::test]
    async fn indexes_track_membership() {
        let bus = Arc::new(MockBus::new());
        let reg = Registry::new(bus, "xt:bridge");
        reg.save("sub-a", &spec()).await.unwrap();
        reg.save("sub-b", &spec()).await.unwrap();

        assert_eq!(reg.list_all().await.unwrap(), vec!["sub-a", "sub-b"]);
        assert_eq!(
            reg.list_by_strategy("demo").await.unwrap(),
            vec!["sub-a", "sub-b"]
        );

        reg.delete("sub-a").await.unwrap();
        assert_eq!(reg.list_all().await.unwrap(), vec!["sub-b"]);
        assert_eq!(reg.list_by_strategy("demo").await.unwrap(), vec!["sub-b"]);
        assert!(reg.load("sub-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_sub_loads_none() {
        let bus = Arc::new(MockBus::new());
        let reg = Registry::new(bus, "xt:bridge");
        assert!(reg.load("sub-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prefix_trailing_colon_is_normalized() {
        let bus = Arc::new(MockBus::new());
        let reg = Registry::new(bus.clone(), "xt:bridge:");
        reg.save("sub-x", &spec()).await.unwrap();
        assert!(bus.hashes.lock().contains_key("xt:bridge:sub:sub-x"));
    }
}

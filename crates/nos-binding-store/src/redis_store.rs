//! Redis-backed binding store.
//!
//! Layout:
//!
//! - `NOS_PORT_BINDING:<id>`: hash with `port_id`, `vlan_id`, `switch_ip`,
//!   `instance_id`, `processed`
//! - `NOS_PORT_BINDING_IDS`: set of live binding ids
//! - `NOS_PORT_BINDING_SEQ`: id counter
//! - `NOS_PORT_BINDING_KEY:<port>|<vlan>|<switch>|<instance>`: id of the
//!   row holding that 4-tuple, keeping it unique
//!
//! The uniqueness check and the row write run as one Lua script, written
//! last, so a failed write never leaves a claim without its row.
//!
//! Rows written before the `processed` column existed lack the field and
//! read back as unprocessed.

use async_trait::async_trait;
use nos_fabric_common::VlanId;
use redis::aio::ConnectionManager;
use once_cell::sync::Lazy;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::error::{StoreError, StoreResult};
use crate::model::{BindingFilter, BindingKey, PortBinding};
use crate::store::BindingStore;

const ROW_PREFIX: &str = "NOS_PORT_BINDING";
const IDS_KEY: &str = "NOS_PORT_BINDING_IDS";
const SEQ_KEY: &str = "NOS_PORT_BINDING_SEQ";
const UNIQUE_PREFIX: &str = "NOS_PORT_BINDING_KEY";

/// KEYS: unique key, row key, ids set. ARGV: id, then field/value pairs.
static INSERT_ROW: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
        redis.call('HSET', KEYS[2], unpack(ARGV, 2))
        redis.call('SADD', KEYS[3], ARGV[1])
        redis.call('SET', KEYS[1], ARGV[1])
        return 1
        ",
    )
});

/// KEYS: row key, old unique key, new unique key. ARGV as [`INSERT_ROW`].
static REPLACE_ROW: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local moved = KEYS[2] ~= KEYS[3]
        if moved and redis.call('EXISTS', KEYS[3]) == 1 then return 0 end
        redis.call('HSET', KEYS[1], unpack(ARGV, 2))
        if moved then
            redis.call('DEL', KEYS[2])
            redis.call('SET', KEYS[3], ARGV[1])
        end
        return 1
        ",
    )
});

mod fields {
    pub const PORT_ID: &str = "port_id";
    pub const VLAN_ID: &str = "vlan_id";
    pub const SWITCH_IP: &str = "switch_ip";
    pub const INSTANCE_ID: &str = "instance_id";
    pub const PROCESSED: &str = "processed";
}

fn row_key(binding_id: u64) -> String {
    format!("{}:{}", ROW_PREFIX, binding_id)
}

fn unique_key(key: &BindingKey) -> String {
    format!(
        "{}:{}|{}|{}|{}",
        UNIQUE_PREFIX, key.port_id, key.vlan_id, key.switch_ip, key.instance_id
    )
}

fn encode(row: &PortBinding) -> Vec<(&'static str, String)> {
    vec![
        (fields::PORT_ID, row.port_id.clone()),
        (fields::VLAN_ID, row.vlan_id.to_string()),
        (fields::SWITCH_IP, row.switch_ip.clone()),
        (fields::INSTANCE_ID, row.instance_id.clone()),
        (fields::PROCESSED, row.processed.to_string()),
    ]
}

fn decode(binding_id: u64, mut values: HashMap<String, String>) -> StoreResult<PortBinding> {
    let mut take = |field: &str| {
        values.remove(field).ok_or_else(|| StoreError::Corrupt {
            binding_id,
            message: format!("missing field '{}'", field),
        })
    };

    let port_id = take(fields::PORT_ID)?;
    let vlan_id: VlanId = take(fields::VLAN_ID)?
        .parse()
        .map_err(|e| StoreError::Corrupt {
            binding_id,
            message: format!("bad vlan_id: {}", e),
        })?;
    let switch_ip = take(fields::SWITCH_IP)?;
    let instance_id = take(fields::INSTANCE_ID)?;
    let processed = values
        .get(fields::PROCESSED)
        .is_some_and(|v| v == "true" || v == "1");

    Ok(PortBinding {
        binding_id,
        port_id,
        vlan_id,
        switch_ip,
        instance_id,
        processed,
    })
}

/// [`BindingStore`] persisted in Redis hashes.
#[derive(Clone)]
pub struct RedisBindingStore {
    conn: ConnectionManager,
}

impl RedisBindingStore {
    /// Connects to the Redis server at `url`.
    #[instrument(skip_all)]
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!("Connected binding store to Redis");
        Ok(Self { conn })
    }

    async fn load_all(&self) -> StoreResult<Vec<PortBinding>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<u64> = conn.smembers(IDS_KEY).await?;
        ids.sort_unstable();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(row_key(*id));
        }
        let values: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut rows = Vec::with_capacity(ids.len());
        for (id, fields) in ids.into_iter().zip(values) {
            // A concurrent delete can leave an id without a hash.
            if fields.is_empty() {
                continue;
            }
            rows.push(decode(id, fields)?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl BindingStore for RedisBindingStore {
    async fn insert(&self, key: &BindingKey) -> StoreResult<PortBinding> {
        let mut conn = self.conn.clone();
        let binding_id: u64 = conn.incr(SEQ_KEY, 1u64).await?;
        let row = PortBinding::from_key(binding_id, key);

        let mut invocation = INSERT_ROW.prepare_invoke();
        invocation
            .key(unique_key(key))
            .key(row_key(binding_id))
            .key(IDS_KEY)
            .arg(binding_id);
        for (field, value) in encode(&row) {
            invocation.arg(field).arg(value);
        }
        let written: bool = invocation.invoke_async(&mut conn).await?;
        if !written {
            return Err(StoreError::Duplicate {
                binding: key.to_string(),
            });
        }
        Ok(row)
    }

    async fn find(&self, filter: &BindingFilter) -> StoreResult<Vec<PortBinding>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|row| filter.matches(row))
            .collect())
    }

    async fn delete(&self, rows: &[PortBinding]) -> StoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for row in rows {
            pipe.del(row_key(row.binding_id))
                .ignore()
                .srem(IDS_KEY, row.binding_id)
                .ignore()
                .del(unique_key(&row.key()))
                .ignore();
        }
        let () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn replace(&self, row: &PortBinding) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let current: HashMap<String, String> = conn.hgetall(row_key(row.binding_id)).await?;
        if current.is_empty() {
            return Err(StoreError::NotFound {
                filters: format!("binding_id={}", row.binding_id),
            });
        }
        let old_key = decode(row.binding_id, current)?.key();
        let new_key = row.key();

        let mut invocation = REPLACE_ROW.prepare_invoke();
        invocation
            .key(row_key(row.binding_id))
            .key(unique_key(&old_key))
            .key(unique_key(&new_key))
            .arg(row.binding_id);
        for (field, value) in encode(row) {
            invocation.arg(field).arg(value);
        }
        let written: bool = invocation.invoke_async(&mut conn).await?;
        if !written {
            return Err(StoreError::Duplicate {
                binding: new_key.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_decode_row() {
        let row = decode(
            3,
            values(&[
                ("port_id", "port:10"),
                ("vlan_id", "100"),
                ("switch_ip", "10.0.0.1"),
                ("instance_id", "vm-1"),
                ("processed", "true"),
            ]),
        )
        .unwrap();
        assert_eq!(row.binding_id, 3);
        assert_eq!(row.vlan_id, 100);
        assert!(row.processed);
    }

    #[test]
    fn test_decode_legacy_row_without_processed() {
        let row = decode(
            4,
            values(&[
                ("port_id", "port:10"),
                ("vlan_id", "100"),
                ("switch_ip", "10.0.0.1"),
                ("instance_id", "vm-1"),
            ]),
        )
        .unwrap();
        assert!(!row.processed);
    }

    #[test]
    fn test_decode_corrupt_row() {
        let err = decode(5, values(&[("port_id", "port:10"), ("vlan_id", "x")])).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { binding_id: 5, .. }));
    }

    #[test]
    fn test_unique_key_layout() {
        let key = BindingKey::new("portchannel:3", 20, "10.0.0.2", "vm-2");
        assert_eq!(
            unique_key(&key),
            "NOS_PORT_BINDING_KEY:portchannel:3|20|10.0.0.2|vm-2"
        );
        assert_eq!(row_key(9), "NOS_PORT_BINDING:9");
    }
}

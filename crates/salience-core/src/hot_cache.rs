//! Short-TTL full-content cache keyed by (user, item).
//!
//! Field values are strings or structured JSON. Strings are stored raw,
//! everything else JSON-encoded. Reads decode opportunistically: a stored
//! value that parses as non-string JSON comes back structured, anything else
//! (including malformed legacy payloads) comes back as the raw string.

use std::collections::BTreeMap;

use salience_store::WriteBatch;
use serde_json::Value;

use crate::error::Result;
use crate::keys;
use crate::obs;
use crate::shared::Shared;

/// Decoded fields of one cached item.
pub type HotFields = BTreeMap<String, Value>;

fn encode_field(value: &Value) -> Result<String> {
    Ok(match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other)?,
    })
}

fn decode_field(raw: String) -> Value {
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::String(_)) | Err(_) => Value::String(raw),
        Ok(value) => value,
    }
}

pub struct HotMemoryCache {
    shared: Shared,
}

impl HotMemoryCache {
    pub fn new(shared: Shared) -> Self {
        Self { shared }
    }

    /// Write `fields` and reset the entry's expiry. Existing fields not named
    /// in `fields` are kept. Returns false for empty ids or no fields.
    pub async fn put(&self, user: &str, item: &str, fields: &HotFields) -> Result<bool> {
        if user.is_empty() || item.is_empty() || fields.is_empty() {
            return Ok(false);
        }
        let encoded = fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), encode_field(value)?)))
            .collect::<Result<Vec<_>>>()?;

        let key = keys::memory(user, item);
        let mut batch = WriteBatch::new();
        batch
            .hset(&key, encoded)
            .expire(&key, self.shared.config.hot_cache_ttl());
        self.shared.store.apply(batch).await?;
        Ok(true)
    }

    /// Cached fields, or `None` when absent or expired.
    pub async fn get(&self, user: &str, item: &str) -> Result<Option<HotFields>> {
        let raw = self.shared.store.hgetall(&keys::memory(user, item)).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            raw.into_iter()
                .map(|(name, value)| (name, decode_field(value)))
                .collect(),
        ))
    }

    /// [`get`](Self::get) that reports a store failure as a miss.
    pub async fn get_or_miss(&self, user: &str, item: &str) -> Option<HotFields> {
        match self.get(user, item).await {
            Ok(fields) => fields,
            Err(e) => {
                obs::emit_store_fail_closed("hot_cache.get", &keys::memory(user, item), &e);
                None
            }
        }
    }

    pub async fn contains(&self, user: &str, item: &str) -> Result<bool> {
        Ok(self.shared.store.exists(&keys::memory(user, item)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_are_stored_raw() {
        assert_eq!(encode_field(&json!("hello")).unwrap(), "hello");
        assert_eq!(encode_field(&json!({"a": 1})).unwrap(), r#"{"a":1}"#);
        assert_eq!(encode_field(&json!(72)).unwrap(), "72");
    }

    #[test]
    fn decode_is_tolerant() {
        assert_eq!(decode_field("hello".to_string()), json!("hello"));
        assert_eq!(decode_field(r#"{"nested":1}"#.to_string()), json!({"nested": 1}));
        assert_eq!(decode_field("{broken".to_string()), json!("{broken"));
        assert_eq!(decode_field(r#""quoted""#.to_string()), json!(r#""quoted""#));
        assert_eq!(decode_field("72".to_string()), json!(72));
    }
}

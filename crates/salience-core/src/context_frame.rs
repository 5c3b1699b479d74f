//! The user's current situation: where they are, who is around, what they
//! are doing and which device reported it.
//!
//! Stored as a flat hash under `context:{user}`; `set` replaces the whole
//! frame and expires with the medium window.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use salience_store::WriteBatch;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::keys;
use crate::rolling::WindowName;
use crate::shared::Shared;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextFrame {
    pub location: Option<String>,
    pub people: Vec<String>,
    pub activity: Option<String>,
    pub device_id: Option<String>,
    pub device_type: Option<String>,
    /// Set by the store on write.
    pub updated_at: Option<DateTime<Utc>>,
}

impl ContextFrame {
    pub fn at(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            ..Default::default()
        }
    }

    pub fn with_people(mut self, people: Vec<String>) -> Self {
        self.people = people;
        self
    }

    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }

    pub fn with_device(mut self, id: impl Into<String>, kind: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self.device_type = Some(kind.into());
        self
    }

    fn to_fields(&self) -> Result<Vec<(String, String)>> {
        let mut fields = Vec::new();
        let mut push = |name: &str, value: &Option<String>| {
            if let Some(v) = value {
                fields.push((name.to_string(), v.clone()));
            }
        };
        push("location", &self.location);
        push("activity", &self.activity);
        push("device_id", &self.device_id);
        push("device_type", &self.device_type);
        if !self.people.is_empty() {
            fields.push(("people".to_string(), serde_json::to_string(&self.people)?));
        }
        if let Some(at) = self.updated_at {
            fields.push(("updated_at".to_string(), at.to_rfc3339()));
        }
        Ok(fields)
    }

    fn from_fields(user: &str, mut fields: BTreeMap<String, String>) -> Self {
        let people = match fields.remove("people") {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(user_id = %user, error = %e, "ignoring unreadable context people");
                Vec::new()
            }),
            None => Vec::new(),
        };
        let updated_at = fields
            .remove("updated_at")
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|at| at.with_timezone(&Utc));
        Self {
            location: fields.remove("location"),
            people,
            activity: fields.remove("activity"),
            device_id: fields.remove("device_id"),
            device_type: fields.remove("device_type"),
            updated_at,
        }
    }
}

pub struct ContextFrameStore {
    shared: Shared,
}

impl ContextFrameStore {
    pub fn new(shared: Shared) -> Self {
        Self { shared }
    }

    /// Replace the user's frame. Returns the frame as stored.
    pub async fn set(&self, user: &str, frame: ContextFrame) -> Result<ContextFrame> {
        let frame = ContextFrame {
            updated_at: Some(self.shared.clock.now()),
            ..frame
        };
        let key = keys::context(user);
        let _guard = self.shared.locks.lock(user).await;

        let mut batch = WriteBatch::new();
        batch
            .del(&key)
            .hset(&key, frame.to_fields()?)
            .expire(&key, self.shared.config.retention(WindowName::Medium));
        self.shared.store.apply(batch).await?;
        Ok(frame)
    }

    pub async fn get(&self, user: &str) -> Result<Option<ContextFrame>> {
        let fields = self.shared.store.hgetall(&keys::context(user)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(ContextFrame::from_fields(user, fields)))
    }

    /// Returns whether a frame existed.
    pub async fn clear(&self, user: &str) -> Result<bool> {
        let _guard = self.shared.locks.lock(user).await;
        Ok(self.shared.store.del(&keys::context(user)).await?)
    }
}

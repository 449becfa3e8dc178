//! Lifecycle event hooks.
//!
//! The repository fires an event before and after each write and search.
//! Hook runners are external collaborators injected at construction; they
//! receive a mutable payload and may veto the pending operation. No
//! expression evaluation happens in this layer.

use std::fmt;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::Result;

/// Repository lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeSave,
    AfterSave,
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeRemove,
    AfterRemove,
    BeforeSearch,
    AfterSearch,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BeforeSave => "before_save",
            HookEvent::AfterSave => "after_save",
            HookEvent::BeforeInsert => "before_insert",
            HookEvent::AfterInsert => "after_insert",
            HookEvent::BeforeUpdate => "before_update",
            HookEvent::AfterUpdate => "after_update",
            HookEvent::BeforeRemove => "before_remove",
            HookEvent::AfterRemove => "after_remove",
            HookEvent::BeforeSearch => "before_search",
            HookEvent::AfterSearch => "after_search",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable event payload handed to a hook runner.
///
/// Hooks mutate `fields` by reference; the repository reads relevant fields
/// back after the hook returns. Clearing `allow_update` vetoes the pending
/// write without failing it.
#[derive(Debug, Clone)]
pub struct HookPayload {
    pub fields: JsonMap<String, JsonValue>,
    pub allow_update: bool,
}

impl HookPayload {
    pub fn new() -> Self {
        Self {
            fields: JsonMap::new(),
            allow_update: true,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    /// Veto the pending operation.
    pub fn veto(&mut self) {
        self.allow_update = false;
    }
}

impl Default for HookPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// External hook runner collaborator.
#[async_trait]
pub trait HookRunner: Send + Sync {
    /// Whether a handler is registered for the event. The repository skips
    /// payload construction (including snapshot reloads) when none is.
    fn handles(&self, event: HookEvent) -> bool;

    /// Run the handler for an event against a mutable payload.
    async fn run(&self, event: HookEvent, payload: &mut HookPayload) -> Result<()>;
}

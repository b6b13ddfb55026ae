//! Watchpoints on debuggee object properties.

use crate::engine::ThreadExecutionEngine;
use crate::runtime::{ObjectId, RuntimeHookProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{AsRefStr, Display, EnumString};

/// Which property accesses a watchpoint fires for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WatchpointKind {
    Get,
    Set,
    GetOrSet,
}

/// Watchpoints keyed by (object, property).
#[derive(Default)]
pub(crate) struct WatchpointMap {
    entries: HashMap<(ObjectId, String), WatchpointKind>,
}

impl WatchpointMap {
    pub(crate) fn add(&mut self, object: ObjectId, property: String, kind: WatchpointKind) {
        self.entries.insert((object, property), kind);
    }

    pub(crate) fn remove(&mut self, object: ObjectId, property: &str) -> Option<WatchpointKind> {
        self.entries.remove(&(object, property.to_string()))
    }

    pub(crate) fn get(&self, object: ObjectId, property: &str) -> Option<WatchpointKind> {
        self.entries.get(&(object, property.to_string())).copied()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<R: RuntimeHookProvider> ThreadExecutionEngine<R> {
    pub fn add_watchpoint(&self, object: ObjectId, property: String, kind: WatchpointKind) {
        self.watchpoints.borrow_mut().add(object, property, kind);
    }

    pub fn remove_watchpoint(&self, object: ObjectId, property: &str) {
        self.watchpoints.borrow_mut().remove(object, property);
    }

    pub fn get_watchpoint(&self, object: ObjectId, property: &str) -> Option<WatchpointKind> {
        self.watchpoints.borrow().get(object, property)
    }

    pub(crate) fn remove_all_watchpoints(&self) {
        self.watchpoints.borrow_mut().clear();
    }
}

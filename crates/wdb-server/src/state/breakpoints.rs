//! Shared breakpoint store.
//!
//! An ordered, de-duplicated list of breakpoint descriptors. Every actual
//! mutation is announced on the control channels; adding a duplicate or
//! removing an absent entry announces nothing.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use wdb_protocol::Breakpoint;

use super::ControlRegistry;

pub struct BreakpointStore {
    breakpoints: Mutex<Vec<Breakpoint>>,
    control: Arc<ControlRegistry>,
}

impl BreakpointStore {
    pub fn new(control: Arc<ControlRegistry>) -> Self {
        Self {
            breakpoints: Mutex::new(Vec::new()),
            control,
        }
    }

    pub async fn add(&self, brk: Breakpoint) {
        let added = {
            let mut breakpoints = self.breakpoints.lock().await;
            if breakpoints.contains(&brk) {
                false
            } else {
                breakpoints.push(brk.clone());
                true
            }
        };
        if added {
            self.control
                .broadcast("AddBreak", Some(&brk.to_value()))
                .await;
        }
    }

    pub async fn remove(&self, brk: &Breakpoint) {
        let removed = {
            let mut breakpoints = self.breakpoints.lock().await;
            match breakpoints.iter().position(|stored| stored == brk) {
                Some(index) => {
                    breakpoints.remove(index);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.control
                .broadcast("RemoveBreak", Some(&brk.to_value()))
                .await;
        }
    }

    pub async fn get(&self) -> Vec<Breakpoint> {
        self.breakpoints.lock().await.clone()
    }

    /// The whole store as one JSON array, the shape debuggees expect in
    /// answer to `ServerBreaks`.
    pub async fn as_json(&self) -> Value {
        Value::Array(
            self.breakpoints
                .lock()
                .await
                .iter()
                .map(Breakpoint::to_value)
                .collect(),
        )
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::BatchError;

/// Key under which a chunk-oriented step stores the reader restart position.
pub const RESTART_POSITION_KEY: &str = "batch.reader.position";

/// Key/value state attached to a step or job execution.
///
/// The context is persisted by the [`JobRepository`](crate::core::repository::JobRepository)
/// at every commit. On restart, the step hands the last persisted context to
/// its reader so it can resume right after the last committed item.
///
/// # Examples
///
/// ```
/// use chunk_batch::core::context::ExecutionContext;
///
/// let mut context = ExecutionContext::new();
/// context.put("processed.files", 3).unwrap();
///
/// let files: Option<u32> = context.get("processed.files").unwrap();
/// assert_eq!(files, Some(3));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores any serializable value under `key`, replacing the previous one.
    pub fn put<V: Serialize>(&mut self, key: &str, value: V) -> Result<(), BatchError> {
        let value = serde_json::to_value(value)?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    /// Reads the value stored under `key` as `V`.
    ///
    /// Returns `Ok(None)` when the key is absent and an error when the stored
    /// value has an incompatible shape.
    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, BatchError> {
        match self.entries.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The restart position left by the last committed chunk, if any.
    pub fn restart_position(&self) -> Option<&Value> {
        self.entries.get(RESTART_POSITION_KEY)
    }

    /// Reads the restart position as a concrete token type.
    pub fn restart_position_as<V: DeserializeOwned>(&self) -> Result<Option<V>, BatchError> {
        self.get(RESTART_POSITION_KEY)
            .map_err(|error| BatchError::Restart(format!("unreadable restart position: {}", error)))
    }

    pub(crate) fn set_restart_position(&mut self, position: Option<Value>) {
        match position {
            Some(position) => {
                self.entries
                    .insert(RESTART_POSITION_KEY.to_string(), position);
            }
            None => {
                self.entries.remove(RESTART_POSITION_KEY);
            }
        }
    }
}

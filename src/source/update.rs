use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier assigned by the source. Not guaranteed to fit in 32 bits.
pub type UpdateId = i64;

/// Opaque record delivered by an [`UpdateSource`](super::UpdateSource).
pub trait Update: Send + 'static {
    fn update_id(&self) -> UpdateId;
}

impl Update for UpdateId {
    fn update_id(&self) -> UpdateId {
        *self
    }
}

/// Update whose payload is kept as untyped JSON.
///
/// Only `update_id` is interpreted; every other field of the wire object is retained
/// verbatim in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawUpdate {
    pub update_id: UpdateId,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RawUpdate {
    pub fn new(update_id: UpdateId) -> Self {
        Self {
            update_id,
            payload: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Name of the payload field carrying the update, e.g. `message` or `callback_query`.
    ///
    /// Updates normally carry exactly one such field. The payload map is key-sorted, so
    /// with several fields this is the alphabetically smallest key, not the first on the wire.
    pub fn kind(&self) -> Option<&str> {
        self.payload.keys().next().map(String::as_str)
    }
}

impl Update for RawUpdate {
    fn update_id(&self) -> UpdateId {
        self.update_id
    }
}

/// Highest update id in a batch, or `None` for an empty batch.
pub fn batch_high_water<U: Update>(batch: &[U]) -> Option<UpdateId> {
    batch.iter().map(Update::update_id).max()
}

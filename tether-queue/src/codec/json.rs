use crate::{JobRegistry, QueueError, QueueResult, Task};

use super::TaskEnvelope;

/// JSON codec for task payloads
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Serialize a task into its JSON envelope.
    ///
    /// Fails with `SerializationError` for NaN or infinite float arguments,
    /// which JSON cannot carry.
    pub fn encode(&self, task: &Task) -> QueueResult<String> {
        for link in task.links() {
            if let Some(arg) = link.args.iter().find(|arg| !arg.is_finite()) {
                return Err(QueueError::SerializationError(format!(
                    "job {} has a non-finite {} argument",
                    link.signature(),
                    arg.type_name()
                )));
            }
        }
        Ok(serde_json::to_string(&TaskEnvelope::from_task(task))?)
    }

    /// Parse a JSON envelope and resolve its jobs through the registry
    pub fn decode(&self, payload: &str, registry: &JobRegistry) -> QueueResult<Task> {
        let envelope: TaskEnvelope = serde_json::from_str(payload)?;
        envelope.into_task(registry)
    }
}

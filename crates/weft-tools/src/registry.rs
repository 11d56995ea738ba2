use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Capability;
use weft_core::types::{CapabilityContext, ToolDefinition, ToolResult};

/// The capabilities one agent may call, keyed by name.
///
/// Registering a second capability under an existing name replaces the first
/// but keeps its position, so definitions stay in a stable order.
#[derive(Clone, Default)]
pub struct CapabilitySet {
    by_name: HashMap<String, Arc<dyn Capability>>,
    order: Vec<String>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        if self.by_name.insert(name.clone(), capability).is_some() {
            debug!(capability = %name, "Replacing capability with same name");
        } else {
            self.order.push(name);
        }
    }

    pub fn extend(&mut self, capabilities: impl IntoIterator<Item = Arc<dyn Capability>>) {
        for capability in capabilities {
            self.register(capability);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.by_name.get(name).cloned()
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tool definitions for sending to the LLM.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.by_name.get(name))
            .map(|c| c.definition())
            .collect()
    }

    /// Invoke a capability by name, bounded by its own timeout.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: CapabilityContext,
    ) -> Result<ToolResult> {
        let capability = self
            .get(name)
            .ok_or_else(|| WeftError::CapabilityNotFound(name.to_string()))?;

        let timeout_secs = capability.timeout_secs();
        match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            capability.invoke(input, ctx),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(WeftError::CapabilityTimeout {
                capability: name.to_string(),
                timeout_secs,
            }),
        }
    }
}

impl std::fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.order.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use weft_core::types::SessionId;

    struct Named {
        name: &'static str,
        reply: &'static str,
        delay_ms: u64,
    }

    impl Capability for Named {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn timeout_secs(&self) -> u64 {
            1
        }
        fn invoke(
            &self,
            _input: serde_json::Value,
            _ctx: CapabilityContext,
        ) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
                Ok(ToolResult::success(self.reply))
            })
        }
    }

    fn ctx() -> CapabilityContext {
        CapabilityContext::new(SessionId::new(), std::env::temp_dir())
    }

    #[tokio::test]
    async fn later_registration_wins() {
        let mut set = CapabilitySet::new();
        set.register(Arc::new(Named { name: "a", reply: "first", delay_ms: 0 }));
        set.register(Arc::new(Named { name: "b", reply: "other", delay_ms: 0 }));
        set.register(Arc::new(Named { name: "a", reply: "second", delay_ms: 0 }));

        assert_eq!(set.names(), vec!["a", "b"]);
        let result = set.execute("a", serde_json::json!({}), ctx()).await.unwrap();
        assert_eq!(result.content, "second");
    }

    #[tokio::test]
    async fn unknown_capability_is_an_error() {
        let set = CapabilitySet::new();
        let err = set.execute("nope", serde_json::json!({}), ctx()).await.unwrap_err();
        assert!(matches!(err, WeftError::CapabilityNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_capability_times_out() {
        let mut set = CapabilitySet::new();
        set.register(Arc::new(Named { name: "slow", reply: "late", delay_ms: 5_000 }));
        let err = set.execute("slow", serde_json::json!({}), ctx()).await.unwrap_err();
        assert!(matches!(err, WeftError::CapabilityTimeout { timeout_secs: 1, .. }));
    }
}

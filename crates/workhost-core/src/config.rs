use derive_builder::Builder;
use serde_json::Value;
use std::collections::HashMap;

/// Immutable description of one worker process, supplied at start.
#[derive(Default, Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct WorkerConfig {
    /// Grouping tag for the worker; also the key crash notices are
    /// filtered by.
    pub kind: String,
    /// Optional value posted to the worker as its first message.
    #[builder(default)]
    pub payload: Option<Value>,
    /// Environment overlayed on the inherited environment.
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub args: Vec<String>,
    /// Arguments for the hosting runtime. The supervisor appends the
    /// worker-kind marker before spawning.
    #[builder(default)]
    #[builder(setter(custom))]
    pub exec_args: Vec<String>,
    #[builder(default)]
    pub allow_unsigned_libraries: bool,
    /// Free-form id threaded through log lines.
    #[builder(default)]
    pub correlation_id: Option<String>,
}

impl WorkerConfig {
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }
}

impl WorkerConfigBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn exec_args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let exec_args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.exec_args = Some(exec_args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());

        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

/// Worker configuration bound to an owning context.
///
/// Wraps a plain [`WorkerConfig`] with the data the context handshake
/// needs and the lifetime-binding switch.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct ContextBoundConfig {
    pub worker: WorkerConfig,
    /// Id of the context that requested the worker.
    pub response_context_id: u64,
    /// Channel name announced with the transferred endpoint.
    pub response_channel: String,
    /// Nonce the context uses to pair the endpoint with its request.
    pub response_nonce: String,
    /// When set, the worker dies with the context (reload or close).
    #[builder(default)]
    pub context_lifecycle_bound: bool,
}

impl ContextBoundConfig {
    pub fn builder() -> ContextBoundConfigBuilder {
        ContextBoundConfigBuilder::default()
    }
}

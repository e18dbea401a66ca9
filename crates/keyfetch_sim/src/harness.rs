//! Scripted scenarios.
//!
//! A scenario is a list of commands, each dispatched at a fixed offset from
//! the start of the run, against an engine backed by mock providers. The
//! run records every event emitted until the settle window after the last
//! step closes.

use crate::mock::{EchoOperation, FailFirstOperation, OperationProbe, PendingOperation, ProbeStats};
use crate::recorder::{EventRecorder, RecordedEvent};
use indexmap::IndexMap;
use keyfetch_core::{Command, CoreError};
use keyfetch_runtime::{EngineConfig, EngineMetrics, FetchEngine, Operation, OperationRegistry, RegistryError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Scenario error
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// Scenario file could not be read
    #[error("Failed to read scenario {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Scenario text is not valid
    #[error("Invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),

    /// Provider registration failed
    #[error("Provider setup failed: {0}")]
    Registry(#[from] RegistryError),

    /// Engine refused to start or to accept a command
    #[error("Engine error: {0}")]
    Engine(#[from] CoreError),
}

fn default_delay_ms() -> u64 {
    20
}

fn default_settle_ms() -> u64 {
    100
}

/// Mock provider backing a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MockProvider {
    /// [`EchoOperation`]
    Echo {
        /// Latency in milliseconds
        #[serde(default = "default_delay_ms")]
        delay_ms: u64,
    },
    /// [`FailFirstOperation`]
    FailFirst {
        /// Latency in milliseconds
        #[serde(default = "default_delay_ms")]
        delay_ms: u64,
    },
    /// [`PendingOperation`]
    Pending,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::Echo {
            delay_ms: default_delay_ms(),
        }
    }
}

impl MockProvider {
    /// Build the operation, reporting to `probe`
    #[must_use]
    pub fn build(&self, scope: &str, probe: Arc<OperationProbe>) -> Arc<dyn Operation> {
        match self {
            Self::Echo { delay_ms } => Arc::new(
                EchoOperation::new()
                    .with_delay(Duration::from_millis(*delay_ms))
                    .with_scope(scope)
                    .with_probe(probe),
            ),
            Self::FailFirst { delay_ms } => Arc::new(
                FailFirstOperation::new()
                    .with_delay(Duration::from_millis(*delay_ms))
                    .with_scope(scope)
                    .with_probe(probe),
            ),
            Self::Pending => Arc::new(PendingOperation::new().with_scope(scope).with_probe(probe)),
        }
    }
}

/// Scenario configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Engine settings
    pub engine: EngineConfig,
    /// Provider used when a request names none
    pub default_provider: MockProvider,
    /// Named providers
    pub providers: IndexMap<String, MockProvider>,
    /// How long to keep recording after the last step
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            default_provider: MockProvider::default(),
            providers: IndexMap::new(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl ScenarioConfig {
    /// Set the engine settings
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set the default provider
    #[must_use]
    pub fn with_default_provider(mut self, provider: MockProvider) -> Self {
        self.default_provider = provider;
        self
    }

    /// Add a named provider
    #[must_use]
    pub fn with_provider(mut self, name: impl Into<String>, provider: MockProvider) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    /// Set the settle window
    #[must_use]
    pub fn with_settle_ms(mut self, settle_ms: u64) -> Self {
        self.settle_ms = settle_ms;
        self
    }
}

/// One timed command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStep {
    /// Offset from the start of the run
    #[serde(default)]
    pub at_ms: u64,
    /// Command to dispatch
    pub command: Command,
}

impl ScenarioStep {
    /// Create a step
    #[must_use]
    pub fn new(at_ms: u64, command: impl Into<Command>) -> Self {
        Self {
            at_ms,
            command: command.into(),
        }
    }
}

/// A scripted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name
    #[serde(default)]
    pub name: String,
    /// Configuration
    #[serde(default)]
    pub config: ScenarioConfig,
    /// Steps; run in `at_ms` order, ties in file order
    #[serde(default)]
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// Create an empty scenario
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ScenarioConfig::default(),
            steps: Vec::new(),
        }
    }

    /// Set the configuration
    #[must_use]
    pub fn with_config(mut self, config: ScenarioConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a step
    #[must_use]
    pub fn with_step(mut self, at_ms: u64, command: impl Into<Command>) -> Self {
        self.steps.push(ScenarioStep::new(at_ms, command));
        self
    }

    /// Parse from JSON text
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a valid scenario
    pub fn from_json(text: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Offset of the last step
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.at_ms).max().unwrap_or(0)
    }

    fn registry(&self, probe: &Arc<OperationProbe>) -> Result<OperationRegistry, ScenarioError> {
        let mut registry =
            OperationRegistry::with_default(self.config.default_provider.build("", Arc::clone(probe)));
        for (name, provider) in &self.config.providers {
            registry.register(name.clone(), provider.build(name, Arc::clone(probe)))?;
        }
        Ok(registry)
    }

    /// Run the scenario on the current runtime
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot start or rejects a command
    pub async fn run(&self) -> Result<ScenarioResult, ScenarioError> {
        let probe = OperationProbe::new();
        let recorder = EventRecorder::new();
        let engine = FetchEngine::spawn(self.config.engine.clone(), self.registry(&probe)?, recorder.clone())?;
        tracing::debug!(scenario = %self.name, steps = self.steps.len(), "scenario started");

        let start = Instant::now();
        let mut steps: Vec<&ScenarioStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.at_ms);
        for step in steps {
            tokio::time::sleep_until(start + Duration::from_millis(step.at_ms)).await;
            engine.dispatch_wait(step.command.clone()).await?;
        }
        tokio::time::sleep_until(
            start + Duration::from_millis(self.duration_ms() + self.config.settle_ms),
        )
        .await;

        let result = ScenarioResult {
            name: self.name.clone(),
            events: recorder.recorded(),
            metrics: engine.metrics(),
            probe: probe.stats(),
        };
        engine.shutdown().await;
        tracing::debug!(scenario = %self.name, events = result.events.len(), "scenario finished");
        Ok(result)
    }
}

/// Outcome of a scenario run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioResult {
    /// Scenario name
    pub name: String,
    /// Events recorded until the settle window closed
    pub events: Vec<RecordedEvent>,
    /// Engine counters at the same point
    pub metrics: EngineMetrics,
    /// Mock call counters at the same point
    pub probe: ProbeStats,
}

impl ScenarioResult {
    /// `type` fields of the recorded events
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        self.events.iter().map(|r| r.event.type_name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyfetch_core::{CacheClear, FetchPolicy, FetchRequest};
    use serde_json::json;
    use std::io::Write;

    const SCRIPT: &str = r#"{
        "name": "refetch while running",
        "config": {"settle_ms": 80},
        "steps": [
            {"at_ms": 0, "command": {"kind": "fetch_request", "operation_type": "LOAD",
                "arguments": ["bar", "foo"], "context": {"test": 1}}},
            {"at_ms": 5, "command": {"kind": "fetch_request", "operation_type": "LOAD",
                "arguments": ["bar", "foo"], "context": {"test": 2}}},
            {"at_ms": 6, "command": {"kind": "loading_start"}}
        ]
    }"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_json(SCRIPT).unwrap();
        assert_eq!(scenario.name, "refetch while running");
        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(scenario.config.settle_ms, 80);
        assert_eq!(scenario.config.default_provider, MockProvider::Echo { delay_ms: 20 });
        assert_eq!(scenario.steps[2].command, Command::Other);
        assert_eq!(scenario.duration_ms(), 6);
    }

    #[test]
    fn test_parse_invalid_scenario() {
        let err = Scenario::from_json(r#"{"steps": [{"at_ms": "soon"}]}"#).unwrap_err();
        assert!(matches!(err, ScenarioError::Parse(_)));
    }

    #[test]
    fn test_load_scenario_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCRIPT.as_bytes()).unwrap();
        let scenario = Scenario::load(file.path()).unwrap();
        assert_eq!(scenario.steps.len(), 3);

        let missing = Scenario::load(file.path().with_extension("missing")).unwrap_err();
        assert!(matches!(missing, ScenarioError::Io { .. }));
    }

    #[test]
    fn test_mock_provider_serde() {
        let provider: MockProvider = serde_json::from_value(json!({"kind": "fail_first"})).unwrap();
        assert_eq!(provider, MockProvider::FailFirst { delay_ms: 20 });
        let provider: MockProvider = serde_json::from_value(json!({"kind": "pending"})).unwrap();
        assert_eq!(provider, MockProvider::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_refetch_while_running() {
        let result = Scenario::from_json(SCRIPT).unwrap().run().await.unwrap();

        assert_eq!(
            result.types(),
            vec!["LOADING_START", "LOADING_CANCEL", "LOADING_START", "LOAD", "LOADING_END"]
        );
        assert_eq!(result.metrics.commands_ignored, 1);
        assert_eq!(result.probe.calls, 2);
        assert_eq!(result.probe.teardowns, 1);
        assert_eq!(result.events[1].at_ms, 5);
        assert_eq!(result.events[3].at_ms, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_named_provider() {
        let scenario = Scenario::new("named")
            .with_config(ScenarioConfig::default().with_provider("slow", MockProvider::Pending))
            .with_step(
                0,
                FetchRequest::new("LOAD", vec![json!(1)])
                    .with_policy(FetchPolicy::PreferCache)
                    .with_provider("slow"),
            )
            .with_step(0, FetchRequest::new("OTHER", vec![json!(1)]).with_policy(FetchPolicy::PreferCache));

        let result = scenario.run().await.unwrap();
        assert_eq!(result.types(), vec!["LOADING_START", "LOADING_START", "OTHER", "LOADING_END"]);
        assert_eq!(result.metrics.in_flight, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_clear_step() {
        let request = FetchRequest::new("LOAD", vec![json!("bar")]);
        let scenario = Scenario::new("clear")
            .with_config(ScenarioConfig::default().with_default_provider(MockProvider::Pending))
            .with_step(0, request.clone())
            .with_step(10, CacheClear::from(&request));

        let result = scenario.run().await.unwrap();
        assert_eq!(result.types(), vec!["LOADING_START", "LOADING_CANCEL"]);
        assert_eq!(result.probe.teardowns, 1);
    }
}

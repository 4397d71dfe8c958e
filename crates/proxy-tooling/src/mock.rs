//! Mock Build Backend
//!
//! Scriptable [`ToolingConnector`] for testing the proxy without a build tool.
//!
//! A script is a list of [`MockStep`]s played through the operation's
//! listeners, followed by a [`MockOutcome`]. Steps are played on a separate
//! "build thread", like a real build tool reports from its own threads. In
//! concurrent mode output, error output and events each get their own
//! thread. Every operation invoked is recorded for later assertions.

use std::sync::{Arc, Mutex};
use std::thread;

use proxy_protocol::ActionPayload;

use crate::connector::{ConnectionTarget, PhasedAction, ProjectConnection, ToolingConnector};
use crate::error::{ToolingError, ToolingResult};
use crate::operation::{Operation, OperationConfig, OperationKind, OutputSink, ProgressNotifier};
use crate::progress::ProgressEvent;
use crate::value::{BuildEnvironmentModel, ToolingValue, ValueHandler};

/// One scripted callback.
#[derive(Debug, Clone)]
pub enum MockStep {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Progress(ProgressEvent),
    StreamedValue(serde_json::Value),
    ProjectsLoaded(serde_json::Value),
    BuildFinished(serde_json::Value),
    /// Raise a fault at this point of the build.
    Fail(String),
}

/// How the operation ends when no step failed.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Unit,
    Json(serde_json::Value),
    BuildEnvironment(BuildEnvironmentModel),
    Fail(String),
}

impl MockOutcome {
    fn into_result(self) -> ToolingResult<ToolingValue> {
        match self {
            Self::Unit => Ok(ToolingValue::Unit),
            Self::Json(value) => Ok(ToolingValue::Json(value)),
            Self::BuildEnvironment(model) => Ok(ToolingValue::BuildEnvironment(Box::new(model))),
            Self::Fail(message) => Err(ToolingError::Model(message)),
        }
    }
}

/// An operation the mock was asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub kind: OperationKind,
    pub config: OperationConfig,
    /// Number of progress subscriptions attached.
    pub progress_listeners: usize,
    pub has_streamed_value_listener: bool,
}

#[derive(Debug)]
struct MockScript {
    steps: Vec<MockStep>,
    outcome: MockOutcome,
    concurrent: bool,
    connect_error: Option<String>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            outcome: MockOutcome::Unit,
            concurrent: false,
            connect_error: None,
        }
    }
}

#[derive(Debug, Default)]
struct MockShared {
    script: Mutex<MockScript>,
    calls: Mutex<Vec<RecordedCall>>,
    targets: Mutex<Vec<ConnectionTarget>>,
}

/// Scriptable connector. Clones share the same script and call log.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    shared: Arc<MockShared>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step to the script.
    pub fn with_step(self, step: MockStep) -> Self {
        if let Ok(mut script) = self.shared.script.lock() {
            script.steps.push(step);
        }
        self
    }

    pub fn with_outcome(self, outcome: MockOutcome) -> Self {
        if let Ok(mut script) = self.shared.script.lock() {
            script.outcome = outcome;
        }
        self
    }

    /// Play output, error output and events from separate threads.
    pub fn concurrent(self) -> Self {
        if let Ok(mut script) = self.shared.script.lock() {
            script.concurrent = true;
        }
        self
    }

    /// Make `connect` fail.
    pub fn failing_connect(self, message: impl Into<String>) -> Self {
        if let Ok(mut script) = self.shared.script.lock() {
            script.connect_error = Some(message.into());
        }
        self
    }

    /// Operations invoked so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.shared
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Targets passed to `connect`.
    pub fn targets(&self) -> Vec<ConnectionTarget> {
        self.shared
            .targets
            .lock()
            .map(|targets| targets.clone())
            .unwrap_or_default()
    }
}

impl ToolingConnector for MockConnector {
    fn connect(&self, target: &ConnectionTarget) -> ToolingResult<Box<dyn ProjectConnection>> {
        if let Ok(mut targets) = self.shared.targets.lock() {
            targets.push(target.clone());
        }

        let connect_error = self
            .shared
            .script
            .lock()
            .ok()
            .and_then(|script| script.connect_error.clone());
        if let Some(message) = connect_error {
            return Err(ToolingError::Connection(message));
        }

        Ok(Box::new(MockConnection {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MockConnection {
    shared: Arc<MockShared>,
}

/// Everything a step can be delivered to.
struct Delivery {
    stdout: Option<OutputSink>,
    stderr: Option<OutputSink>,
    progress: ProgressNotifier,
    streamed_value: Option<ValueHandler>,
    projects_loaded: Option<ValueHandler>,
    build_finished: Option<ValueHandler>,
}

impl MockConnection {
    fn play(
        &self,
        kind: OperationKind,
        mut operation: Operation,
        phased: PhasedAction,
    ) -> ToolingResult<ToolingValue> {
        if let Ok(mut calls) = self.shared.calls.lock() {
            calls.push(RecordedCall {
                kind,
                config: operation.config.clone(),
                progress_listeners: operation.listeners.progress.len(),
                has_streamed_value_listener: operation.listeners.streamed_value.is_some(),
            });
        }

        let (steps, outcome, concurrent) = match self.shared.script.lock() {
            Ok(script) => (script.steps.clone(), script.outcome.clone(), script.concurrent),
            Err(_) => return Err(ToolingError::Model("mock script poisoned".to_string())),
        };

        let delivery = Delivery {
            stdout: operation.listeners.standard_output.take(),
            stderr: operation.listeners.standard_error.take(),
            progress: operation.listeners.take_progress(),
            streamed_value: operation.listeners.streamed_value.take(),
            projects_loaded: phased.projects_loaded.map(|(_, handler)| handler),
            build_finished: phased.build_finished.map(|(_, handler)| handler),
        };

        let played = if concurrent {
            play_concurrently(steps, delivery)
        } else {
            thread::spawn(move || play_in_order(steps, delivery))
                .join()
                .map_err(|_| ToolingError::Model("mock build thread panicked".to_string()))?
        };

        played.and_then(|_| outcome.into_result())
    }
}

fn play_in_order(steps: Vec<MockStep>, mut delivery: Delivery) -> ToolingResult<()> {
    for step in steps {
        match step {
            MockStep::Stdout(bytes) => write_chunk(delivery.stdout.as_mut(), &bytes)?,
            MockStep::Stderr(bytes) => write_chunk(delivery.stderr.as_mut(), &bytes)?,
            MockStep::Progress(event) => delivery.progress.notify(&event),
            MockStep::StreamedValue(value) => deliver(&delivery.streamed_value, value),
            MockStep::ProjectsLoaded(value) => deliver(&delivery.projects_loaded, value),
            MockStep::BuildFinished(value) => deliver(&delivery.build_finished, value),
            MockStep::Fail(message) => return Err(ToolingError::Model(message)),
        }
    }
    Ok(())
}

fn play_concurrently(steps: Vec<MockStep>, delivery: Delivery) -> ToolingResult<()> {
    let mut stdout_steps = Vec::new();
    let mut stderr_steps = Vec::new();
    let mut event_steps = Vec::new();
    let mut failure = None;

    for step in steps {
        match step {
            MockStep::Stdout(_) => stdout_steps.push(step),
            MockStep::Stderr(_) => stderr_steps.push(step),
            MockStep::Fail(message) => failure = failure.or(Some(message)),
            other => event_steps.push(other),
        }
    }

    let Delivery {
        stdout,
        stderr,
        progress,
        streamed_value,
        projects_loaded,
        build_finished,
    } = delivery;

    let handles = vec![
        thread::spawn(move || {
            play_in_order(stdout_steps, only_sinks(stdout, None))
        }),
        thread::spawn(move || {
            play_in_order(stderr_steps, only_sinks(None, stderr))
        }),
        thread::spawn(move || {
            play_in_order(
                event_steps,
                Delivery {
                    stdout: None,
                    stderr: None,
                    progress,
                    streamed_value,
                    projects_loaded,
                    build_finished,
                },
            )
        }),
    ];

    for handle in handles {
        handle
            .join()
            .map_err(|_| ToolingError::Model("mock build thread panicked".to_string()))??;
    }

    match failure {
        Some(message) => Err(ToolingError::Model(message)),
        None => Ok(()),
    }
}

fn only_sinks(stdout: Option<OutputSink>, stderr: Option<OutputSink>) -> Delivery {
    Delivery {
        stdout,
        stderr,
        progress: ProgressNotifier::default(),
        streamed_value: None,
        projects_loaded: None,
        build_finished: None,
    }
}

fn write_chunk(sink: Option<&mut OutputSink>, bytes: &[u8]) -> ToolingResult<()> {
    if let Some(sink) = sink {
        sink.write_all(bytes)?;
        sink.flush()?;
    }
    Ok(())
}

fn deliver(handler: &Option<ValueHandler>, value: serde_json::Value) {
    if let Some(handler) = handler {
        handler(ToolingValue::Json(value));
    }
}

impl ProjectConnection for MockConnection {
    fn run_build(&mut self, operation: Operation) -> ToolingResult<ToolingValue> {
        self.play(OperationKind::Build, operation, PhasedAction::default())
    }

    fn run_tests(&mut self, operation: Operation) -> ToolingResult<ToolingValue> {
        self.play(OperationKind::Test, operation, PhasedAction::default())
    }

    fn fetch_model(
        &mut self,
        model_type: &str,
        operation: Operation,
    ) -> ToolingResult<ToolingValue> {
        let kind = OperationKind::Model {
            model_type: model_type.to_string(),
        };
        self.play(kind, operation, PhasedAction::default())
    }

    fn run_action(
        &mut self,
        action: &ActionPayload,
        operation: Operation,
    ) -> ToolingResult<ToolingValue> {
        let kind = OperationKind::Action {
            action_id: action.action_id.clone(),
        };
        self.play(kind, operation, PhasedAction::default())
    }

    fn run_phased_action(
        &mut self,
        phased: PhasedAction,
        operation: Operation,
    ) -> ToolingResult<ToolingValue> {
        let kind = OperationKind::PhasedAction {
            projects_loaded: phased.projects_loaded.as_ref().map(|(a, _)| a.action_id.clone()),
            build_finished: phased.build_finished.as_ref().map(|(a, _)| a.action_id.clone()),
        };
        self.play(kind, operation, phased)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_protocol::OperationType;
    use std::io::{self, Write};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_records_calls_and_plays_steps() {
        let connector = MockConnector::new()
            .with_step(MockStep::Stdout(b"hello ".to_vec()))
            .with_step(MockStep::Stdout(b"world".to_vec()))
            .with_outcome(MockOutcome::Json(serde_json::json!(42)));

        let out = Shared::default();
        let mut conn = connector
            .connect(&ConnectionTarget::for_project("/p"))
            .unwrap();
        let value = conn
            .run_build(
                Operation::new()
                    .for_tasks(&["build".to_string()])
                    .with_standard_output(Box::new(out.clone())),
            )
            .unwrap();

        assert!(matches!(value, ToolingValue::Json(v) if v == serde_json::json!(42)));
        assert_eq!(&*out.0.lock().unwrap(), b"hello world");

        let calls = connector.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, OperationKind::Build);
        assert_eq!(calls[0].config.tasks, vec!["build"]);
        assert_eq!(connector.targets()[0].project_dir, std::path::PathBuf::from("/p"));
    }

    #[test]
    fn test_fail_step_stops_playback() {
        let connector = MockConnector::new()
            .with_step(MockStep::Stdout(b"a".to_vec()))
            .with_step(MockStep::Fail("compilation failed".to_string()))
            .with_step(MockStep::Stdout(b"b".to_vec()));

        let out = Shared::default();
        let mut conn = connector
            .connect(&ConnectionTarget::for_project("/p"))
            .unwrap();
        let result = conn.run_tests(Operation::new().with_standard_output(Box::new(out.clone())));

        assert!(matches!(result, Err(ToolingError::Model(m)) if m == "compilation failed"));
        assert_eq!(&*out.0.lock().unwrap(), b"a");
    }

    #[test]
    fn test_phase_values_reach_phase_handlers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let loaded = Arc::clone(&seen);
        let finished = Arc::clone(&seen);

        let connector = MockConnector::new()
            .with_step(MockStep::ProjectsLoaded(serde_json::json!("loaded")))
            .with_step(MockStep::BuildFinished(serde_json::json!("finished")));
        let mut conn = connector
            .connect(&ConnectionTarget::for_project("/p"))
            .unwrap();

        let on_loaded: ValueHandler = Arc::new(move |v: ToolingValue| {
            loaded.lock().unwrap().push(format!("pl:{:?}", v));
        });
        let on_finished: ValueHandler = Arc::new(move |v: ToolingValue| {
            finished.lock().unwrap().push(format!("bf:{:?}", v));
        });
        let phased = PhasedAction {
            projects_loaded: Some((ActionPayload::new("a"), on_loaded)),
            build_finished: Some((ActionPayload::new("b"), on_finished)),
        };
        conn.run_phased_action(phased, Operation::new()).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with("pl:"));
        assert!(seen[1].starts_with("bf:"));
        assert_eq!(
            connector.calls()[0].kind,
            OperationKind::PhasedAction {
                projects_loaded: Some("a".to_string()),
                build_finished: Some("b".to_string()),
            }
        );
    }

    #[test]
    fn test_concurrent_mode_delivers_everything() {
        let mut connector = MockConnector::new().concurrent();
        for i in 0..20 {
            connector = connector
                .with_step(MockStep::Stdout(vec![b'o'; i + 1]))
                .with_step(MockStep::Stderr(vec![b'e'; i + 1]))
                .with_step(MockStep::Progress(ProgressEvent::started(
                    OperationType::Task,
                    format!(":t{}", i),
                )));
        }

        let out = Shared::default();
        let err = Shared::default();
        let events = Arc::new(Mutex::new(0usize));
        let events_clone = Arc::clone(&events);

        let mut conn = connector
            .connect(&ConnectionTarget::for_project("/p"))
            .unwrap();
        conn.run_build(
            Operation::new()
                .with_standard_output(Box::new(out.clone()))
                .with_standard_error(Box::new(err.clone()))
                .add_progress_listener(Arc::new(move |_: &ProgressEvent| {
                    *events_clone.lock().unwrap() += 1;
                })),
        )
        .unwrap();

        assert_eq!(out.0.lock().unwrap().len(), (1..=20).sum::<usize>());
        assert_eq!(err.0.lock().unwrap().len(), (1..=20).sum::<usize>());
        assert_eq!(*events.lock().unwrap(), 20);
    }

    #[test]
    fn test_failing_connect() {
        let connector = MockConnector::new().failing_connect("daemon unavailable");
        let result = connector.connect(&ConnectionTarget::for_project("/p"));
        assert!(matches!(result, Err(ToolingError::Connection(_))));
        assert_eq!(connector.targets().len(), 1);
    }
}

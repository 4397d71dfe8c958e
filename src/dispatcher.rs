//! Build Request Dispatcher
//!
//! Turns one [`TargetBuildParameters`] into one build-tool operation, wires
//! its output and progress into the message channel, and ends with exactly
//! one terminal message.

use std::any::Any;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use proxy_protocol::{
    BuildEventPayload, BuildRequest, FailureDescription, FaultKind, IntermediateResultType,
    ProtocolMessage, TargetBuildParameters,
};
use proxy_tooling::{
    ConnectionTarget, Operation, PhasedAction, ProgressEvent, ProgressListener, ToolingConnector,
    ToolingError, ToolingValue, ValueHandler,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, MessageSink};
use crate::convert::{self, ConvertError};
use crate::init_scripts;

/// How a dispatched build ended, as reported to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Succeeded,
    Failed(FaultKind),
}

/// Faults raised before a result exists.
#[derive(Debug, Error)]
enum BuildFault {
    #[error("failed to materialize init scripts")]
    InitScripts(#[source] io::Error),

    #[error(transparent)]
    Tooling(#[from] ToolingError),

    #[error("build tool panicked: {0}")]
    Panicked(String),
}

/// Faults raised while delivering a successful result.
#[derive(Debug, Error)]
enum SerializationFault {
    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("failed to encode result message")]
    Channel(#[source] ChannelError),
}

pub struct BuildDispatcher {
    connector: Arc<dyn ToolingConnector>,
    sink: Arc<dyn MessageSink>,
    project_dir: PathBuf,
}

impl BuildDispatcher {
    pub fn new(
        connector: Arc<dyn ToolingConnector>,
        sink: Arc<dyn MessageSink>,
        project_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            connector,
            sink,
            project_dir: project_dir.into(),
        }
    }

    /// Run the requested operation to completion and send its terminal message.
    pub fn execute(&self, params: &TargetBuildParameters) -> SessionOutcome {
        info!(
            variant = params.request.variant_name(),
            project_dir = %self.project_dir.display(),
            "dispatching build request"
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run(params)))
            .unwrap_or_else(|payload| Err(BuildFault::Panicked(panic_message(&*payload))));

        match result {
            Ok(value) => self.finish_success(value),
            Err(fault) => self.finish_failure(FaultKind::BuildFault, &fault),
        }
    }

    fn run(&self, params: &TargetBuildParameters) -> Result<ToolingValue, BuildFault> {
        let scripts = init_scripts::materialize_all(&self.project_dir, &params.init_scripts)
            .map_err(BuildFault::InitScripts)?;
        let mut arguments = init_scripts::init_script_arguments(&scripts);
        arguments.extend(params.arguments.iter().cloned());

        let target = ConnectionTarget {
            project_dir: self.project_dir.clone(),
            gradle_home: params.gradle_home.clone(),
            gradle_user_home: params.gradle_user_home.clone(),
        };
        let mut connection = self.connector.connect(&target)?;

        let operation = self.configure(params, arguments);

        let value = match &params.request {
            BuildRequest::BuildLauncher { tasks } => {
                connection.run_build(operation.for_tasks(tasks))?
            }
            BuildRequest::TestLauncher {} => connection.run_tests(operation)?,
            BuildRequest::ModelBuilder { model_type, tasks } => {
                connection.fetch_model(model_type, operation.for_tasks(tasks))?
            }
            BuildRequest::BuildAction { action, tasks } => {
                let operation = operation
                    .for_tasks(tasks)
                    .with_streamed_value_listener(self.intermediate_handler(
                        IntermediateResultType::StreamedValue,
                    ));
                connection.run_action(action, operation)?
            }
            BuildRequest::PhasedBuildAction {
                projects_loaded_action,
                build_finished_action,
                tasks,
            } => {
                let phased = PhasedAction {
                    projects_loaded: projects_loaded_action.clone().map(|action| {
                        (
                            action,
                            self.intermediate_handler(IntermediateResultType::ProjectLoaded),
                        )
                    }),
                    build_finished: build_finished_action.clone().map(|action| {
                        (
                            action,
                            self.intermediate_handler(IntermediateResultType::BuildFinished),
                        )
                    }),
                };
                let operation = operation
                    .for_tasks(tasks)
                    .with_streamed_value_listener(self.intermediate_handler(
                        IntermediateResultType::StreamedValue,
                    ));
                connection.run_phased_action(phased, operation)?
            }
        };

        debug!(?value, "operation result");
        Ok(value)
    }

    /// Settings and listeners shared by every operation variant.
    fn configure(&self, params: &TargetBuildParameters, arguments: Vec<String>) -> Operation {
        let mut operation = Operation::new()
            .with_arguments(arguments)
            .with_jvm_arguments(params.jvm_arguments.clone())
            .with_standard_output(Box::new(OutputForwarder::stdout(Arc::clone(&self.sink))))
            .with_standard_error(Box::new(OutputForwarder::stderr(Arc::clone(&self.sink))))
            .add_progress_listener_for(
                self.typed_progress_listener(),
                params.progress_listener_operation_types.clone(),
            )
            .add_progress_listener(self.description_listener());

        if !params.environment_variables.is_empty() {
            operation = operation.with_environment_variables(params.environment_variables.clone());
        }
        operation
    }

    fn typed_progress_listener(&self) -> ProgressListener {
        let sink = Arc::clone(&self.sink);
        Arc::new(move |event: &ProgressEvent| {
            let message = ProtocolMessage::BuildEvent {
                event: BuildEventPayload::Progress(convert::progress_event(event)),
            };
            if let Err(e) = sink.send(message) {
                warn!(error = %e, "dropping progress event");
            }
        })
    }

    fn description_listener(&self) -> ProgressListener {
        let sink = Arc::clone(&self.sink);
        Arc::new(move |event: &ProgressEvent| {
            if event.description.is_empty() {
                return;
            }
            let message = ProtocolMessage::BuildEvent {
                event: BuildEventPayload::Description(event.description.clone()),
            };
            if let Err(e) = sink.send(message) {
                warn!(error = %e, "dropping progress description");
            }
        })
    }

    fn intermediate_handler(&self, kind: IntermediateResultType) -> ValueHandler {
        let sink = Arc::clone(&self.sink);
        Arc::new(move |value: ToolingValue| {
            let payload = match convert::convert_and_serialize(value) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(?kind, error = %e, "dropping intermediate result");
                    return;
                }
            };
            if let Err(e) = sink.send(ProtocolMessage::IntermediateResult { kind, payload }) {
                warn!(?kind, error = %e, "failed to send intermediate result");
            }
        })
    }

    fn finish_success(&self, value: ToolingValue) -> SessionOutcome {
        let delivered = convert::convert_and_serialize(value)
            .map_err(SerializationFault::from)
            .and_then(|payload| {
                self.sink
                    .send(ProtocolMessage::Success { payload })
                    .map_err(SerializationFault::Channel)
            });

        match delivered {
            Ok(()) => {
                info!("build succeeded");
                SessionOutcome::Succeeded
            }
            Err(fault) => self.finish_failure(FaultKind::SerializationFault, &fault),
        }
    }

    fn finish_failure(
        &self,
        kind: FaultKind,
        fault: &(dyn std::error::Error + 'static),
    ) -> SessionOutcome {
        let failure = FailureDescription::from_error(kind, fault);
        info!(%failure, "build failed");
        if let Err(e) = self.sink.send(ProtocolMessage::Failure { failure }) {
            warn!(error = %e, "failed to send failure message");
        }
        SessionOutcome::Failed(kind)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Forwards each chunk written by the build tool as one output message.
struct OutputForwarder {
    sink: Arc<dyn MessageSink>,
    stream: Stream,
}

impl OutputForwarder {
    fn stdout(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            sink,
            stream: Stream::Stdout,
        }
    }

    fn stderr(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            sink,
            stream: Stream::Stderr,
        }
    }
}

impl Write for OutputForwarder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let output = buf.to_vec();
        let message = match self.stream {
            Stream::Stdout => ProtocolMessage::StandardOutput { output },
            Stream::Stderr => ProtocolMessage::StandardError { output },
        };
        self.sink
            .send(message)
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingSink;
    use proxy_protocol::{ActionPayload, OperationType, MAX_FRAME_BYTES};
    use proxy_tooling::mock::{MockConnector, MockOutcome, MockStep};
    use proxy_tooling::{BuildEnvironmentModel, OperationKind};
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        sink: Arc<RecordingSink>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                sink: Arc::new(RecordingSink::new()),
            }
        }

        fn execute(&self, connector: &MockConnector, params: &TargetBuildParameters) -> SessionOutcome {
            let dispatcher = BuildDispatcher::new(
                Arc::new(connector.clone()),
                self.sink.clone(),
                self.dir.path(),
            );
            dispatcher.execute(params)
        }

        fn messages(&self) -> Vec<ProtocolMessage> {
            self.sink.messages()
        }
    }

    fn tasks(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn all_variants() -> Vec<(BuildRequest, OperationKind)> {
        vec![
            (
                BuildRequest::BuildLauncher { tasks: tasks(&["build"]) },
                OperationKind::Build,
            ),
            (BuildRequest::TestLauncher {}, OperationKind::Test),
            (
                BuildRequest::ModelBuilder {
                    model_type: "BuildEnvironment".to_string(),
                    tasks: vec![],
                },
                OperationKind::Model {
                    model_type: "BuildEnvironment".to_string(),
                },
            ),
            (
                BuildRequest::BuildAction {
                    action: ActionPayload::new("sync"),
                    tasks: vec![],
                },
                OperationKind::Action {
                    action_id: "sync".to_string(),
                },
            ),
            (
                BuildRequest::PhasedBuildAction {
                    projects_loaded_action: Some(ActionPayload::new("loaded")),
                    build_finished_action: None,
                    tasks: vec![],
                },
                OperationKind::PhasedAction {
                    projects_loaded: Some("loaded".to_string()),
                    build_finished: None,
                },
            ),
        ]
    }

    #[test]
    fn test_each_variant_invokes_one_matching_operation() {
        for (request, expected) in all_variants() {
            let fixture = Fixture::new();
            let connector = MockConnector::new();
            let outcome = fixture.execute(&connector, &TargetBuildParameters::new(request));

            assert_eq!(outcome, SessionOutcome::Succeeded);
            let calls = connector.calls();
            assert_eq!(calls.len(), 1, "{:?}", expected);
            assert_eq!(calls[0].kind, expected);
            assert_eq!(fixture.sink.terminal_messages().len(), 1);
        }
    }

    #[test]
    fn test_streamed_value_listener_only_for_action_variants() {
        for (request, _) in all_variants() {
            let expects_listener = request.supports_intermediate_results();
            let fixture = Fixture::new();
            let connector = MockConnector::new();
            fixture.execute(&connector, &TargetBuildParameters::new(request));

            assert_eq!(
                connector.calls()[0].has_streamed_value_listener,
                expects_listener
            );
            // Typed and catch-all listeners are always attached.
            assert_eq!(connector.calls()[0].progress_listeners, 2);
        }
    }

    #[test]
    fn test_success_payload_is_serialized_result() {
        let fixture = Fixture::new();
        let connector = MockConnector::new().with_outcome(MockOutcome::Json(json!(42)));
        let params = TargetBuildParameters::new(BuildRequest::BuildLauncher {
            tasks: tasks(&["build"]),
        });

        fixture.execute(&connector, &params);

        assert_eq!(
            fixture.messages(),
            vec![ProtocolMessage::Success {
                payload: b"42".to_vec()
            }]
        );
        assert_eq!(connector.calls()[0].config.tasks, vec!["build"]);
    }

    #[test]
    fn test_configuration_forwarded() {
        let fixture = Fixture::new();
        let connector = MockConnector::new();
        let mut params = TargetBuildParameters::new(BuildRequest::BuildLauncher {
            tasks: tasks(&["assemble"]),
        });
        params.arguments = tasks(&["--offline", "-q"]);
        params.jvm_arguments = tasks(&["-Xmx1g"]);
        params.gradle_user_home = Some(PathBuf::from("/tmp/gradle-home"));
        params.environment_variables = BTreeMap::from([("CI".to_string(), "1".to_string())]);

        fixture.execute(&connector, &params);

        let calls = connector.calls();
        let config = &calls[0].config;
        assert_eq!(config.arguments, vec!["--offline", "-q"]);
        assert_eq!(config.jvm_arguments, vec!["-Xmx1g"]);
        assert_eq!(
            config.environment_variables,
            Some(BTreeMap::from([("CI".to_string(), "1".to_string())]))
        );

        let targets = connector.targets();
        let target = &targets[0];
        assert_eq!(target.project_dir, fixture.dir.path());
        assert_eq!(target.gradle_user_home, Some(PathBuf::from("/tmp/gradle-home")));
    }

    #[test]
    fn test_empty_environment_not_applied() {
        let fixture = Fixture::new();
        let connector = MockConnector::new();
        fixture.execute(
            &connector,
            &TargetBuildParameters::new(BuildRequest::TestLauncher {}),
        );

        assert_eq!(connector.calls()[0].config.environment_variables, None);
    }

    #[test]
    fn test_init_scripts_prepended_to_arguments() {
        let fixture = Fixture::new();
        let connector = MockConnector::new();
        let mut params = TargetBuildParameters::new(BuildRequest::BuildLauncher { tasks: vec![] });
        params.arguments = tasks(&["--stacktrace"]);
        params.init_scripts = BTreeMap::from([("ijinit".to_string(), "println 1".to_string())]);

        fixture.execute(&connector, &params);

        let script = init_scripts::init_scripts_dir(fixture.dir.path()).join("ijinit.gradle");
        let calls = connector.calls();
        assert_eq!(
            calls[0].config.arguments,
            vec![
                "--init-script".to_string(),
                script.to_string_lossy().into_owned(),
                "--stacktrace".to_string(),
            ]
        );
        assert_eq!(std::fs::read_to_string(script).unwrap(), "println 1");
    }

    #[test]
    fn test_streaming_messages_precede_terminal() {
        let fixture = Fixture::new();
        let connector = MockConnector::new()
            .with_step(MockStep::Stdout(b"compiling\n".to_vec()))
            .with_step(MockStep::Stderr(b"warning\n".to_vec()))
            .with_step(MockStep::Progress(ProgressEvent::started(
                OperationType::Task,
                ":compile",
            )))
            .with_outcome(MockOutcome::Unit);
        let mut params = TargetBuildParameters::new(BuildRequest::BuildLauncher { tasks: vec![] });
        params.progress_listener_operation_types = BTreeSet::from([OperationType::Task]);

        fixture.execute(&connector, &params);

        let messages = fixture.messages();
        assert_eq!(messages.len(), 5);
        assert!(matches!(&messages[0], ProtocolMessage::StandardOutput { output } if output == b"compiling\n"));
        assert!(matches!(&messages[1], ProtocolMessage::StandardError { output } if output == b"warning\n"));
        assert!(matches!(
            &messages[2],
            ProtocolMessage::BuildEvent { event: BuildEventPayload::Progress(e) } if e.display_name == ":compile"
        ));
        assert!(matches!(
            &messages[3],
            ProtocolMessage::BuildEvent { event: BuildEventPayload::Description(d) } if d == ":compile started"
        ));
        assert_eq!(
            messages[4],
            ProtocolMessage::Success {
                payload: b"null".to_vec()
            }
        );
    }

    #[test]
    fn test_unsubscribed_types_only_reach_description_listener() {
        let fixture = Fixture::new();
        let connector = MockConnector::new()
            .with_step(MockStep::Progress(ProgressEvent::started(
                OperationType::FileDownload,
                "https://repo/x.jar",
            )))
            .with_step(MockStep::Progress(
                ProgressEvent::started(OperationType::Generic, "quiet").with_description(""),
            ));
        let mut params = TargetBuildParameters::new(BuildRequest::BuildLauncher { tasks: vec![] });
        params.progress_listener_operation_types = BTreeSet::from([OperationType::Task]);

        fixture.execute(&connector, &params);

        let messages = fixture.messages();
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0],
            ProtocolMessage::BuildEvent { event: BuildEventPayload::Description(_) }
        ));
        assert!(messages[1].is_terminal());
    }

    #[test]
    fn test_phased_action_forwards_intermediate_results() {
        let fixture = Fixture::new();
        let connector = MockConnector::new()
            .with_step(MockStep::ProjectsLoaded(json!({"projects": 3})))
            .with_step(MockStep::StreamedValue(json!("partial")))
            .with_step(MockStep::BuildFinished(json!(true)))
            .with_outcome(MockOutcome::Json(json!("done")));
        let params = TargetBuildParameters::new(BuildRequest::PhasedBuildAction {
            projects_loaded_action: Some(ActionPayload::new("loaded")),
            build_finished_action: Some(ActionPayload::new("finished")),
            tasks: vec![],
        });

        fixture.execute(&connector, &params);

        let kinds: Vec<_> = fixture
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                ProtocolMessage::IntermediateResult { kind, payload } => Some((kind, payload)),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (
                    IntermediateResultType::ProjectLoaded,
                    br#"{"projects":3}"#.to_vec()
                ),
                (IntermediateResultType::StreamedValue, br#""partial""#.to_vec()),
                (IntermediateResultType::BuildFinished, b"true".to_vec()),
            ]
        );
        assert_eq!(
            fixture.messages().last(),
            Some(&ProtocolMessage::Success {
                payload: br#""done""#.to_vec()
            })
        );
    }

    #[test]
    fn test_build_environment_result_normalized() {
        let fixture = Fixture::new();
        let connector = MockConnector::new().with_outcome(MockOutcome::BuildEnvironment(
            BuildEnvironmentModel {
                root_dir: PathBuf::from("/work"),
                gradle_version: "8.5".to_string(),
                gradle_user_home: None,
                java_home: Some(PathBuf::from("/jdk")),
                jvm_arguments: vec![],
            },
        ));
        let params = TargetBuildParameters::new(BuildRequest::ModelBuilder {
            model_type: "BuildEnvironment".to_string(),
            tasks: vec![],
        });

        fixture.execute(&connector, &params);

        let payload = match fixture.messages().pop() {
            Some(ProtocolMessage::Success { payload }) => payload,
            other => panic!("expected success, got {:?}", other),
        };
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["gradle"]["gradle_version"], "8.5");
        assert_eq!(value["java"]["java_home"], "/jdk");
        assert_eq!(value["build_identifier"]["root_dir"], "/work");
    }

    #[test]
    fn test_fault_at_any_step_yields_one_failure() {
        let steps = vec![
            MockStep::Stdout(b"a".to_vec()),
            MockStep::Progress(ProgressEvent::started(OperationType::Task, ":a")),
            MockStep::Stderr(b"b".to_vec()),
        ];
        for fail_at in 0..=steps.len() {
            let mut connector = MockConnector::new();
            for (i, step) in steps.iter().enumerate() {
                if i == fail_at {
                    connector = connector.with_step(MockStep::Fail("compilation failed".into()));
                }
                connector = connector.with_step(step.clone());
            }
            if fail_at == steps.len() {
                connector = connector.with_outcome(MockOutcome::Fail("model unavailable".into()));
            }

            let fixture = Fixture::new();
            let outcome = fixture.execute(
                &connector,
                &TargetBuildParameters::new(BuildRequest::BuildLauncher { tasks: vec![] }),
            );

            assert_eq!(outcome, SessionOutcome::Failed(FaultKind::BuildFault));
            let messages = fixture.messages();
            let terminals = fixture.sink.terminal_messages();
            assert_eq!(terminals.len(), 1, "fail_at={}", fail_at);
            assert!(messages.last().unwrap().is_terminal());
            assert!(matches!(
                &terminals[0],
                ProtocolMessage::Failure { failure } if failure.kind == FaultKind::BuildFault
            ));
        }
    }

    struct PanickingConnector;

    struct PanickingConnection;

    impl ToolingConnector for PanickingConnector {
        fn connect(
            &self,
            _: &ConnectionTarget,
        ) -> proxy_tooling::ToolingResult<Box<dyn proxy_tooling::ProjectConnection>> {
            Ok(Box::new(PanickingConnection))
        }
    }

    impl proxy_tooling::ProjectConnection for PanickingConnection {
        fn run_build(&mut self, _: Operation) -> proxy_tooling::ToolingResult<ToolingValue> {
            panic!("backend blew up")
        }

        fn run_tests(&mut self, _: Operation) -> proxy_tooling::ToolingResult<ToolingValue> {
            panic!("{} tests", "backend blew up during")
        }

        fn fetch_model(
            &mut self,
            _: &str,
            _: Operation,
        ) -> proxy_tooling::ToolingResult<ToolingValue> {
            std::panic::panic_any(17u32)
        }

        fn run_action(
            &mut self,
            _: &ActionPayload,
            _: Operation,
        ) -> proxy_tooling::ToolingResult<ToolingValue> {
            unimplemented!()
        }

        fn run_phased_action(
            &mut self,
            _: PhasedAction,
            _: Operation,
        ) -> proxy_tooling::ToolingResult<ToolingValue> {
            unimplemented!()
        }
    }

    #[test]
    fn test_backend_panic_yields_one_failure() {
        let cases = vec![
            (
                BuildRequest::BuildLauncher { tasks: vec![] },
                "build tool panicked: backend blew up",
            ),
            (
                BuildRequest::TestLauncher {},
                "build tool panicked: backend blew up during tests",
            ),
            (
                BuildRequest::ModelBuilder {
                    model_type: "BuildEnvironment".to_string(),
                    tasks: vec![],
                },
                "build tool panicked: unknown panic payload",
            ),
        ];

        for (request, expected) in cases {
            let dir = TempDir::new().unwrap();
            let sink = Arc::new(RecordingSink::new());
            let dispatcher =
                BuildDispatcher::new(Arc::new(PanickingConnector), sink.clone(), dir.path());

            let outcome = dispatcher.execute(&TargetBuildParameters::new(request));

            assert_eq!(outcome, SessionOutcome::Failed(FaultKind::BuildFault));
            match &sink.messages()[..] {
                [ProtocolMessage::Failure { failure }] => {
                    assert_eq!(failure.kind, FaultKind::BuildFault);
                    assert_eq!(failure.message, expected);
                }
                other => panic!("unexpected messages {:?}", other),
            }
        }
    }

    #[test]
    fn test_connect_failure_reported() {
        let fixture = Fixture::new();
        let connector = MockConnector::new().failing_connect("no such project");
        let outcome = fixture.execute(
            &connector,
            &TargetBuildParameters::new(BuildRequest::TestLauncher {}),
        );

        assert_eq!(outcome, SessionOutcome::Failed(FaultKind::BuildFault));
        match &fixture.messages()[..] {
            [ProtocolMessage::Failure { failure }] => {
                assert!(failure.message.contains("no such project"));
            }
            other => panic!("unexpected messages {:?}", other),
        }
        assert!(connector.calls().is_empty());
    }

    #[test]
    fn test_unserializable_result_is_serialization_fault() {
        let fixture = Fixture::new();
        let huge = json!("x".repeat(MAX_FRAME_BYTES));
        let connector = MockConnector::new().with_outcome(MockOutcome::Json(huge));

        let outcome = fixture.execute(
            &connector,
            &TargetBuildParameters::new(BuildRequest::BuildLauncher { tasks: vec![] }),
        );

        assert_eq!(outcome, SessionOutcome::Failed(FaultKind::SerializationFault));
        match &fixture.messages()[..] {
            [ProtocolMessage::Failure { failure }] => {
                assert_eq!(failure.kind, FaultKind::SerializationFault);
            }
            other => panic!("unexpected messages {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_callbacks_all_delivered() {
        let fixture = Fixture::new();
        let mut connector = MockConnector::new().concurrent();
        for i in 0..20 {
            connector = connector
                .with_step(MockStep::Stdout(format!("out {}\n", i).into_bytes()))
                .with_step(MockStep::Stderr(format!("err {}\n", i).into_bytes()))
                .with_step(MockStep::Progress(ProgressEvent::started(
                    OperationType::Task,
                    format!(":t{}", i),
                )));
        }
        let mut params = TargetBuildParameters::new(BuildRequest::BuildLauncher { tasks: vec![] });
        params.progress_listener_operation_types = BTreeSet::from([OperationType::Task]);

        fixture.execute(&connector, &params);

        let messages = fixture.messages();
        // 20 stdout + 20 stderr + 20 typed + 20 descriptions + terminal
        assert_eq!(messages.len(), 81);
        assert!(messages.last().unwrap().is_terminal());
        assert_eq!(fixture.sink.terminal_messages().len(), 1);
    }
}

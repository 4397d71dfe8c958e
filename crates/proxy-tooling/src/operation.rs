//! Operation configuration and listeners.
//!
//! An [`Operation`] is built up the same way for every operation variant:
//! tasks, arguments, JVM arguments, environment, output sinks, and progress
//! listeners. The connection method it is passed to decides what runs.

use proxy_protocol::OperationType;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use crate::progress::{ProgressEvent, ProgressListener};
use crate::value::{ToolingValue, ValueHandler};

/// Destination for the build's standard output or standard error.
pub type OutputSink = Box<dyn Write + Send>;

/// Which typed operation was invoked on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Build,
    Test,
    Model { model_type: String },
    Action { action_id: String },
    PhasedAction {
        projects_loaded: Option<String>,
        build_finished: Option<String>,
    },
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Test => write!(f, "test"),
            Self::Model { model_type } => write!(f, "model({})", model_type),
            Self::Action { action_id } => write!(f, "action({})", action_id),
            Self::PhasedAction { .. } => write!(f, "phased action"),
        }
    }
}

/// Plain configuration of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationConfig {
    pub tasks: Vec<String>,
    pub arguments: Vec<String>,
    pub jvm_arguments: Vec<String>,
    /// `None` leaves the build tool's default environment alone.
    pub environment_variables: Option<BTreeMap<String, String>>,
}

/// A progress listener and the operation types it is restricted to.
#[derive(Clone)]
pub struct ProgressSubscription {
    listener: ProgressListener,
    /// `None` receives every event.
    operation_types: Option<BTreeSet<OperationType>>,
}

impl ProgressSubscription {
    pub fn accepts(&self, event: &ProgressEvent) -> bool {
        self.operation_types
            .as_ref()
            .map_or(true, |types| types.contains(&event.operation_type))
    }
}

impl fmt::Debug for ProgressSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSubscription")
            .field("operation_types", &self.operation_types)
            .finish_non_exhaustive()
    }
}

/// Fans one progress event out to every subscription that accepts it.
///
/// Cheap to clone; backends hand copies to their reader threads.
#[derive(Debug, Clone, Default)]
pub struct ProgressNotifier {
    subscriptions: Arc<Vec<ProgressSubscription>>,
}

impl ProgressNotifier {
    pub fn new(subscriptions: Vec<ProgressSubscription>) -> Self {
        Self {
            subscriptions: Arc::new(subscriptions),
        }
    }

    pub fn notify(&self, event: &ProgressEvent) {
        for subscription in self.subscriptions.iter() {
            if subscription.accepts(event) {
                (subscription.listener)(event);
            }
        }
    }
}

/// Callbacks attached to an operation.
#[derive(Default)]
pub struct OperationListeners {
    pub standard_output: Option<OutputSink>,
    pub standard_error: Option<OutputSink>,
    pub progress: Vec<ProgressSubscription>,
    pub streamed_value: Option<ValueHandler>,
}

impl OperationListeners {
    /// Take the progress subscriptions as a shareable notifier.
    pub fn take_progress(&mut self) -> ProgressNotifier {
        ProgressNotifier::new(std::mem::take(&mut self.progress))
    }

    /// Forward a streamed value if a handler is registered.
    pub fn stream_value(&self, value: ToolingValue) {
        if let Some(handler) = &self.streamed_value {
            handler(value);
        }
    }
}

impl fmt::Debug for OperationListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationListeners")
            .field("standard_output", &self.standard_output.is_some())
            .field("standard_error", &self.standard_error.is_some())
            .field("progress", &self.progress)
            .field("streamed_value", &self.streamed_value.is_some())
            .finish()
    }
}

/// An operation ready to hand to a [`ProjectConnection`](crate::ProjectConnection).
#[derive(Debug, Default)]
pub struct Operation {
    pub config: OperationConfig,
    pub listeners: OperationListeners,
}

impl Operation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tasks to run. An empty list keeps the tool's default tasks.
    pub fn for_tasks(mut self, tasks: &[String]) -> Self {
        self.config.tasks = tasks.to_vec();
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.config.arguments = arguments;
        self
    }

    pub fn with_jvm_arguments(mut self, jvm_arguments: Vec<String>) -> Self {
        self.config.jvm_arguments = jvm_arguments;
        self
    }

    pub fn with_environment_variables(mut self, environment: BTreeMap<String, String>) -> Self {
        self.config.environment_variables = Some(environment);
        self
    }

    pub fn with_standard_output(mut self, sink: OutputSink) -> Self {
        self.listeners.standard_output = Some(sink);
        self
    }

    pub fn with_standard_error(mut self, sink: OutputSink) -> Self {
        self.listeners.standard_error = Some(sink);
        self
    }

    /// Add a listener restricted to `operation_types`.
    pub fn add_progress_listener_for(
        mut self,
        listener: ProgressListener,
        operation_types: BTreeSet<OperationType>,
    ) -> Self {
        self.listeners.progress.push(ProgressSubscription {
            listener,
            operation_types: Some(operation_types),
        });
        self
    }

    /// Add a listener receiving every event.
    pub fn add_progress_listener(mut self, listener: ProgressListener) -> Self {
        self.listeners.progress.push(ProgressSubscription {
            listener,
            operation_types: None,
        });
        self
    }

    pub fn with_streamed_value_listener(mut self, handler: ValueHandler) -> Self {
        self.listeners.streamed_value = Some(handler);
        self
    }
}

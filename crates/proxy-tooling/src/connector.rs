//! Connector and connection traits.

use proxy_protocol::ActionPayload;
use std::path::PathBuf;

use crate::error::ToolingResult;
use crate::operation::Operation;
use crate::value::{ToolingValue, ValueHandler};

/// Where and with which installation a build runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub project_dir: PathBuf,
    /// Build tool installation to use instead of the project default.
    pub gradle_home: Option<PathBuf>,
    pub gradle_user_home: Option<PathBuf>,
}

impl ConnectionTarget {
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            gradle_home: None,
            gradle_user_home: None,
        }
    }
}

/// Creates connections to a project.
pub trait ToolingConnector: Send + Sync {
    fn connect(&self, target: &ConnectionTarget) -> ToolingResult<Box<dyn ProjectConnection>>;
}

/// An open connection to one project.
///
/// Each method runs one typed operation synchronously and returns once it
/// completes or fails. Listener callbacks may fire from other threads while
/// the call is in progress.
pub trait ProjectConnection: Send {
    /// Run tasks.
    fn run_build(&mut self, operation: Operation) -> ToolingResult<ToolingValue>;

    /// Run tests.
    fn run_tests(&mut self, operation: Operation) -> ToolingResult<ToolingValue>;

    /// Fetch a model of `model_type`.
    fn fetch_model(&mut self, model_type: &str, operation: Operation)
        -> ToolingResult<ToolingValue>;

    /// Run a build action and return its result.
    fn run_action(
        &mut self,
        action: &ActionPayload,
        operation: Operation,
    ) -> ToolingResult<ToolingValue>;

    /// Run a phased build action.
    fn run_phased_action(
        &mut self,
        phased: PhasedAction,
        operation: Operation,
    ) -> ToolingResult<ToolingValue>;
}

/// Actions for the two phases of a phased build action, each with the handler
/// that receives its result.
#[derive(Default)]
pub struct PhasedAction {
    pub projects_loaded: Option<(ActionPayload, ValueHandler)>,
    pub build_finished: Option<(ActionPayload, ValueHandler)>,
}

impl std::fmt::Debug for PhasedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhasedAction")
            .field("projects_loaded", &self.projects_loaded.as_ref().map(|(a, _)| a))
            .field("build_finished", &self.build_finished.as_ref().map(|(a, _)| a))
            .finish()
    }
}

//! Build parameters sent by the peer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Complete description of one build request.
///
/// The `request` tag selects the operation; the remaining fields configure it
/// identically for every variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetBuildParameters {
    /// Build tool installation to use instead of the project default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradle_home: Option<PathBuf>,
    /// Build tool user home (caches, daemons).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradle_user_home: Option<PathBuf>,
    /// Command-line arguments, in order.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// JVM arguments for the build process, in order.
    #[serde(default)]
    pub jvm_arguments: Vec<String>,
    /// Environment for the build. Empty means "inherit the tool's defaults".
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    /// Init scripts keyed by file-name prefix.
    #[serde(default)]
    pub init_scripts: BTreeMap<String, String>,
    /// Operation types the typed progress listener subscribes to.
    #[serde(default)]
    pub progress_listener_operation_types: BTreeSet<OperationType>,
    /// The operation variant.
    pub request: BuildRequest,
}

impl TargetBuildParameters {
    /// Parameters for `request` with every common field empty.
    pub fn new(request: BuildRequest) -> Self {
        Self {
            gradle_home: None,
            gradle_user_home: None,
            arguments: Vec::new(),
            jvm_arguments: Vec::new(),
            environment_variables: BTreeMap::new(),
            init_scripts: BTreeMap::new(),
            progress_listener_operation_types: BTreeSet::new(),
            request,
        }
    }
}

/// The five operation variants. Exactly one per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildRequest {
    /// Run tasks.
    BuildLauncher {
        #[serde(default)]
        tasks: Vec<String>,
    },
    /// Run tests.
    TestLauncher {},
    /// Fetch a model of the given type.
    ModelBuilder {
        model_type: String,
        #[serde(default)]
        tasks: Vec<String>,
    },
    /// Run a single build action inside the build.
    BuildAction {
        action: ActionPayload,
        #[serde(default)]
        tasks: Vec<String>,
    },
    /// Run one action after projects are loaded and another after the build.
    PhasedBuildAction {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        projects_loaded_action: Option<ActionPayload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        build_finished_action: Option<ActionPayload>,
        #[serde(default)]
        tasks: Vec<String>,
    },
}

impl BuildRequest {
    /// Stable variant name used in logs.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::BuildLauncher { .. } => "build_launcher",
            Self::TestLauncher {} => "test_launcher",
            Self::ModelBuilder { .. } => "model_builder",
            Self::BuildAction { .. } => "build_action",
            Self::PhasedBuildAction { .. } => "phased_build_action",
        }
    }

    /// Tasks requested by the variant, or `None` if it doesn't take tasks.
    pub fn tasks(&self) -> Option<&[String]> {
        match self {
            Self::TestLauncher {} => None,
            Self::BuildLauncher { tasks }
            | Self::ModelBuilder { tasks, .. }
            | Self::BuildAction { tasks, .. }
            | Self::PhasedBuildAction { tasks, .. } => Some(tasks),
        }
    }

    /// Whether the variant can surface intermediate values before the end.
    pub fn supports_intermediate_results(&self) -> bool {
        matches!(self, Self::BuildAction { .. } | Self::PhasedBuildAction { .. })
    }
}

/// A build action to run inside the build, identified by the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    /// Identifier the build tool resolves to an action implementation.
    pub action_id: String,
    /// Action-specific arguments.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ActionPayload {
    pub fn new(action_id: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            arguments: serde_json::Value::Null,
        }
    }
}

/// Progress operation types a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Generic,
    Task,
    Test,
    TestOutput,
    WorkItem,
    ProjectConfiguration,
    Transform,
    BuildPhase,
    FileDownload,
    Problems,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generic => "GENERIC",
            Self::Task => "TASK",
            Self::Test => "TEST",
            Self::TestOutput => "TEST_OUTPUT",
            Self::WorkItem => "WORK_ITEM",
            Self::ProjectConfiguration => "PROJECT_CONFIGURATION",
            Self::Transform => "TRANSFORM",
            Self::BuildPhase => "BUILD_PHASE",
            Self::FileDownload => "FILE_DOWNLOAD",
            Self::Problems => "PROBLEMS",
        };
        f.write_str(name)
    }
}

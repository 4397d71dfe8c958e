//! Values produced by build-tool operations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A typed operation result or intermediate value.
#[derive(Debug)]
pub enum ToolingValue {
    /// Operations without a result (plain builds, test runs).
    Unit,
    /// Any model or action result in self-describing form.
    Json(serde_json::Value),
    /// The build tool's own build environment representation.
    BuildEnvironment(Box<dyn BuildEnvironment>),
}

impl From<serde_json::Value> for ToolingValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Callback receiving intermediate values, possibly from a build-tool thread.
pub type ValueHandler = Arc<dyn Fn(ToolingValue) + Send + Sync>;

/// The build environment model as a backend exposes it.
///
/// Backends hold whatever internal state they like; only these accessors are
/// used to build the public form sent to the peer.
pub trait BuildEnvironment: fmt::Debug + Send + Sync {
    fn root_dir(&self) -> &Path;
    fn gradle_version(&self) -> &str;
    fn gradle_user_home(&self) -> Option<&Path>;
    fn java_home(&self) -> Option<&Path>;
    fn jvm_arguments(&self) -> &[String];
}

/// Plain-data [`BuildEnvironment`], used by the bundled backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvironmentModel {
    pub root_dir: PathBuf,
    pub gradle_version: String,
    pub gradle_user_home: Option<PathBuf>,
    pub java_home: Option<PathBuf>,
    pub jvm_arguments: Vec<String>,
}

impl BuildEnvironment for BuildEnvironmentModel {
    fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn gradle_version(&self) -> &str {
        &self.gradle_version
    }

    fn gradle_user_home(&self) -> Option<&Path> {
        self.gradle_user_home.as_deref()
    }

    fn java_home(&self) -> Option<&Path> {
        self.java_home.as_deref()
    }

    fn jvm_arguments(&self) -> &[String] {
        &self.jvm_arguments
    }
}

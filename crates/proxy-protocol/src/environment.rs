//! Public-safe form of the build environment model.
//!
//! The build tool hands back its own build environment representation; before
//! it crosses the wire it is flattened into these plain structs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnvironmentInfo {
    pub build_identifier: BuildIdentifierInfo,
    pub gradle: GradleInfo,
    pub java: JavaInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildIdentifierInfo {
    pub root_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradleInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradle_user_home: Option<PathBuf>,
    pub gradle_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JavaInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_home: Option<PathBuf>,
    #[serde(default)]
    pub jvm_arguments: Vec<String>,
}

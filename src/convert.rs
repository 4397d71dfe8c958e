//! Result conversion and serialization.
//!
//! Operation results and intermediate values are turned into their public
//! JSON form before they are sent. The build tool's internal build
//! environment model is replaced by [`BuildEnvironmentInfo`]; everything
//! else already is public data.

use proxy_protocol::{
    BuildEnvironmentInfo, BuildIdentifierInfo, GradleInfo, JavaInfo, SerializedProgressEvent,
    MAX_FRAME_BYTES,
};
use proxy_tooling::{BuildEnvironment, ProgressEvent, ToolingValue};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to serialize result: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialized result of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
}

/// Replace internal representations with their public form.
pub fn convert(value: ToolingValue) -> Result<Value, ConvertError> {
    match value {
        ToolingValue::Unit => Ok(Value::Null),
        ToolingValue::Json(value) => Ok(value),
        ToolingValue::BuildEnvironment(environment) => {
            Ok(serde_json::to_value(build_environment_info(environment.as_ref()))?)
        }
    }
}

pub fn build_environment_info(environment: &dyn BuildEnvironment) -> BuildEnvironmentInfo {
    BuildEnvironmentInfo {
        build_identifier: BuildIdentifierInfo {
            root_dir: environment.root_dir().to_path_buf(),
        },
        gradle: GradleInfo {
            gradle_user_home: environment.gradle_user_home().map(|p| p.to_path_buf()),
            gradle_version: environment.gradle_version().to_string(),
        },
        java: JavaInfo {
            java_home: environment.java_home().map(|p| p.to_path_buf()),
            jvm_arguments: environment.jvm_arguments().to_vec(),
        },
    }
}

/// Encode a converted value as a payload.
pub fn serialize(value: &Value) -> Result<Vec<u8>, ConvertError> {
    let bytes = serde_json::to_vec(value)?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(ConvertError::TooLarge {
            size: bytes.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(bytes)
}

pub fn convert_and_serialize(value: ToolingValue) -> Result<Vec<u8>, ConvertError> {
    serialize(&convert(value)?)
}

/// Wire form of a progress event.
pub fn progress_event(event: &ProgressEvent) -> SerializedProgressEvent {
    SerializedProgressEvent {
        kind: event.kind,
        operation_type: Some(event.operation_type),
        display_name: event.display_name.clone(),
        description: event.description.clone(),
        event_time: event.event_time,
        outcome: event.outcome.clone(),
    }
}

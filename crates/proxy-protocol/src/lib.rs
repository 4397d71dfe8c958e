//! Build Proxy Protocol Types
//!
//! Defines the messages exchanged between the build proxy and the peer that
//! launched it, and the frame codec that carries them over the connection.
//!
//! Direction of travel:
//! - peer → proxy: one [`IncomingMessage::BuildParameters`], later one
//!   [`IncomingMessage::ResultAck`]
//! - proxy → peer: any number of streaming [`ProtocolMessage`]s followed by
//!   exactly one terminal message (`Success` or `Failure`)

pub mod bytes;
pub mod environment;
pub mod failure;
pub mod frame;
pub mod message;
pub mod params;

pub use environment::{BuildEnvironmentInfo, BuildIdentifierInfo, GradleInfo, JavaInfo};
pub use failure::{FailureDescription, FaultKind};
pub use frame::{decode_frame, encode_frame, read_frame, write_frame, FrameError, MAX_FRAME_BYTES};
pub use message::{
    BuildEventPayload, IncomingMessage, IntermediateResultType, ProgressEventKind, ProtocolMessage,
    SerializedProgressEvent,
};
pub use params::{ActionPayload, BuildRequest, OperationType, TargetBuildParameters};

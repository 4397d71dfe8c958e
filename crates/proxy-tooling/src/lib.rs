//! Build-tool client boundary.
//!
//! The proxy drives builds through the [`ToolingConnector`] /
//! [`ProjectConnection`] traits. Two backends live here:
//! - [`cli::CommandLineConnector`]: runs the `gradle` executable as a child process
//! - `mock::MockConnector` (feature `mock`): scripted backend for tests

pub mod cli;
pub mod connector;
pub mod error;
pub mod operation;
pub mod progress;
pub mod value;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use connector::{ConnectionTarget, PhasedAction, ProjectConnection, ToolingConnector};
pub use error::{ToolingError, ToolingResult};
pub use operation::{
    Operation, OperationConfig, OperationKind, OperationListeners, OutputSink, ProgressNotifier,
    ProgressSubscription,
};
pub use progress::{ProgressEvent, ProgressListener};
pub use value::{BuildEnvironment, BuildEnvironmentModel, ToolingValue, ValueHandler};

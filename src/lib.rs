//! Build Proxy - single-connection build proxy server
//!
//! A short-lived server that accepts exactly one peer connection, receives a
//! description of a build to run, drives the build tool through
//! [`proxy_tooling`], and streams output, progress events, intermediate
//! results, and one terminal result back to the peer.

pub mod channel;
pub mod config;
pub mod convert;
pub mod dispatcher;
pub mod error;
pub mod init_scripts;
pub mod logging;
pub mod server;
pub mod session;

pub use channel::{ChannelError, MessageChannel, MessageSink, RecordingSink};
pub use config::{ConfigError, ServerConfig};
pub use convert::ConvertError;
pub use dispatcher::{BuildDispatcher, SessionOutcome};
pub use error::ProxyError;
pub use server::TargetServer;
pub use session::run_session;

//! One proxy session, from bind to shutdown.

use std::io::Write;
use std::sync::Arc;

use proxy_tooling::ToolingConnector;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::channel::{MessageChannel, MessageSink};
use crate::config::ServerConfig;
use crate::dispatcher::{BuildDispatcher, SessionOutcome};
use crate::error::ProxyError;
use crate::server::{announcement, TargetServer};

/// Run a complete session.
///
/// The startup line is written to `announce` as soon as the socket is bound.
/// A build that fails is still `Ok`: the failure has been reported to the
/// peer. `Err` means the session itself could not complete.
pub fn run_session<W: Write>(
    config: &ServerConfig,
    connector: Arc<dyn ToolingConnector>,
    announce: &mut W,
) -> Result<SessionOutcome, ProxyError> {
    let session_id = Uuid::new_v4();
    let span = info_span!("session", id = %session_id);
    let _entered = span.enter();

    let project_dir = config.resolve_project_dir()?;
    debug!(project_dir = %project_dir.display(), "working directory");

    let mut server = TargetServer::start(config.bind_address, config.port)?;
    writeln!(announce, "{}", announcement(server.address()))?;
    announce.flush()?;

    let peer = server.await_connection(config.connect_timeout)?;
    info!(%peer, "peer connected");

    let params = server.await_build_parameters(config.parameters_timeout)?;
    debug!(?params, "received build parameters");

    let channel = Arc::new(MessageChannel::new(server.writer()?));
    let sink: Arc<dyn MessageSink> = channel.clone();
    let dispatcher = BuildDispatcher::new(connector, sink, project_dir);
    let outcome = dispatcher.execute(&params);
    debug!(messages = channel.messages_sent(), ?outcome, "build dispatched");

    server.await_result_ack(config.ack_timeout)?;
    server.stop();
    info!(?outcome, "session complete");
    Ok(outcome)
}

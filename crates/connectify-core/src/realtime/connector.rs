use anyhow::Result;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ClientFrame, ServerFrame};

/// Both directions of an open channel connection, as frame queues.
pub struct ChannelLink {
    pub outbound: mpsc::Sender<ClientFrame>,
    pub inbound: mpsc::Receiver<ServerFrame>,
    /// Transport tasks to abort when the connection is torn down
    pub tasks: Vec<JoinHandle<()>>,
}

impl ChannelLink {
    /// Tear down a link that was never handed to a channel
    pub fn abort(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens channel connections.
///
/// The session controller owns a connector and opens one link per
/// authenticated session.
pub trait ChannelConnector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<ChannelLink>>;
}

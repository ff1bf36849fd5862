//! Background reader for the adbd control socket.
//!
//! One task owns the link. It forwards decoded reports as events, writes
//! queued [`TransportCommand`]s, and reconnects after a fixed backoff when
//! the link drops. Framing lives behind [`TransportLink`].

use crate::collaborators::{TransportCommand, TransportSink};
use crate::event::{Event, EventSender, TransportEvent};
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// A connection to adbd's authorization socket.
#[async_trait]
pub trait TransportLink: Send {
    async fn connect(&mut self) -> io::Result<()>;

    /// Next decoded report. `Ok(None)` once adbd closes the socket.
    ///
    /// Must be cancel safe: the reader drops this future whenever a command
    /// is ready to write.
    async fn next_event(&mut self) -> io::Result<Option<TransportEvent>>;

    async fn send(&mut self, command: &TransportCommand) -> io::Result<()>;

    async fn close(&mut self) {}
}

/// [`TransportSink`] that queues commands for the reader task.
#[derive(Debug, Clone)]
pub struct ChannelTransportSink {
    tx: mpsc::UnboundedSender<TransportCommand>,
}

impl ChannelTransportSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TransportSink for ChannelTransportSink {
    fn send(&self, command: TransportCommand) {
        if self.tx.send(command).is_err() {
            warn!("Transport reader gone, dropping command");
        }
    }
}

pub struct TransportReaderHandle {
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl TransportReaderHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

pub fn spawn_transport_reader<L>(
    runtime: &Handle,
    link: L,
    events: EventSender,
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    backoff: Duration,
) -> TransportReaderHandle
where
    L: TransportLink + 'static,
{
    let connected = Arc::new(AtomicBool::new(false));
    let task = runtime.spawn(run_reader(
        link,
        events,
        commands,
        backoff,
        connected.clone(),
    ));
    TransportReaderHandle { connected, task }
}

async fn run_reader<L: TransportLink>(
    mut link: L,
    events: EventSender,
    mut commands: mpsc::UnboundedReceiver<TransportCommand>,
    backoff: Duration,
    connected: Arc<AtomicBool>,
) {
    loop {
        if events.is_closed() {
            debug!("Event queue closed, transport reader exiting");
            return;
        }

        if let Err(e) = link.connect().await {
            debug!(error = %e, "Unable to connect to adbd");
            tokio::time::sleep(backoff).await;
            drop_stale_commands(&mut commands);
            continue;
        }

        connected.store(true, Ordering::SeqCst);
        info!("Connected to adbd");
        if events.send(Event::TransportLinkUp).is_err() {
            return;
        }

        loop {
            tokio::select! {
                incoming = link.next_event() => match incoming {
                    Ok(Some(event)) => {
                        if events.send(event.into()).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        info!("adbd closed the control socket");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Error reading from adbd");
                        break;
                    }
                },
                Some(command) = commands.recv() => {
                    if let Err(e) = link.send(&command).await {
                        warn!(error = %e, "Error writing to adbd");
                        break;
                    }
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        link.close().await;
        if events.send(Event::TransportLinkDown).is_err() {
            return;
        }
        tokio::time::sleep(backoff).await;
        drop_stale_commands(&mut commands);
    }
}

/// Replies queued while adbd was unreachable refer to requests it has
/// already forgotten.
fn drop_stale_commands(commands: &mut mpsc::UnboundedReceiver<TransportCommand>) {
    while let Ok(command) = commands.try_recv() {
        warn!(command = %command.wire_label(), "adbd not connected, dropping command");
    }
}

impl TransportCommand {
    /// Short form for logs; never includes key material.
    fn wire_label(&self) -> &'static str {
        match self {
            TransportCommand::Allow => "OK",
            TransportCommand::Deny => "NO",
            TransportCommand::DisconnectDevice(_) => "DD",
            TransportCommand::StartWifi => "W1",
            TransportCommand::StopWifi => "W0",
        }
    }
}

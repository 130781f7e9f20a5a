use std::time::Duration;

use stage_core::CoreEvent;
use stage_proto::protocol::{encode_frame, ClientCommand, FrameBuffer, ProtocolError, ServerEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Doubling reconnect delay between `min` and `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Why a live link ended.
#[derive(Debug)]
enum LinkEnd {
    Closed(String),
    /// The core dropped its side of a channel; nothing left to serve.
    CoreGone,
}

/// Keep a session-server link alive: connect, pump frames both ways, and
/// report `Connected`/`Disconnected` to the core.
pub fn start_connection(
    address: String,
    mut backoff: Backoff,
    event_tx: mpsc::Sender<CoreEvent>,
    mut command_rx: mpsc::Receiver<ClientCommand>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match TcpStream::connect(&address).await {
                Ok(stream) => {
                    info!("Connected to session server at {}", address);
                    backoff.reset();

                    // Anything queued before the link dropped belongs to the
                    // previous connection.
                    let mut stale = 0usize;
                    while command_rx.try_recv().is_ok() {
                        stale += 1;
                    }
                    if stale > 0 {
                        debug!("discarded {} stale command(s)", stale);
                    }

                    if event_tx.send(CoreEvent::Connected).await.is_err() {
                        return;
                    }
                    match run_connection(stream, &event_tx, &mut command_rx).await {
                        LinkEnd::CoreGone => {
                            info!("Core gone; closing session server link");
                            return;
                        }
                        LinkEnd::Closed(reason) => {
                            warn!("Session server link closed: {}", reason);
                        }
                    }
                    if event_tx.send(CoreEvent::Disconnected).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", address, e);
                }
            }

            let delay = backoff.next_delay();
            debug!("reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
            if event_tx.is_closed() {
                return;
            }
        }
    })
}

async fn run_connection(
    stream: TcpStream,
    event_tx: &mpsc::Sender<CoreEvent>,
    command_rx: &mut mpsc::Receiver<ClientCommand>,
) -> LinkEnd {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut frames = FrameBuffer::new();

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => return LinkEnd::Closed("server closed the connection".into()),
                    Ok(n) => {
                        frames.extend(&tmp[..n]);
                        loop {
                            match frames.next_frame::<ServerEvent>() {
                                None => break,
                                Some(Ok(event)) => {
                                    debug!("server event: {:?}", event);
                                    if event_tx.send(CoreEvent::Server(event)).await.is_err() {
                                        return LinkEnd::CoreGone;
                                    }
                                }
                                Some(Err(ProtocolError::FrameTooLarge(len))) => {
                                    error!("Frame header claims {} bytes; stream out of sync", len);
                                    return LinkEnd::Closed("oversized frame".into());
                                }
                                Some(Err(e)) => {
                                    warn!("Skipping undecodable frame: {}", e);
                                }
                            }
                        }
                    }
                    Err(e) => return LinkEnd::Closed(format!("read error: {}", e)),
                }
            }

            cmd = command_rx.recv() => {
                let Some(cmd) = cmd else {
                    return LinkEnd::CoreGone;
                };
                let encoded = match encode_frame(&cmd) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("Failed to encode {:?}: {}", cmd, e);
                        continue;
                    }
                };
                if let Err(e) = write_half.write_all(&encoded).await {
                    return LinkEnd::Closed(format!("write error: {}", e));
                }
                debug!("sent {:?}", cmd);
            }
        }
    }
}

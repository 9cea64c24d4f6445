//! The message bus boundary.
//!
//! Messages travel as newline-delimited JSON over TCP: a connector process
//! publishes raw messages, this server subscribes, and mapped deltas fan out
//! the same way to any number of downstream consumers. Delivery is
//! at-least-once and unordered across sources; within one connection, order
//! is preserved.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tiller_core::{Mapped, RawMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

const CHANNEL_CAPACITY: usize = 1024;

/// Connects to a raw-message publisher and yields its messages. Lines that
/// do not parse are logged and skipped; the channel closes when the peer
/// disconnects.
pub async fn subscribe(address: &str) -> Result<mpsc::Receiver<RawMessage>> {
    let stream = TcpStream::connect(address)
        .await
        .with_context(|| format!("could not connect to raw publisher at {}", address))?;
    log::info!("subscribed to raw messages at {}", address);

    let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let raw: RawMessage = match serde_json::from_str(&line) {
                        Ok(raw) => raw,
                        Err(e) => {
                            log::warn!("skipping unparseable raw message: {}", e);
                            continue;
                        }
                    };
                    if sender.send(raw).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    log::info!("raw publisher closed the connection");
                    return;
                }
                Err(e) => {
                    log::error!("raw subscription failed: {}", e);
                    return;
                }
            }
        }
    });
    Ok(receiver)
}

/// Fans mapped deltas out to every connected consumer.
pub struct Publisher {
    sender: broadcast::Sender<String>,
    address: SocketAddr,
}

impl Publisher {
    /// Binds the delta port and starts accepting consumers.
    pub async fn bind(address: &str) -> Result<Publisher> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("could not bind delta publisher to {}", address))?;
        let address = listener.local_addr()?;
        log::info!("publishing deltas on {}", address);

        let (sender, _) = broadcast::channel::<String>(CHANNEL_CAPACITY);
        let accept_sender = sender.clone();
        tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::error!("could not accept delta consumer: {}", e);
                        continue;
                    }
                };
                log::info!("delta consumer connected from {}", peer);
                let mut receiver = accept_sender.subscribe();
                tokio::spawn(async move {
                    let mut stream = stream;
                    loop {
                        match receiver.recv().await {
                            Ok(line) => {
                                if stream.write_all(line.as_bytes()).await.is_err() {
                                    log::info!("delta consumer {} disconnected", peer);
                                    return;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                log::warn!(
                                    "delta consumer {} lagged, dropped {} messages",
                                    peer,
                                    missed
                                );
                            }
                            Err(broadcast::error::RecvError::Closed) => return,
                        }
                    }
                });
            }
        });

        Ok(Publisher { sender, address })
    }

    /// The bound address, useful when binding to port 0.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Publishes one delta. A send with no connected consumers is not an
    /// error.
    pub fn publish(&self, mapped: &Mapped) -> Result<()> {
        let mut line = serde_json::to_string(mapped).context("could not encode delta")?;
        line.push('\n');
        let _ = self.sender.send(line);
        Ok(())
    }
}

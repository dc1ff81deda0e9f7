//! Stream ingestion client for the MQTT telemetry feed.
//!
//! Owns the subscription lifecycle for the single configured topic: connect,
//! subscribe, decode payloads into [`Packet`] values, and push them into the
//! bounded buffer. Connectivity is surfaced as a plain boolean that only
//! turns true once the broker has acknowledged the subscription, not merely
//! on the transport handshake.
//!
//! Reconnection is delegated to the rumqttc event loop: after a connection
//! error we wait a fixed delay and poll again, which re-runs the handshake.
//! The first message after a reconnect is handled like any other message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS, Transport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::buffer::PacketBuffer;
use crate::config::Config;
use crate::models::Packet;

// ---

/// Fixed delay before re-polling the event loop after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_millis(1000);

const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Client handle owning the packet buffer and the background poll task.
///
/// The poll task is the buffer's only writer (`clear` goes through this
/// handle as well, so mutation stays behind one owner); everyone else reads
/// snapshots. Dropping or closing the client aborts the task, so no delivery
/// callback can mutate state afterwards.
pub struct IngestClient {
    // ---
    buffer: Arc<RwLock<PacketBuffer>>,
    connected: Arc<AtomicBool>,
    seq_rx: watch::Receiver<u64>,
    client: AsyncClient,
    task: JoinHandle<()>,
    closed: AtomicBool,
}

impl IngestClient {
    /// Connect to the configured broker and start ingesting.
    ///
    /// The buffer capacity is fixed at construction; resizing requires
    /// recreating the client.
    pub fn connect(cfg: &Config) -> IngestClient {
        // ---
        // Random client id suffix so parallel instances never collide
        let client_id = format!("thermoflow-{}", Uuid::new_v4().simple());

        let mut options = MqttOptions::new(client_id, cfg.mqtt_host.clone(), cfg.mqtt_port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if cfg.mqtt_tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        if !cfg.mqtt_username.is_empty() {
            options.set_credentials(cfg.mqtt_username.clone(), cfg.mqtt_password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 16);

        let buffer = Arc::new(RwLock::new(PacketBuffer::new(cfg.stream_buffer_limit)));
        let connected = Arc::new(AtomicBool::new(false));
        let (seq_tx, seq_rx) = watch::channel(0u64);

        let task = tokio::spawn(poll_loop(
            eventloop,
            client.clone(),
            cfg.mqtt_topic.clone(),
            Arc::clone(&buffer),
            Arc::clone(&connected),
            seq_tx,
        ));

        IngestClient {
            buffer,
            connected,
            seq_rx,
            client,
            task,
            closed: AtomicBool::new(false),
        }
    }

    /// Whether the topic subscription is currently acknowledged.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Read-only snapshot of the buffer, newest first.
    pub fn snapshot(&self) -> Vec<Packet> {
        self.buffer.read().snapshot()
    }

    /// `msg_id` of the most recently arrived packet, if any.
    pub fn head_msg_id(&self) -> Option<u64> {
        self.buffer.read().head().map(|p| p.msg_id)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.read().len()
    }

    /// Drop all buffered packets (evaluation reset).
    pub fn clear(&self) {
        self.buffer.write().clear();
    }

    /// A receiver that is notified after every buffer mutation.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.seq_rx.clone()
    }

    /// Stop ingesting and release the connection.
    ///
    /// Safe to call any number of times, including after the connection is
    /// already gone. Aborting the poll task guarantees no further packet is
    /// pushed once this returns.
    pub fn close(&self) {
        // ---
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.client.try_disconnect();
        self.task.abort();
        self.connected.store(false, Ordering::SeqCst);
        info!("Ingestion client closed");
    }
}

impl Drop for IngestClient {
    fn drop(&mut self) {
        self.close();
    }
}

// ---

/// Drive the MQTT event loop until the owning client aborts the task.
async fn poll_loop(
    mut eventloop: rumqttc::EventLoop,
    client: AsyncClient,
    topic: String,
    buffer: Arc<RwLock<PacketBuffer>>,
    connected: Arc<AtomicBool>,
    seq_tx: watch::Sender<u64>,
) {
    // ---
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                // Handshake done; (re-)subscribe. Connectivity is only
                // reported once the broker acknowledges the subscription.
                debug!("Broker handshake complete, subscribing to {}", topic);
                if let Err(e) = client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                    warn!("Subscribe request failed: {}", e);
                }
            }
            Ok(Event::Incoming(Incoming::SubAck(_))) => {
                info!("Subscribed to {}", topic);
                connected.store(true, Ordering::SeqCst);
            }
            Ok(Event::Incoming(Incoming::Publish(msg))) => {
                handle_payload(&msg.payload, &buffer, &seq_tx);
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                warn!("Broker sent disconnect");
                connected.store(false, Ordering::SeqCst);
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                warn!(
                    "MQTT connection error: {} - retrying in {:?}",
                    e, RECONNECT_DELAY
                );
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Decode one raw payload and push it into the buffer.
///
/// Malformed payloads are logged and dropped; they never reach the buffer
/// and never tear down the stream. A payload repeating the current head's
/// `msg_id` (duplicate or retained delivery) is dropped as well.
fn handle_payload(
    payload: &[u8],
    buffer: &Arc<RwLock<PacketBuffer>>,
    seq_tx: &watch::Sender<u64>,
) {
    // ---
    let packet: Packet = match serde_json::from_slice(payload) {
        Ok(p) => p,
        Err(e) => {
            warn!("Dropping malformed payload: {}", e);
            return;
        }
    };

    let mut guard = buffer.write();
    if guard.head().map(|p| p.msg_id) == Some(packet.msg_id) {
        debug!("Dropping duplicate msg_id {}", packet.msg_id);
        return;
    }
    debug!(
        "Packet msg_id={} temp={} ts={}",
        packet.msg_id, packet.temperature, packet.timestamp
    );
    guard.push(packet);
    drop(guard);

    seq_tx.send_modify(|s| *s = s.wrapping_add(1));
}

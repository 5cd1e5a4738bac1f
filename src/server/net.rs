//! Message bus listener: the TCP endpoint agent processes connect to.
//!
//! One task per connection reads JSON lines into the per-agent action
//! queue; a paired writer task drains the lifecycle queue back down the
//! socket. The first line must be a `Register` handshake.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::bus::{BusError, MessageBus, Registration};
use crate::protocol::{decode_line, encode_line, ActionMessage, LifecycleMessage};

/// Outbound lifecycle queue depth per connection. TickSignals are tiny;
/// a queue this deep only fills when the peer stopped reading.
const LIFECYCLE_DEPTH: usize = 8;

/// Accept agent connections until the listener socket dies
pub async fn run_bus_listener(bind: &str, bus: Arc<MessageBus>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    log::info!("message bus listening on {}", bind);

    loop {
        let (stream, peer) = listener.accept().await?;
        log::debug!("agent connection from {}", peer);
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            handle_agent_connection(stream, bus).await;
        });
    }
}

async fn handle_agent_connection(stream: TcpStream, bus: Arc<MessageBus>) {
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Registration handshake first; anything else is a protocol breach.
    let first = match lines.next_line().await {
        Ok(Some(line)) => line,
        _ => return,
    };
    let (agent_id, pid, protocol) = match decode_line::<ActionMessage>(&first) {
        Ok(ActionMessage::Register {
            agent_id,
            pid,
            protocol,
        }) => (agent_id, pid, protocol),
        Ok(other) => {
            log::warn!(
                "agent connection sent {:?} before registering; dropping",
                other
            );
            return;
        }
        Err(e) => {
            log::warn!("undecodable registration line: {}", e);
            return;
        }
    };

    let (lifecycle_tx, mut lifecycle_rx) = tokio::sync::mpsc::channel(LIFECYCLE_DEPTH);
    let registration = Registration {
        agent_id,
        pid,
        protocol,
    };
    if !bus.register(registration, lifecycle_tx) {
        log::warn!("agent {} registered twice; dropping connection", agent_id);
        return;
    }

    // Writer: lifecycle queue -> socket. Ends after Terminate or on a dead
    // peer; either way the agent is done hearing from us.
    let writer_task = tokio::spawn(async move {
        let mut writer = write_half;
        while let Some(message) = lifecycle_rx.recv().await {
            let line = match encode_line(&message) {
                Ok(line) => line,
                Err(e) => {
                    log::error!("failed to encode lifecycle message: {}", e);
                    continue;
                }
            };
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if matches!(message, LifecycleMessage::Terminate) {
                break;
            }
        }
    });

    // Reader: socket -> action queue. Backpressure drops the event; the
    // sender's own retry/coalescing handles the rest.
    while let Ok(Some(line)) = lines.next_line().await {
        let message = match decode_line::<ActionMessage>(&line) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("agent {}: undecodable action line: {}", agent_id, e);
                continue;
            }
        };
        if message.agent_id() != agent_id {
            log::warn!(
                "agent {} sent an event for agent {}; dropping",
                agent_id,
                message.agent_id()
            );
            continue;
        }
        let Some(event) = message.into_event() else {
            log::debug!("agent {} re-sent its registration", agent_id);
            continue;
        };
        match bus.send(event) {
            Ok(()) => {}
            Err(BusError::Backpressure { .. }) => {
                log::debug!("agent {}: queue full, event dropped", agent_id);
            }
            Err(BusError::Unregistered { .. }) => {
                // Reaped by the coordinator; the connection is over.
                break;
            }
        }
    }

    bus.deregister(agent_id);
    writer_task.abort();
    log::debug!("agent {} disconnected", agent_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ActionEvent, AgentAction, PROTOCOL_VERSION};
    use tokio::io::AsyncReadExt;

    async fn start_listener(bus: Arc<MessageBus>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                let bus = Arc::clone(&bus);
                tokio::spawn(async move {
                    handle_agent_connection(stream, bus).await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_register_then_send_event() {
        let bus = Arc::new(MessageBus::new(8));
        let addr = start_listener(Arc::clone(&bus)).await;

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        let register = encode_line(&ActionMessage::Register {
            agent_id: 11,
            pid: 1,
            protocol: PROTOCOL_VERSION,
        })
        .unwrap();
        stream.write_all(register.as_bytes()).await.unwrap();

        let eat = encode_line(&ActionMessage::Eat {
            agent_id: 11,
            seq: 1,
        })
        .unwrap();
        stream.write_all(eat.as_bytes()).await.unwrap();

        // Wait for the connection task to process both lines.
        for _ in 0..100 {
            if !bus.drain_registrations().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let mut events = Vec::new();
        for _ in 0..100 {
            events = bus.receive_all(11);
            if !events.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(
            events,
            vec![ActionEvent {
                agent_id: 11,
                seq: 1,
                action: AgentAction::Eat,
            }]
        );
    }

    #[tokio::test]
    async fn test_lifecycle_reaches_the_socket() {
        let bus = Arc::new(MessageBus::new(8));
        let addr = start_listener(Arc::clone(&bus)).await;

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        let register = encode_line(&ActionMessage::Register {
            agent_id: 5,
            pid: 2,
            protocol: PROTOCOL_VERSION,
        })
        .unwrap();
        stream.write_all(register.as_bytes()).await.unwrap();

        for _ in 0..100 {
            if bus.is_registered(5) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(bus.signal(5, LifecycleMessage::TickSignal { tick: 9 }));

        let mut buffer = vec![0u8; 256];
        let n = stream.read(&mut buffer).await.unwrap();
        let line = String::from_utf8_lossy(&buffer[..n]).to_string();
        let message: LifecycleMessage = decode_line(&line).unwrap();
        assert_eq!(message, LifecycleMessage::TickSignal { tick: 9 });
    }

    #[tokio::test]
    async fn test_unregistered_first_message_drops_connection() {
        let bus = Arc::new(MessageBus::new(8));
        let addr = start_listener(Arc::clone(&bus)).await;

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        let eat = encode_line(&ActionMessage::Eat { agent_id: 3, seq: 1 }).unwrap();
        stream.write_all(eat.as_bytes()).await.unwrap();

        // The server closes without registering anything.
        let mut buffer = Vec::new();
        let _ = stream.read_to_end(&mut buffer).await;
        assert!(!bus.is_registered(3));
    }
}

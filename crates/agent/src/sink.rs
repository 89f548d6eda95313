use tokio::sync::mpsc;

use agent_protocol::Outbound;

/// Capacity of the outbound queue drained by the connection write pump.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("send buffer full")]
    BufferFull,
    #[error("connection manager stopped")]
    Closed,
}

/// Handle every producer uses to emit frames. Enqueue never blocks; a full
/// queue is reported to the caller, which decides whether to drop or retry.
#[derive(Clone)]
pub struct OutboundSink {
    tx: mpsc::Sender<Outbound>,
}

impl OutboundSink {
    pub fn send(&self, frame: Outbound) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SendError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

pub fn outbound_channel(capacity: usize) -> (OutboundSink, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(capacity);
    (OutboundSink { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_protocol::{HeartbeatFrame, Outbound};

    fn heartbeat() -> Outbound {
        Outbound::Heartbeat(HeartbeatFrame {
            timestamp: "2026-01-13T17:52:46Z".to_string(),
        })
    }

    #[tokio::test]
    async fn reports_buffer_full_without_blocking() {
        let (sink, mut rx) = outbound_channel(2);
        sink.send(heartbeat()).expect("first");
        sink.send(heartbeat()).expect("second");
        assert!(matches!(sink.send(heartbeat()), Err(SendError::BufferFull)));

        rx.recv().await.expect("drain one");
        sink.send(heartbeat()).expect("room again");
    }

    #[tokio::test]
    async fn reports_closed_when_receiver_dropped() {
        let (sink, rx) = outbound_channel(1);
        drop(rx);
        assert!(matches!(sink.send(heartbeat()), Err(SendError::Closed)));
    }
}

use chrono::Utc;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec};

use agent_protocol::{Outbound, OutputFrame, StreamKind};

use crate::sink::OutboundSink;

/// Longest line forwarded before the pump gives up on the stream.
pub(super) const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Forwards newline-terminated lines from one subprocess pipe as output
/// frames. Lines within one stream stay FIFO; interleaving with the other
/// stream is unordered.
pub(super) async fn pump_lines<R>(reader: R, id: String, stream: StreamKind, sink: OutboundSink)
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    while let Some(next) = lines.next().await {
        match next {
            Ok(line) => {
                let frame = Outbound::Output(OutputFrame {
                    id: id.clone(),
                    stream,
                    data: format!("{line}\n"),
                    timestamp: Utc::now().to_rfc3339(),
                });
                if let Err(err) = sink.send(frame) {
                    tracing::warn!(id = %id, stream = %stream, error = %err, "dropping output frame");
                }
            }
            Err(err) => {
                tracing::warn!(id = %id, stream = %stream, error = %err, "output stream error");
                break;
            }
        }
    }
}

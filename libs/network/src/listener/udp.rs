//! UDP receive loop

use codec::Reassembler;
use tokio::net::UdpSocket;
use tracing::{debug, error, warn};
use types::epoch_seconds;

use super::pipeline::{FrameSink, PortContext, RawFrame};
use crate::diagnostics::DiagnosticEvent;

/// Largest possible UDP payload
const MAX_DATAGRAM_SIZE: usize = 65536;

pub(super) async fn serve(socket: UdpSocket, sink: FrameSink, ctx: PortContext) {
    let port = ctx.port;
    let mut reassembler = Reassembler::new(ctx.max_frame_size);
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut arrival = 0.0;
    let mut peer = None;

    loop {
        let (n, from) = tokio::select! {
            _ = ctx.stop.wait() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    error!(port, error = %e, "UDP receive failed, closing port");
                    ctx.diagnostics.emit(DiagnosticEvent::PortFailed {
                        port,
                        error: e.to_string(),
                    });
                    break;
                }
            },
        };

        if reassembler.is_expecting_count() {
            arrival = epoch_seconds();
            peer = Some(from);
        }

        match reassembler.push(&buf[..n]) {
            Ok(Some(sealed)) => sink.submit(RawFrame {
                sealed,
                port,
                server_addr: ctx.server_addr,
                peer_addr: peer,
                arrival,
            }),
            Ok(None) => {}
            Err(e) => {
                warn!(port, peer = %from, bytes = n, error = %e, "Discarding UDP datagram");
                ctx.diagnostics.emit(DiagnosticEvent::FragmentError {
                    port,
                    error: e.to_string(),
                });
            }
        }
    }
    debug!(port, "UDP listener stopped");
}

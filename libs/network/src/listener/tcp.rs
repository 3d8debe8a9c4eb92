//! TCP accept loop and frame reader

use std::io;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use codec::{frame_length, ProtocolError, LENGTH_PREFIX_SIZE, READ_CHUNK_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use types::epoch_seconds;

use super::pipeline::{FrameSink, PortContext, RawFrame};
use crate::diagnostics::DiagnosticEvent;
use crate::{Result, TransportError};

/// Read one frame: the length prefix, then the sealed bytes in bounded chunks.
///
/// Returns `Ok(None)` on a clean end of stream before a new prefix, and the
/// sealed bytes with their arrival time (taken when the prefix arrived)
/// otherwise. A stream ending inside the prefix or the body is a truncated
/// frame; a declared length above `max_frame_size` is an error.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<(Bytes, f64)>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        match reader.read(&mut prefix[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(ProtocolError::truncated_frame(LENGTH_PREFIX_SIZE, filled).into()),
            n => filled += n,
        }
    }
    let arrival = epoch_seconds();

    let declared = frame_length(prefix);
    if declared > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: declared,
            max: max_frame_size,
        }
        .into());
    }

    let mut sealed = BytesMut::with_capacity(declared);
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    while sealed.len() < declared {
        let want = (declared - sealed.len()).min(READ_CHUNK_SIZE);
        reader
            .read_exact(&mut chunk[..want])
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    TransportError::from(ProtocolError::truncated_frame(declared, sealed.len()))
                }
                _ => TransportError::from(e),
            })?;
        sealed.extend_from_slice(&chunk[..want]);
    }

    Ok(Some((sealed.freeze(), arrival)))
}

pub(super) async fn serve(listener: TcpListener, sink: FrameSink, ctx: PortContext) {
    let port = ctx.port;
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = ctx.stop.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(port, peer = %peer, "Accepted connection");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(port, error = %e, "Failed to set TCP_NODELAY");
                    }
                    ctx.stats.record_connection();
                    ctx.diagnostics.emit(DiagnosticEvent::ConnectionAccepted { port, peer });
                    connections.spawn(read_connection(stream, peer, sink.clone(), ctx.clone()));
                }
                Err(e) => {
                    error!(port, error = %e, "Accept failed, closing port");
                    ctx.diagnostics.emit(DiagnosticEvent::PortFailed {
                        port,
                        error: e.to_string(),
                    });
                    break;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Connection tasks watch the same stop signal
    if !ctx.stop.is_set() {
        connections.abort_all();
    }
    while connections.join_next().await.is_some() {}
    debug!(port, "TCP listener stopped");
}

async fn read_connection(mut stream: TcpStream, peer: SocketAddr, sink: FrameSink, ctx: PortContext) {
    let port = ctx.port;
    loop {
        let read = tokio::select! {
            _ = ctx.stop.wait() => break,
            read = read_frame(&mut stream, ctx.max_frame_size) => read,
        };
        match read {
            Ok(Some((sealed, arrival))) => sink.submit(RawFrame {
                sealed,
                port,
                server_addr: ctx.server_addr,
                peer_addr: Some(peer),
                arrival,
            }),
            Ok(None) => {
                info!(port, peer = %peer, "Connection closed by peer");
                break;
            }
            Err(e) => {
                warn!(port, peer = %peer, error = %e, "Closing connection");
                break;
            }
        }
    }
    ctx.diagnostics
        .emit(DiagnosticEvent::ConnectionClosed { port, peer });
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{encode_frame, seal, ChecksumMode, DEFAULT_MAX_FRAME_SIZE};

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let mut wire = encode_frame(1, b"first").to_vec();
        wire.extend_from_slice(&encode_frame(2, b"second"));
        let mut reader = &wire[..];

        let (first, _) = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, seal(&[&[0u8, 1][..], &b"first"[..]].concat(), ChecksumMode::Valid));
        let (second, _) = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&second[..2], &[0, 2]);
        assert!(read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_large_frame_read_in_chunks() {
        let body = vec![7u8; READ_CHUNK_SIZE * 3 + 11];
        let frame = encode_frame(4, &body);
        let mock = tokio_test::io::Builder::new()
            .read(&frame[..LENGTH_PREFIX_SIZE])
            .read(&frame[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + 100])
            .read(&frame[LENGTH_PREFIX_SIZE + 100..])
            .build();
        let mut reader = mock;

        let (sealed, _) = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sealed.len(), frame.len() - LENGTH_PREFIX_SIZE);
    }

    #[tokio::test]
    async fn test_oversized_declared_length_rejected() {
        let prefix = 1000u32.to_be_bytes();
        let mut reader = &prefix[..];
        let err = read_frame(&mut reader, 999).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol {
                source: Some(ProtocolError::FrameTooLarge { size: 1000, max: 999 }),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_truncation() {
        let frame = encode_frame(1, b"cut short");
        let mut reader = &frame[..frame.len() - 3];
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol {
                source: Some(ProtocolError::TruncatedFrame { .. }),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_prefix_is_truncation() {
        let mut reader: &[u8] = &[0, 0];
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol {
                source: Some(ProtocolError::TruncatedFrame {
                    declared: LENGTH_PREFIX_SIZE,
                    available: 2,
                    ..
                }),
                ..
            }
        ));

        let mut empty: &[u8] = &[];
        assert!(read_frame(&mut empty, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap()
            .is_none());
    }
}

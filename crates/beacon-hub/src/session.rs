//! Reader and writer tasks for one attached connection.
//!
//! The reader turns inbound data frames into queued messages and marks the
//! handle alive on any traffic. The writer drains the outbound channel and
//! transmits probes on request. Either task closing the handle stops the
//! other.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{DeathReason, Message, TransportError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::controller::Ingress;
use crate::transport::{Frame, FrameReader, FrameWriter};

pub(crate) async fn run_reader(
    handle: Arc<ConnectionHandle>,
    mut reader: Box<dyn FrameReader>,
    ingress: Arc<Ingress>,
) {
    let reason = loop {
        let frame = tokio::select! {
            biased;
            () = handle.closed() => return,
            frame = reader.read_frame() => frame,
        };
        match frame {
            Ok(Some(Frame::Data(payload))) => {
                handle.mark_alive();
                let priority = ingress.classify(handle.id(), &payload);
                let _ = ingress.submit(Message::from_peer(handle.id().clone(), payload, priority));
            }
            Ok(Some(Frame::Probe | Frame::ProbeReply)) => handle.mark_alive(),
            Ok(None) => break DeathReason::PeerClosed,
            Err(e) => break DeathReason::Transport(e.to_string()),
        }
    };
    if handle.close(reason.clone()) {
        info!(%reason, "connection closed");
    }
}

pub(crate) async fn run_writer(
    handle: Arc<ConnectionHandle>,
    mut outbound: mpsc::Receiver<Arc<Message>>,
    mut writer: Box<dyn FrameWriter>,
    write_timeout: Duration,
    force: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = force.cancelled() => break,
            () = handle.closed() => break,
            () = handle.probe_requested() => Frame::Probe,
            message = outbound.recv() => match message {
                Some(message) => Frame::Data(message.payload().clone()),
                None => break,
            },
        };
        if let Err(e) = write_bounded(writer.as_mut(), frame, write_timeout, &force).await {
            let reason = DeathReason::Transport(e.to_string());
            if handle.close(reason) {
                warn!(error = %e, "write failed, closing connection");
            }
            break;
        }
    }

    // A hub shutdown lets the peer receive what was already fanned out to it.
    if handle.close_reason() == Some(&DeathReason::Shutdown) {
        outbound.close();
        let mut flushed = 0usize;
        while let Ok(message) = outbound.try_recv() {
            let frame = Frame::Data(message.payload().clone());
            if write_bounded(writer.as_mut(), frame, write_timeout, &force).await.is_err() {
                break;
            }
            flushed += 1;
        }
        debug!(flushed, "outbound buffer flushed");
    }

    if !matches!(
        tokio::time::timeout(write_timeout, writer.close()).await,
        Ok(Ok(()))
    ) {
        debug!("transport close did not complete cleanly");
    }
}

async fn write_bounded(
    writer: &mut dyn FrameWriter,
    frame: Frame,
    timeout: Duration,
    force: &CancellationToken,
) -> Result<(), TransportError> {
    tokio::select! {
        biased;
        () = force.cancelled() => Err(TransportError::Closed),
        written = tokio::time::timeout(timeout, writer.write_frame(frame)) => {
            written.unwrap_or(Err(TransportError::WriteTimeout(timeout)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NoopAudit;
    use crate::classify::FixedPriority;
    use crate::queue::DispatchQueue;
    use crate::transport::Credentials;
    use crate::transport::memory::pair;
    use beacon_core::Priority;
    use bytes::Bytes;

    fn ingress(queue: &Arc<DispatchQueue>) -> Arc<Ingress> {
        Arc::new(Ingress::new(
            Arc::clone(queue),
            Arc::new(FixedPriority(Priority::Urgent)),
            Arc::new(NoopAudit),
        ))
    }

    #[tokio::test]
    async fn reader_enqueues_data_with_origin_and_priority() {
        let queue = Arc::new(DispatchQueue::new(8));
        let (raw, peer) = pair(Credentials::default(), 4);
        let (handle, _rx) = ConnectionHandle::channel(4, None);
        let task = tokio::spawn(run_reader(Arc::clone(&handle), raw.reader, ingress(&queue)));

        peer.send("hello").await.unwrap();
        let message = tokio::time::timeout(Duration::from_secs(1), queue.dequeue())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.origin(), Some(handle.id()));
        assert_eq!(message.priority(), Priority::Urgent);

        drop(peer);
        task.await.unwrap();
        assert_eq!(handle.close_reason(), Some(&DeathReason::PeerClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn reader_marks_alive_on_probe_reply() {
        let queue = Arc::new(DispatchQueue::new(8));
        let (raw, peer) = pair(Credentials::default(), 4);
        let (handle, _rx) = ConnectionHandle::channel(4, None);
        let _task = tokio::spawn(run_reader(Arc::clone(&handle), raw.reader, ingress(&queue)));

        tokio::time::advance(Duration::from_secs(20)).await;
        handle.request_probe();
        peer.send_frame(Frame::ProbeReply).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(handle.silence() < Duration::from_secs(1));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn writer_sends_data_and_probes() {
        let (raw, mut peer) = pair(Credentials::default(), 4);
        let (handle, rx) = ConnectionHandle::channel(4, None);
        let _task = tokio::spawn(run_writer(
            Arc::clone(&handle),
            rx,
            raw.writer,
            Duration::from_secs(1),
            CancellationToken::new(),
        ));

        handle.send(Arc::new(Message::new("one", Priority::Normal))).unwrap();
        assert_eq!(peer.recv().await, Some(Frame::Data(Bytes::from_static(b"one"))));
        handle.request_probe();
        assert_eq!(peer.recv().await, Some(Frame::Probe));
    }

    #[tokio::test]
    async fn writer_flushes_on_shutdown_close() {
        let (raw, mut peer) = pair(Credentials::default(), 8);
        let (handle, rx) = ConnectionHandle::channel(8, None);
        for text in ["a", "b", "c"] {
            handle.send(Arc::new(Message::new(text, Priority::Normal))).unwrap();
        }
        let _ = handle.close(DeathReason::Shutdown);

        run_writer(handle, rx, raw.writer, Duration::from_secs(1), CancellationToken::new()).await;

        let mut got = Vec::new();
        while let Some(payload) = peer.recv_data().await {
            got.push(payload);
        }
        assert_eq!(got.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out_and_closes() {
        let (raw, _peer) = pair(Credentials::default(), 1);
        let (handle, rx) = ConnectionHandle::channel(8, None);
        for _ in 0..3 {
            handle.send(Arc::new(Message::new("x", Priority::Normal))).unwrap();
        }

        run_writer(
            Arc::clone(&handle),
            rx,
            raw.writer,
            Duration::from_secs(2),
            CancellationToken::new(),
        )
        .await;

        assert!(!handle.is_open());
        assert!(matches!(handle.close_reason(), Some(DeathReason::Transport(_))));
    }

    #[tokio::test]
    async fn force_token_stops_writer() {
        let (raw, _peer) = pair(Credentials::default(), 1);
        let (handle, rx) = ConnectionHandle::channel(8, None);
        let force = CancellationToken::new();
        let task = tokio::spawn(run_writer(handle, rx, raw.writer, Duration::from_secs(60), force.clone()));
        force.cancel();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}

//! Hub lifecycle: startup, connection intake, publishing, and graceful
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{ConnectionId, DeathReason, HubError, Message, Priority, Result, TransportError};
use bytes::Bytes;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::audit::{AuditSink, NoopAudit};
use crate::auth::{AllowAll, AuthDecision, Authenticator};
use crate::broadcaster::{BroadcastStats, Broadcaster};
use crate::classify::{FixedPriority, PriorityClassifier};
use crate::config::HubConfig;
use crate::connection::ConnectionHandle;
use crate::heartbeat::HeartbeatMonitor;
use crate::metrics::{
    CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL, MESSAGES_ENQUEUED_TOTAL, MESSAGES_EVICTED_TOTAL,
    MESSAGES_REJECTED_TOTAL, QUEUE_DEPTH,
};
use crate::queue::{DispatchQueue, Enqueued};
use crate::registry::ConnectionRegistry;
use crate::session;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport, ShutdownStep, await_bounded};
use crate::transport::{Acceptor, RawConnection};

/// Pluggable collaborators. Unset fields fall back to admitting everyone,
/// discarding audit copies, and the configured default priority.
#[derive(Clone, Default)]
pub struct HubCollaborators {
    authenticator: Option<Arc<dyn Authenticator>>,
    audit: Option<Arc<dyn AuditSink>>,
    classifier: Option<Arc<dyn PriorityClassifier>>,
}

impl HubCollaborators {
    /// Use this authenticator.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: impl Authenticator) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Use this audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: impl AuditSink) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    /// Use this priority classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: impl PriorityClassifier) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }
}

/// Producer side of the dispatch queue, shared by `publish` and reader tasks.
pub(crate) struct Ingress {
    queue: Arc<DispatchQueue>,
    classifier: Arc<dyn PriorityClassifier>,
    audit: Arc<dyn AuditSink>,
}

impl Ingress {
    pub(crate) fn new(
        queue: Arc<DispatchQueue>,
        classifier: Arc<dyn PriorityClassifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            queue,
            classifier,
            audit,
        }
    }

    pub(crate) fn classify(&self, origin: &ConnectionId, payload: &Bytes) -> Priority {
        self.classifier.classify(origin, payload)
    }

    pub(crate) fn submit(&self, message: Message) -> Result<Enqueued> {
        let message = Arc::new(message);
        let priority = message.priority();
        match self.queue.enqueue(Arc::clone(&message)) {
            Ok(outcome) => {
                counter!(MESSAGES_ENQUEUED_TOTAL, "priority" => priority.as_str()).increment(1);
                #[allow(clippy::cast_precision_loss)]
                gauge!(QUEUE_DEPTH).set(self.queue.len() as f64);
                if let Enqueued::EvictedLowest(evicted) = &outcome {
                    counter!(MESSAGES_EVICTED_TOTAL, "priority" => evicted.priority().as_str())
                        .increment(1);
                    warn!(
                        msg_id = %evicted.id(),
                        evicted_priority = %evicted.priority(),
                        %priority,
                        "queue full, evicted queued message"
                    );
                }
                if let Err(e) = self.audit.record(message) {
                    debug!(error = %e, "audit record failed");
                }
                Ok(outcome)
            }
            Err(e) => {
                if let HubError::QueueFull { .. } = e {
                    counter!(MESSAGES_REJECTED_TOTAL, "priority" => priority.as_str()).increment(1);
                    warn!(%priority, "queue full, message rejected");
                } else {
                    debug!(error = %e, "message not enqueued");
                }
                Err(e)
            }
        }
    }
}

#[derive(Default)]
struct BackgroundTasks {
    acceptors: Vec<JoinHandle<()>>,
    broadcaster: Option<JoinHandle<BroadcastStats>>,
    heartbeat: Option<JoinHandle<u64>>,
}

/// A running broadcast hub.
pub struct Hub {
    config: HubConfig,
    registry: ConnectionRegistry,
    queue: Arc<DispatchQueue>,
    ingress: Arc<Ingress>,
    authenticator: Arc<dyn Authenticator>,
    shutdown: ShutdownCoordinator,
    connections: TaskTracker,
    tasks: Mutex<BackgroundTasks>,
    started_at: Instant,
}

impl Hub {
    /// Build the registry and queue and spawn the broadcaster and heartbeat
    /// monitor. Must be called from within a Tokio runtime.
    pub fn start(config: HubConfig, collaborators: HubCollaborators) -> Arc<Self> {
        let registry = ConnectionRegistry::new();
        let queue = Arc::new(DispatchQueue::new(config.queue_capacity));
        let shutdown = ShutdownCoordinator::new();

        let classifier: Arc<dyn PriorityClassifier> = match collaborators.classifier {
            Some(classifier) => classifier,
            None => Arc::new(FixedPriority(config.default_priority)),
        };
        let audit: Arc<dyn AuditSink> = match collaborators.audit {
            Some(audit) => audit,
            None => Arc::new(NoopAudit),
        };
        let authenticator: Arc<dyn Authenticator> = match collaborators.authenticator {
            Some(authenticator) => authenticator,
            None => Arc::new(AllowAll),
        };
        let ingress = Arc::new(Ingress::new(Arc::clone(&queue), classifier, audit));

        let broadcaster = Broadcaster::new(Arc::clone(&queue), registry.clone(), config.drop_threshold);
        let broadcaster = tokio::spawn(broadcaster.run().instrument(info_span!("broadcaster")));

        let monitor = HeartbeatMonitor::new(registry.clone(), config.heartbeat_interval, config.pong_wait);
        let heartbeat = tokio::spawn(monitor.run(shutdown.background()).instrument(info_span!("heartbeat")));

        info!(
            queue_capacity = config.queue_capacity,
            outbound_capacity = config.outbound_capacity,
            drop_threshold = config.drop_threshold,
            heartbeat_interval_ms = u64::try_from(config.heartbeat_interval.as_millis()).unwrap_or(u64::MAX),
            "hub started"
        );

        Arc::new(Self {
            config,
            registry,
            queue,
            ingress,
            authenticator,
            shutdown,
            connections: TaskTracker::new(),
            tasks: Mutex::new(BackgroundTasks {
                acceptors: Vec::new(),
                broadcaster: Some(broadcaster),
                heartbeat: Some(heartbeat),
            }),
            started_at: Instant::now(),
        })
    }

    /// Run an accept loop that attaches every connection `acceptor` yields.
    /// The loop ends when shutdown begins or the acceptor reports closed.
    pub fn spawn_acceptor(self: &Arc<Self>, acceptor: impl Acceptor) {
        if self.shutdown.is_shutting_down() {
            warn!("hub is shutting down, acceptor not started");
            return;
        }
        let task = tokio::spawn(
            run_accept_loop(Arc::clone(self), acceptor, self.shutdown.draining())
                .instrument(info_span!("accept_loop")),
        );
        self.tasks.lock().acceptors.push(task);
    }

    /// Authenticate and register a connection, then spawn its reader and
    /// writer tasks.
    pub async fn attach(&self, raw: RawConnection) -> Result<ConnectionId> {
        let RawConnection {
            credentials,
            reader,
            mut writer,
        } = raw;

        if self.registry.is_closed() {
            let _ = writer.close().await;
            return Err(HubError::RegistryClosed);
        }

        let principal = match self.authenticator.authenticate(&credentials).await {
            AuthDecision::Allow { principal } => principal,
            AuthDecision::Deny { reason } => {
                warn!(remote = ?credentials.remote_addr, %reason, "connection rejected");
                counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                let _ = writer.close().await;
                return Err(HubError::Unauthorized { reason });
            }
        };

        let (handle, outbound) = ConnectionHandle::channel(self.config.outbound_capacity, principal);
        let conn_id = match self.registry.register(Arc::clone(&handle)) {
            Ok(id) => id,
            Err(e) => {
                let _ = writer.close().await;
                return Err(e);
            }
        };
        counter!(CONNECTIONS_TOTAL).increment(1);
        info!(
            conn_id = %conn_id,
            principal = ?handle.principal(),
            remote = ?credentials.remote_addr,
            "connection registered"
        );

        let span = info_span!("connection", conn_id = %conn_id);
        let _ = self.connections.spawn(
            session::run_reader(Arc::clone(&handle), reader, Arc::clone(&self.ingress))
                .instrument(span.clone()),
        );
        let _ = self.connections.spawn(
            session::run_writer(
                handle,
                outbound,
                writer,
                self.config.write_timeout,
                self.shutdown.connections(),
            )
            .instrument(span),
        );
        Ok(conn_id)
    }

    /// Queue a hub-originated message.
    pub fn publish(&self, message: Message) -> Result<Enqueued> {
        self.ingress.submit(message)
    }

    /// Run the five-step graceful shutdown.
    ///
    /// 1. refuse registrations and stop accept loops
    /// 2. close the queue to producers
    /// 3. wait for the broadcaster to drain it
    /// 4. close every remaining connection and wait for its tasks
    /// 5. stop the heartbeat monitor
    ///
    /// Each step is bounded by the configured step timeout; tasks that
    /// overrun are aborted. Calls after the first return an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if !self.shutdown.begin() {
            debug!("shutdown already in progress or complete");
            return report;
        }
        let timeout = self.config.shutdown_step_timeout;
        info!(
            connections = self.registry.len(),
            queued = self.queue.len(),
            "graceful shutdown started"
        );

        // 1. Stop accepting.
        let started = Instant::now();
        let _ = self.registry.close();
        let acceptors = std::mem::take(&mut self.tasks.lock().acceptors);
        let mut completed = true;
        for task in acceptors {
            completed &= await_bounded(ShutdownStep::StopAccepting, task, timeout)
                .await
                .is_some();
        }
        report.record(ShutdownStep::StopAccepting, completed, started.elapsed());

        // 2. Close the queue to producers.
        let started = Instant::now();
        report.queued_at_close = self.queue.len();
        self.queue.close();
        report.record(ShutdownStep::CloseQueue, true, started.elapsed());

        // 3. Drain.
        let started = Instant::now();
        let broadcaster = self.tasks.lock().broadcaster.take();
        if let Some(task) = broadcaster {
            report.broadcast = await_bounded(ShutdownStep::DrainBroadcaster, task, timeout).await;
        }
        report.record(
            ShutdownStep::DrainBroadcaster,
            report.broadcast.is_some(),
            started.elapsed(),
        );

        // 4. Close connections.
        let started = Instant::now();
        report.closed_connections = self
            .registry
            .snapshot()
            .iter()
            .filter(|h| h.close(DeathReason::Shutdown))
            .count();
        let completed = self.wait_for_connections(timeout).await;
        report.record(ShutdownStep::CloseConnections, completed, started.elapsed());

        // 5. Stop the heartbeat.
        let started = Instant::now();
        self.shutdown.stop_background();
        let heartbeat = self.tasks.lock().heartbeat.take();
        let completed = match heartbeat {
            Some(task) => await_bounded(ShutdownStep::StopHeartbeat, task, timeout).await.is_some(),
            None => true,
        };
        report.record(ShutdownStep::StopHeartbeat, completed, started.elapsed());

        info!(
            clean = report.is_clean(),
            closed_connections = report.closed_connections,
            drained = report.broadcast.map_or(0, |s| s.messages),
            "graceful shutdown complete"
        );
        report
    }

    async fn wait_for_connections(&self, timeout: Duration) -> bool {
        let _ = self.connections.close();
        if tokio::time::timeout(timeout, self.connections.wait()).await.is_ok() {
            return true;
        }
        warn!(
            step = %ShutdownStep::CloseConnections,
            remaining = self.connections.len(),
            "connection tasks did not finish, forcing"
        );
        self.shutdown.force_connections();
        if tokio::time::timeout(timeout, self.connections.wait()).await.is_err() {
            warn!(remaining = self.connections.len(), "connection tasks still running after force");
        }
        false
    }

    /// Effective configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Messages waiting for fan-out.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Dispatch queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Cancelled when shutdown begins. Outer servers use it to stop
    /// accepting at the same moment the hub does.
    pub fn draining(&self) -> CancellationToken {
        self.shutdown.draining()
    }

    /// Time since [`start`](Self::start).
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

async fn run_accept_loop(hub: Arc<Hub>, mut acceptor: impl Acceptor, draining: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = draining.cancelled() => break,
            accepted = acceptor.accept() => accepted,
        };
        match accepted {
            Ok(raw) => {
                let attaching = Arc::clone(&hub);
                let _ = hub.connections.spawn(
                    async move {
                        if let Err(e) = attaching.attach(raw).await {
                            debug!(error = %e, "connection not attached");
                        }
                    }
                    .in_current_span(),
                );
            }
            Err(TransportError::Closed) => {
                info!("acceptor closed");
                break;
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
    debug!("accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ChannelAuditSink;
    use crate::auth::StaticTokenAuthenticator;
    use crate::transport::memory::{self, MemoryPeer};
    use crate::transport::{Credentials, Frame};
    use assert_matches::assert_matches;

    fn config() -> HubConfig {
        HubConfig {
            shutdown_step_timeout: Duration::from_secs(2),
            ..HubConfig::default()
        }
    }

    async fn connect(hub: &Hub) -> (ConnectionId, MemoryPeer) {
        let (raw, peer) = memory::pair(Credentials::default(), 64);
        let id = hub.attach(raw).await.unwrap();
        (id, peer)
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn peer_message_fans_out_to_everyone_else() {
        let hub = Hub::start(
            config(),
            HubCollaborators::default().with_classifier(FixedPriority(Priority::Urgent)),
        );
        let mut peers = Vec::new();
        for _ in 0..5 {
            peers.push(connect(&hub).await.1);
        }

        peers[0].send("alert").await.unwrap();
        for peer in &mut peers[1..] {
            let got = tokio::time::timeout(Duration::from_secs(1), peer.recv_data())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, Bytes::from_static(b"alert"));
        }
        assert!(peers[0].try_recv().is_none());

        let report = hub.shutdown().await;
        let stats = report.broadcast.unwrap();
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.deliveries, 4);
    }

    #[tokio::test]
    async fn stalled_peer_does_not_hold_back_healthy_peers() {
        let hub = Hub::start(
            HubConfig {
                outbound_capacity: 2,
                ..config()
            },
            HubCollaborators::default(),
        );
        let (stalled, _never_read) = memory::pair(Credentials::default(), 1);
        let _ = hub.attach(stalled).await.unwrap();
        let (_, mut a) = connect(&hub).await;
        let (_, mut b) = connect(&hub).await;

        for i in 0..10 {
            let _ = hub.publish(Message::new(format!("m{i}"), Priority::Normal)).unwrap();
            // Keep the healthy peers' small outbound buffers moving.
            for peer in [&mut a, &mut b] {
                let got = tokio::time::timeout(Duration::from_secs(1), peer.recv_data())
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(got, Bytes::from(format!("m{i}")));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_is_reclaimed_and_responsive_peer_kept() {
        let hub = Hub::start(
            HubConfig {
                heartbeat_interval: Duration::from_secs(1),
                pong_wait: Duration::from_secs(3),
                ..config()
            },
            HubCollaborators::default(),
        );
        let (silent_id, _silent) = connect(&hub).await;
        let (alive_id, mut alive) = connect(&hub).await;
        let _responder = tokio::spawn(async move { while alive.recv_data().await.is_some() {} });

        tokio::time::sleep(Duration::from_millis(4500)).await;

        assert!(hub.registry().get(&silent_id).is_none());
        assert!(hub.registry().get(&alive_id).is_some());
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_drains_every_queued_message() {
        let hub = Hub::start(config(), HubCollaborators::default());
        let (_, mut peer) = connect(&hub).await;
        for i in 0..20 {
            let _ = hub.publish(Message::new(format!("m{i}"), Priority::Normal)).unwrap();
        }

        let report = hub.shutdown().await;
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.broadcast.unwrap().messages, 20);
        assert_eq!(report.closed_connections, 1);
        assert_eq!(
            report.steps.iter().map(|s| s.step).collect::<Vec<_>>(),
            vec![
                ShutdownStep::StopAccepting,
                ShutdownStep::CloseQueue,
                ShutdownStep::DrainBroadcaster,
                ShutdownStep::CloseConnections,
                ShutdownStep::StopHeartbeat,
            ]
        );

        assert_matches!(
            hub.publish(Message::new("late", Priority::Urgent)),
            Err(HubError::QueueClosed)
        );

        let mut received = 0;
        while peer.recv_data().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 20);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_refuses_new_connections() {
        let hub = Hub::start(config(), HubCollaborators::default());
        let first = hub.shutdown().await;
        assert_eq!(first.steps.len(), 5);
        let second = hub.shutdown().await;
        assert!(second.steps.is_empty());

        let (raw, mut peer) = memory::pair(Credentials::default(), 4);
        assert_matches!(hub.attach(raw).await, Err(HubError::RegistryClosed));
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn unauthorized_connection_is_rejected() {
        let hub = Hub::start(
            config(),
            HubCollaborators::default().with_authenticator(StaticTokenAuthenticator::new([("good", "alice")])),
        );

        let (raw, mut peer) = memory::pair(Credentials::with_token("bad"), 4);
        assert_matches!(hub.attach(raw).await, Err(HubError::Unauthorized { .. }));
        assert!(peer.recv().await.is_none());

        let (raw, _peer) = memory::pair(Credentials::with_token("good"), 4);
        let id = hub.attach(raw).await.unwrap();
        let handle = hub.registry().get(&id).unwrap();
        assert_eq!(handle.principal().map(|p| p.as_str()), Some("alice"));
    }

    #[tokio::test]
    async fn peer_disconnect_unregisters() {
        let hub = Hub::start(config(), HubCollaborators::default());
        let (id, peer) = connect(&hub).await;
        drop(peer);
        eventually(|| hub.registry().get(&id).is_none()).await;
    }

    #[tokio::test]
    async fn acceptor_attaches_connections_until_shutdown() {
        let hub = Hub::start(config(), HubCollaborators::default());
        let (connector, acceptor) = memory::listener(8);
        hub.spawn_acceptor(acceptor);

        let mut peer = connector.connect(Credentials::default()).await.unwrap();
        eventually(|| hub.connection_count() == 1).await;

        let report = hub.shutdown().await;
        assert!(report.steps[0].completed);
        assert!(peer.recv().await.is_none());

        // The accept loop is gone; nothing attaches any more.
        let _late = connector.connect(Credentials::default()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn audit_receives_published_messages() {
        let (sink, mut audit_rx) = ChannelAuditSink::channel(4);
        let hub = Hub::start(config(), HubCollaborators::default().with_audit(sink));
        let _ = hub.publish(Message::new("audited", Priority::Low)).unwrap();
        let copy = audit_rx.recv().await.unwrap();
        assert_eq!(&copy.payload()[..], b"audited");
    }

    #[tokio::test]
    async fn probe_replies_are_not_broadcast() {
        let hub = Hub::start(config(), HubCollaborators::default());
        let (_, a) = connect(&hub).await;
        let (_, mut b) = connect(&hub).await;
        a.send_frame(Frame::ProbeReply).await.unwrap();
        a.send("real").await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), b.recv_data())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Bytes::from_static(b"real"));
        assert_eq!(hub.queue_depth(), 0);
    }
}

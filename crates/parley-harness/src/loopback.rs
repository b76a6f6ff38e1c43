//! In-process channel from a client driver to a [`NegotiationService`].
//!
//! Requests are encoded, delayed by the configured latency and handed to the
//! service as bytes, so the whole wire path runs without sockets. Open and
//! close failures, and a channel that stops answering after a number of
//! requests, can be injected to exercise the driver's failure paths.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parley_client::{ChannelFactory, RequestChannel};
use parley_core::{
    Environment, NegotiationError, ReplyEnvelope, RequestEnvelope,
    message::{decode_reply, encode_request},
};
use parley_server::{NegotiationChannel, NegotiationService, ServerNegotiationProtocol};

/// Latency and fault injection for loopback channels.
#[derive(Debug, Clone, Default)]
pub struct LoopbackConfig {
    /// Delay before each request reaches the issuer
    pub latency: Duration,
    /// Fail every `open`
    pub fail_open: bool,
    /// Fail every `close`
    pub fail_close: bool,
    /// Stop answering after this many requests on a channel
    pub stall_after: Option<usize>,
}

/// Counters shared by every channel of one factory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Channels opened
    pub opened: usize,
    /// Channels closed gracefully
    pub closed: usize,
    /// Channels aborted by the client
    pub aborted: usize,
    /// Channels aborted by the issuer's idle reaper
    pub reaped: usize,
    /// Requests sent
    pub requests: usize,
    /// Timeout passed with each request, in order
    pub request_timeouts: Vec<Duration>,
}

type SharedStats = Arc<Mutex<ChannelStats>>;

fn update(stats: &SharedStats, f: impl FnOnce(&mut ChannelStats)) {
    f(&mut stats.lock().unwrap_or_else(PoisonError::into_inner));
}

/// Issuer-side view of a loopback channel, tracked by the idle reaper.
struct LoopbackSession {
    id: u64,
    reaped: AtomicBool,
    stats: SharedStats,
}

impl NegotiationChannel for LoopbackSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn abort(&self) {
        if !self.reaped.swap(true, Ordering::SeqCst) {
            update(&self.stats, |s| s.reaped += 1);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Created,
    Open,
    Closed,
    Aborted,
}

/// Client end of a loopback channel.
pub struct LoopbackChannel<E: Environment, P: ServerNegotiationProtocol> {
    service: NegotiationService<E, P>,
    env: E,
    issuer: String,
    config: LoopbackConfig,
    session: Arc<LoopbackSession>,
    state: ChannelState,
    sent: usize,
}

impl<E: Environment, P: ServerNegotiationProtocol> LoopbackChannel<E, P> {
    /// Issuer-assigned channel id.
    pub fn id(&self) -> u64 {
        self.session.id
    }

    fn transport_error(&self, reason: impl Into<String>) -> NegotiationError {
        NegotiationError::Transport { target: self.issuer.clone(), reason: reason.into() }
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.session.reaped.load(Ordering::SeqCst) {
            return Err(self.transport_error("channel aborted by issuer"));
        }
        match self.state {
            ChannelState::Open => Ok(()),
            state => Err(self.transport_error(format!("channel is {state:?}"))),
        }
    }
}

#[async_trait]
impl<E: Environment, P: ServerNegotiationProtocol> RequestChannel for LoopbackChannel<E, P> {
    async fn open(&mut self, _timeout: Duration) -> Result<(), NegotiationError> {
        if self.config.fail_open {
            return Err(self.transport_error("connection refused"));
        }
        if self.state != ChannelState::Created {
            return Err(self.transport_error(format!("cannot open channel in {:?}", self.state)));
        }
        self.state = ChannelState::Open;
        update(&self.session.stats, |s| s.opened += 1);
        Ok(())
    }

    async fn request(
        &mut self,
        request: RequestEnvelope,
        timeout: Duration,
    ) -> Result<ReplyEnvelope, NegotiationError> {
        self.ensure_open()?;
        let bytes = encode_request(&request)?;
        self.sent += 1;
        update(&self.session.stats, |s| {
            s.requests += 1;
            s.request_timeouts.push(timeout);
        });

        let stalled = self.config.stall_after.is_some_and(|limit| self.sent > limit);
        let session: Arc<dyn NegotiationChannel> = self.session.clone();
        let exchange = async {
            self.env.sleep(self.config.latency).await;
            if stalled {
                std::future::pending::<()>().await;
            }
            self.service.handle(&bytes, Some(session)).await
        };

        let reply = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => return Err(self.transport_error(err.to_string())),
            Err(_) => return Err(self.transport_error(format!("no reply within {timeout:?}"))),
        };
        self.ensure_open()?;
        Ok(decode_reply(&reply)?)
    }

    async fn close(&mut self, _timeout: Duration) -> Result<(), NegotiationError> {
        if self.config.fail_close {
            return Err(self.transport_error("close handshake failed"));
        }
        self.ensure_open()?;
        self.state = ChannelState::Closed;
        update(&self.session.stats, |s| s.closed += 1);
        Ok(())
    }

    fn abort(&mut self) {
        if matches!(self.state, ChannelState::Closed | ChannelState::Aborted) {
            return;
        }
        self.state = ChannelState::Aborted;
        update(&self.session.stats, |s| s.aborted += 1);
    }
}

/// Creates loopback channels to one service.
pub struct LoopbackFactory<E: Environment, P: ServerNegotiationProtocol> {
    service: NegotiationService<E, P>,
    env: E,
    config: LoopbackConfig,
    stats: SharedStats,
    next_id: AtomicU64,
}

impl<E: Environment, P: ServerNegotiationProtocol> LoopbackFactory<E, P> {
    /// Factory for channels to `service`.
    pub fn new(service: NegotiationService<E, P>, env: E, config: LoopbackConfig) -> Self {
        Self { service, env, config, stats: SharedStats::default(), next_id: AtomicU64::new(1) }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> ChannelStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Service behind the channels.
    pub fn service(&self) -> &NegotiationService<E, P> {
        &self.service
    }
}

#[async_trait]
impl<E: Environment, P: ServerNegotiationProtocol> ChannelFactory for LoopbackFactory<E, P> {
    type Channel = LoopbackChannel<E, P>;

    async fn create_channel(
        &self,
        issuer: &str,
        _via: &str,
    ) -> Result<Self::Channel, NegotiationError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(channel = id, issuer, "creating loopback channel");
        Ok(LoopbackChannel {
            service: self.service.clone(),
            env: self.env.clone(),
            issuer: issuer.to_string(),
            config: self.config.clone(),
            session: Arc::new(LoopbackSession {
                id,
                reaped: AtomicBool::new(false),
                stats: Arc::clone(&self.stats),
            }),
            state: ChannelState::Created,
            sent: 0,
        })
    }
}

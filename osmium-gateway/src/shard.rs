//! The gateway shard.
//!
//! A shard is one WebSocket session against Discord's gateway. It owns
//! the connect/identify/resume/reconnect state machine, the heartbeat,
//! the rate-limited send path, and the member-request table; inbound
//! dispatch is routed in `dispatch.rs`.
//!
//! A shard is a single logical actor: frames are decoded, sequence-
//! tracked, dispatched, and written strictly from the connection loop,
//! so state transitions, cache updates, and event emission never
//! interleave.

use crate::client::Client;
use crate::codec::FrameCodec;
use crate::error::{CloseCode, GatewayError};
use crate::event::Event;
use crate::heartbeat::Heartbeat;
use crate::members::{generate_nonce, MemberRequestTable, RequestMembersOptions};
use crate::metrics::ShardMetrics;
use crate::opcode::OpCode;
use crate::outbound::OutboundSender;
use crate::payload::{
    ConnectionProperties, GatewayPacket, HelloData, IdentifyData, RequestGuildMembersData,
    ResumeData, UpdatePresence, UpdateVoiceStateData,
};
use crate::ratelimit::{
    Bucket, IdentifyRateLimiter, GLOBAL_BUCKET_INTERVAL, GLOBAL_BUCKET_LIMIT,
    GLOBAL_BUCKET_RESERVED, PRESENCE_BUCKET_INTERVAL, PRESENCE_BUCKET_LIMIT,
};
use crate::session::{SessionState, ShardStatus};
use crate::GATEWAY_VERSION;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use osmium_model::{Activity, Member, Snowflake, Status};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Close code used when tearing down a resumable connection so Discord
/// keeps the session alive.
const RECONNECT_CLOSE_CODE: u16 = 4999;

/// External commands accepted by the connection loop.
enum ShardCommand {
    /// Tear down and reconnect (resume if possible).
    Reconnect,
    /// Tear down and stay down.
    Stop,
}

/// Notices the shard manager listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShardNotice {
    Ready(u16),
    Resumed(u16),
    Disconnected(u16),
}

/// How a single connection ended.
enum ConnectionEnd {
    /// `stop()` or `disconnect(false)`; stay down.
    Shutdown,
    /// Tear down and go through the reconnect policy.
    Reconnect {
        /// Forced reconnects (op 7, missed ack) ignore `auto_reconnect`.
        forced: bool,
        error: Option<GatewayError>,
    },
    /// A fatal close code; never reconnect.
    Fatal { code: u16, reason: String },
}

/// Control flow out of a packet handler.
enum Flow {
    Continue,
    End(ConnectionEnd),
}

/// A single gateway shard.
pub struct Shard {
    pub(crate) id: u16,
    total: u16,
    pub(crate) client: Arc<Client>,
    pub(crate) session: SessionState,
    pub(crate) heartbeat: Heartbeat,
    pub(crate) member_requests: Arc<MemberRequestTable>,
    pub(crate) sender: OutboundSender,
    pub(crate) metrics: ShardMetrics,

    limiter: Arc<IdentifyRateLimiter>,
    outbox_rx: flume::Receiver<Message>,
    command_tx: flume::Sender<ShardCommand>,
    command_rx: flume::Receiver<ShardCommand>,
    socket_open: Arc<AtomicBool>,
    running: AtomicBool,
    stopping: AtomicBool,

    /// Guilds queued for a full member fetch before readiness.
    pub(crate) get_all_users_queue: Mutex<VecDeque<Snowflake>>,
    /// Guilds with a member fetch in flight, blocking readiness.
    pub(crate) get_all_users_pending: Mutex<HashSet<Snowflake>>,
    /// Armed while waiting for the GUILD_CREATE stream to go quiet.
    pub(crate) guild_create_deadline: Mutex<Option<Instant>>,

    pub(crate) notices: Option<flume::Sender<ShardNotice>>,
}

impl Shard {
    /// Create a shard. It does not connect until [`Shard::run`].
    pub fn new(id: u16, total: u16, client: Arc<Client>) -> Self {
        Self::with_limiter(id, total, client, Arc::new(IdentifyRateLimiter::default()))
    }

    /// Create a shard sharing an identify rate limiter with its
    /// siblings.
    pub fn with_limiter(
        id: u16,
        total: u16,
        client: Arc<Client>,
        limiter: Arc<IdentifyRateLimiter>,
    ) -> Self {
        let (outbox_tx, outbox_rx) = flume::unbounded();
        let (command_tx, command_rx) = flume::unbounded();
        let socket_open = Arc::new(AtomicBool::new(false));

        let global = Bucket::with_reserved(
            GLOBAL_BUCKET_LIMIT,
            GLOBAL_BUCKET_INTERVAL,
            GLOBAL_BUCKET_RESERVED,
        );
        let presence = Bucket::new(PRESENCE_BUCKET_LIMIT, PRESENCE_BUCKET_INTERVAL);
        let sender = OutboundSender::new(
            global,
            presence,
            client.encoding(),
            outbox_tx,
            Arc::clone(&socket_open),
            id,
        );

        Self {
            id,
            total,
            session: SessionState::new(id),
            heartbeat: Heartbeat::new(),
            member_requests: Arc::new(MemberRequestTable::new()),
            sender,
            metrics: ShardMetrics::new(),
            client,
            limiter,
            outbox_rx,
            command_tx,
            command_rx,
            socket_open,
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            get_all_users_queue: Mutex::new(VecDeque::new()),
            get_all_users_pending: Mutex::new(HashSet::new()),
            guild_create_deadline: Mutex::new(None),
            notices: None,
        }
    }

    /// Wire the manager notice channel. Must happen before `run`.
    pub(crate) fn set_notifier(&mut self, notices: flume::Sender<ShardNotice>) {
        self.notices = Some(notices);
    }

    /// This shard's index.
    pub fn shard_id(&self) -> u16 {
        self.id
    }

    /// Total shard count.
    pub fn total_shards(&self) -> u16 {
        self.total
    }

    /// Current connection status.
    pub fn status(&self) -> ShardStatus {
        self.session.status()
    }

    /// Whether the shard finished its initial guild stream.
    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    /// Latency of the last acknowledged heartbeat.
    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    /// Point-in-time copy of the shard counters.
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Request a teardown. `reconnect = true` goes through the
    /// reconnect policy (resuming when possible); `false` stays down.
    pub fn disconnect(&self, reconnect: bool) {
        let command = if reconnect {
            ShardCommand::Reconnect
        } else {
            self.stopping.store(true, Ordering::SeqCst);
            ShardCommand::Stop
        };
        let _ = self.command_tx.send(command);
    }

    /// Request a graceful shutdown.
    pub fn stop(&self) {
        self.disconnect(false);
    }

    /// Queue a raw `{op, d}` payload through the rate limiter. Dropped
    /// when the socket is not open.
    pub fn send_ws(&self, op: OpCode, data: Value, priority: bool) {
        self.sender.send(op, data, priority);
    }

    /// Update this shard's presence. The presence is remembered and
    /// replayed in future IDENTIFYs.
    pub fn edit_status(&self, status: Status, activities: Vec<Activity>) {
        let since = match status {
            Status::Idle => std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .ok()
                .map(|d| d.as_millis() as u64),
            _ => None,
        };
        let presence = UpdatePresence {
            since,
            activities,
            status,
            afk: false,
        };
        self.session.set_presence(presence.clone());

        match serde_json::to_value(&presence) {
            Ok(data) => self.send_ws(OpCode::PresenceUpdate, data, false),
            Err(error) => warn!(shard_id = self.id, %error, "failed to serialize presence"),
        }
    }

    /// Join, move within, or leave (channel `None`) a voice channel.
    pub fn update_voice_state(
        &self,
        guild_id: Snowflake,
        channel_id: Option<Snowflake>,
        self_mute: bool,
        self_deaf: bool,
    ) {
        let data = UpdateVoiceStateData {
            guild_id,
            channel_id,
            self_mute,
            self_deaf,
        };
        match serde_json::to_value(&data) {
            Ok(data) => self.send_ws(OpCode::VoiceStateUpdate, data, false),
            Err(error) => warn!(shard_id = self.id, %error, "failed to serialize voice state"),
        }
    }

    /// Request members of a guild, correlated by nonce.
    ///
    /// Resolves with every member delivered across the reply chunks; on
    /// timeout it resolves with whatever accumulated. Validation errors
    /// are returned synchronously.
    pub fn request_guild_members(
        &self,
        guild_id: Snowflake,
        options: RequestMembersOptions,
    ) -> Result<oneshot::Receiver<Vec<Member>>, GatewayError> {
        let intents = self.client.options().intents;
        let wants_everyone = options.user_ids.is_none() && options.query.is_none();

        if wants_everyone && !intents.contains(osmium_model::Intents::GUILD_MEMBERS) {
            return Err(GatewayError::MissingIntent("GUILD_MEMBERS"));
        }
        if options.presences && !intents.contains(osmium_model::Intents::GUILD_PRESENCES) {
            return Err(GatewayError::MissingIntent("GUILD_PRESENCES"));
        }
        if let Some(ref user_ids) = options.user_ids {
            if user_ids.len() > 100 {
                return Err(GatewayError::InvalidArguments(
                    "cannot request more than 100 members by ID".to_owned(),
                ));
            }
        }

        let nonce = generate_nonce();
        let query = match (&options.user_ids, options.query) {
            (None, None) => Some(String::new()),
            (_, query) => query,
        };
        let payload = RequestGuildMembersData {
            guild_id,
            limit: options.limit.unwrap_or(0),
            user_ids: options.user_ids,
            query,
            presences: options.presences.then_some(true),
            nonce: nonce.clone(),
        };
        let data = serde_json::to_value(&payload)?;

        let (tx, rx) = oneshot::channel();
        self.member_requests.insert(nonce.clone(), tx);
        self.send_ws(OpCode::RequestGuildMembers, data, false);

        let table = Arc::clone(&self.member_requests);
        let duration = options
            .timeout
            .unwrap_or(self.client.options().request_timeout);
        let timeout_nonce = nonce.clone();
        let handle = tokio::spawn(async move {
            sleep(duration).await;
            table.time_out(&timeout_nonce);
        });
        self.member_requests.attach_timeout(&nonce, handle);

        Ok(rx)
    }

    pub(crate) fn notify(&self, notice: ShardNotice) {
        if let Some(ref notices) = self.notices {
            let _ = notices.send(notice);
        }
    }

    /// Connect and service the gateway until a fatal error or a stop
    /// request. Reconnects (resuming when possible) on transient
    /// failures.
    pub async fn run(&self) -> Result<(), GatewayError> {
        if self.running.swap(true, Ordering::SeqCst) {
            error!(shard_id = self.id, "run() called while already connected");
            self.client
                .emit(self.id, Event::ShardError(GatewayError::AlreadyConnected));
            return Err(GatewayError::AlreadyConnected);
        }

        let result = self.run_inner().await;
        self.running.store(false, Ordering::SeqCst);
        self.stopping.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self) -> Result<(), GatewayError> {
        loop {
            if self.stopping.load(Ordering::SeqCst) {
                self.session.set_status(ShardStatus::Disconnected);
                return Ok(());
            }

            let end = self.connect_once().await;
            self.teardown();

            match end {
                ConnectionEnd::Shutdown => {
                    info!(shard_id = self.id, "shard shut down");
                    // A deliberate stop abandons the session entirely.
                    self.session.hard_reset();
                    self.client.emit(self.id, Event::ShardDisconnect { error: None });
                    self.notify(ShardNotice::Disconnected(self.id));
                    return Ok(());
                }

                ConnectionEnd::Fatal { code, reason } => {
                    error!(shard_id = self.id, code, %reason, "fatal close, not reconnecting");
                    self.session.hard_reset();
                    self.client.emit(
                        self.id,
                        Event::ShardError(GatewayError::Closed {
                            code,
                            reason: reason.clone(),
                        }),
                    );
                    self.client.emit(self.id, Event::ShardDisconnect { error: None });
                    self.notify(ShardNotice::Disconnected(self.id));
                    return Err(GatewayError::Closed { code, reason });
                }

                ConnectionEnd::Reconnect { forced, error } => {
                    if let Some(ref error) = error {
                        warn!(shard_id = self.id, %error, "connection interrupted");
                    }
                    self.client.emit(self.id, Event::ShardDisconnect { error });
                    self.notify(ShardNotice::Disconnected(self.id));

                    if !forced && !self.client.options().auto_reconnect {
                        info!(shard_id = self.id, "auto reconnect disabled, staying down");
                        return Ok(());
                    }

                    // A session that keeps failing to resume is
                    // invalidated so the next connect re-identifies.
                    if self.session.resumable()
                        && self.session.connect_attempts()
                            >= self.client.options().max_reconnect_attempts
                    {
                        warn!(
                            shard_id = self.id,
                            attempts = self.session.connect_attempts(),
                            "resume attempts exhausted, invalidating session"
                        );
                        self.session.set_session_id(None);
                        self.session.reset_sequence();
                    }

                    self.metrics.inc_reconnections();

                    if self.session.resumable() {
                        info!(shard_id = self.id, "resumable session, reconnecting immediately");
                        continue;
                    }

                    let delay = self.session.next_reconnect_delay();
                    info!(
                        shard_id = self.id,
                        delay_ms = delay.as_millis() as u64,
                        "waiting before reconnect"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Tear down per-connection state after the loop exits.
    fn teardown(&self) {
        self.socket_open.store(false, Ordering::Release);
        self.heartbeat.reset();
        self.member_requests.resolve_all();
        *self.guild_create_deadline.lock() = None;
        self.get_all_users_queue.lock().clear();
        self.get_all_users_pending.lock().clear();
        self.session.reset();
        // Outbound frames never survive a reconnect.
        while self.outbox_rx.try_recv().is_ok() {}
    }

    /// The endpoint to connect to: the resume URL while a session
    /// exists, else the configured gateway URL, with version/encoding
    /// (and compression) query parameters.
    fn connect_url(&self) -> Result<url::Url, GatewayError> {
        let options = self.client.options();
        let base = if self.session.resumable() {
            self.session
                .resume_url()
                .unwrap_or_else(|| options.gateway_url.clone())
        } else {
            options.gateway_url.clone()
        };

        let mut url = url::Url::parse(&base)?;
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair("v", &GATEWAY_VERSION.to_string())
            .append_pair("encoding", self.client.encoding().as_str());
        if options.compress {
            url.query_pairs_mut().append_pair("compress", "zlib-stream");
        }
        Ok(url)
    }

    /// Open one socket and service it until it ends.
    async fn connect_once(&self) -> ConnectionEnd {
        let attempt = self.session.record_connect_attempt();
        self.session.set_status(ShardStatus::Connecting);

        let url = match self.connect_url() {
            Ok(url) => url,
            Err(error) => {
                return ConnectionEnd::Reconnect {
                    forced: false,
                    error: Some(error),
                }
            }
        };

        info!(shard_id = self.id, attempt, url = %url, "connecting to gateway");
        let connect_timeout = self.client.options().connect_timeout;

        let connected = timeout(connect_timeout, connect_async(url.as_str())).await;
        let ws = match connected {
            Err(_) => {
                return ConnectionEnd::Reconnect {
                    forced: false,
                    error: Some(GatewayError::ConnectionTimeout),
                }
            }
            Ok(Err(error)) => {
                return ConnectionEnd::Reconnect {
                    forced: false,
                    error: Some(error.into()),
                }
            }
            Ok(Ok((ws, _response))) => ws,
        };

        debug!(shard_id = self.id, "socket open");
        self.session.set_status(ShardStatus::Handshaking);
        self.heartbeat.reset();
        self.socket_open.store(true, Ordering::Release);

        let (mut sink, mut stream) = ws.split();
        let mut codec = FrameCodec::new(self.client.encoding(), self.client.options().compress);

        let end = self
            .drive_connection(&mut sink, &mut stream, &mut codec, connect_timeout)
            .await;

        self.socket_open.store(false, Ordering::Release);
        self.close_socket(&mut sink, &end).await;
        end
    }

    /// Send the closing frame appropriate for how the connection ended.
    async fn close_socket(&self, sink: &mut WsSink, end: &ConnectionEnd) {
        let code = match end {
            ConnectionEnd::Reconnect { .. } if self.session.resumable() => RECONNECT_CLOSE_CODE,
            _ => 1000,
        };
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: "".into(),
        };
        // Best effort; the server may already be gone.
        let _ = sink.send(Message::Close(Some(frame))).await;
    }

    /// The select loop over socket frames, the heartbeat timer, the
    /// outbox, deadlines, and external commands.
    async fn drive_connection(
        &self,
        sink: &mut WsSink,
        stream: &mut SplitStream<WsStream>,
        codec: &mut FrameCodec,
        connect_timeout: Duration,
    ) -> ConnectionEnd {
        // Far-future fallback for disabled deadline branches.
        let far_future = || Instant::now() + Duration::from_secs(3600 * 24);

        // Armed until HELLO arrives.
        let mut hello_deadline = Some(Instant::now() + connect_timeout);
        let mut heartbeat_interval: Option<Duration> = None;
        let mut next_beat = far_future();

        loop {
            let ready_deadline = *self.guild_create_deadline.lock();

            let flow = tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(message)) => {
                        self.handle_frame(
                            message,
                            sink,
                            codec,
                            &mut hello_deadline,
                            &mut heartbeat_interval,
                            &mut next_beat,
                        )
                        .await
                    }
                    Some(Err(error)) => Flow::End(ConnectionEnd::Reconnect {
                        forced: false,
                        error: Some(GatewayError::WebSocket(error)),
                    }),
                    None => Flow::End(ConnectionEnd::Reconnect {
                        forced: false,
                        error: Some(GatewayError::Closed {
                            code: 1006,
                            reason: "socket stream ended".to_owned(),
                        }),
                    }),
                },

                _ = sleep_until(next_beat), if heartbeat_interval.is_some() => {
                    let interval = heartbeat_interval.unwrap_or(Duration::from_secs(41));
                    self.heartbeat_tick(&mut next_beat, interval)
                }

                frame = self.outbox_rx.recv_async() => match frame {
                    Ok(frame) => {
                        if let Err(error) = sink.send(frame).await {
                            Flow::End(ConnectionEnd::Reconnect {
                                forced: false,
                                error: Some(GatewayError::WebSocket(error)),
                            })
                        } else {
                            Flow::Continue
                        }
                    }
                    Err(_) => Flow::Continue,
                },

                _ = sleep_until(hello_deadline.unwrap_or_else(far_future)),
                    if hello_deadline.is_some() =>
                {
                    Flow::End(ConnectionEnd::Reconnect {
                        forced: false,
                        error: Some(GatewayError::ConnectionTimeout),
                    })
                }

                _ = sleep_until(ready_deadline.unwrap_or_else(far_future)),
                    if ready_deadline.is_some() =>
                {
                    debug!(shard_id = self.id, "guild stream went quiet");
                    *self.guild_create_deadline.lock() = None;
                    self.check_ready();
                    Flow::Continue
                }

                command = self.command_rx.recv_async() => match command {
                    Ok(ShardCommand::Stop) | Err(_) => Flow::End(ConnectionEnd::Shutdown),
                    Ok(ShardCommand::Reconnect) => Flow::End(ConnectionEnd::Reconnect {
                        forced: true,
                        error: None,
                    }),
                },
            };

            match flow {
                Flow::Continue => {}
                Flow::End(end) => return end,
            }
        }
    }

    /// Route one WebSocket message.
    async fn handle_frame(
        &self,
        message: Message,
        sink: &mut WsSink,
        codec: &mut FrameCodec,
        hello_deadline: &mut Option<Instant>,
        heartbeat_interval: &mut Option<Duration>,
        next_beat: &mut Instant,
    ) -> Flow {
        match message {
            Message::Text(text) => {
                self.metrics.inc_messages();
                match codec.decode_text(text.as_str()) {
                    Ok(packet) => {
                        self.handle_packet(packet, hello_deadline, heartbeat_interval, next_beat)
                            .await
                    }
                    Err(error) => {
                        warn!(shard_id = self.id, %error, "dropping undecodable text frame");
                        self.client.emit(self.id, Event::ShardError(error));
                        Flow::Continue
                    }
                }
            }

            Message::Binary(data) => {
                self.metrics.inc_messages();
                match codec.decode_binary(&data) {
                    Ok(Some(packet)) => {
                        self.handle_packet(packet, hello_deadline, heartbeat_interval, next_beat)
                            .await
                    }
                    Ok(None) => Flow::Continue,
                    Err(error) => {
                        warn!(shard_id = self.id, %error, "dropping undecodable binary frame");
                        self.client.emit(self.id, Event::ShardError(error));
                        Flow::Continue
                    }
                }
            }

            Message::Ping(data) => {
                let _ = sink.send(Message::Pong(data)).await;
                Flow::Continue
            }

            Message::Close(frame) => Flow::End(self.close_policy(frame)),

            Message::Pong(_) | Message::Frame(_) => Flow::Continue,
        }
    }

    /// Apply the close-code policy table.
    fn close_policy(&self, frame: Option<CloseFrame>) -> ConnectionEnd {
        let (code, reason) = frame
            .map(|f| (u16::from(f.code), f.reason.to_string()))
            .unwrap_or((1006, "connection reset".to_owned()));

        match CloseCode::from_code(code) {
            Some(close_code) => {
                if close_code.resets_sequence() {
                    self.session.reset_sequence();
                }
                if close_code.invalidates_session() {
                    self.session.set_session_id(None);
                }

                let error = GatewayError::Closed {
                    code,
                    reason: close_code.describe().to_owned(),
                };
                if close_code.can_reconnect() {
                    ConnectionEnd::Reconnect {
                        forced: false,
                        error: Some(error),
                    }
                } else {
                    ConnectionEnd::Fatal {
                        code,
                        reason: close_code.describe().to_owned(),
                    }
                }
            }
            None => {
                debug!(shard_id = self.id, code, %reason, "socket closed");
                ConnectionEnd::Reconnect {
                    forced: false,
                    error: Some(GatewayError::Closed { code, reason }),
                }
            }
        }
    }

    /// One scheduled heartbeat tick.
    fn heartbeat_tick(&self, next_beat: &mut Instant, interval: Duration) -> Flow {
        let status = self.session.status();
        if matches!(status, ShardStatus::Resuming | ShardStatus::Identifying) {
            // Heartbeats pause during session negotiation.
            *next_beat = Instant::now() + interval;
            return Flow::Continue;
        }

        if !self.heartbeat.is_acked() {
            error!(
                shard_id = self.id,
                "heartbeat was not acknowledged, connection presumed dead"
            );
            return Flow::End(ConnectionEnd::Reconnect {
                forced: true,
                error: Some(GatewayError::MissedHeartbeatAck),
            });
        }

        self.send_heartbeat(true);
        *next_beat = Instant::now() + interval;
        Flow::Continue
    }

    /// Route one decoded packet by opcode.
    async fn handle_packet(
        &self,
        packet: GatewayPacket,
        hello_deadline: &mut Option<Instant>,
        heartbeat_interval: &mut Option<Duration>,
        next_beat: &mut Instant,
    ) -> Flow {
        if let Some(seq) = packet.s {
            self.session.track_sequence(seq);
        }

        match packet.op {
            OpCode::Hello => {
                *hello_deadline = None;
                let hello: HelloData = match packet
                    .d
                    .map(serde_json::from_value)
                    .transpose()
                {
                    Ok(Some(hello)) => hello,
                    Ok(None) | Err(_) => {
                        warn!(shard_id = self.id, "malformed HELLO payload");
                        return Flow::End(ConnectionEnd::Reconnect {
                            forced: false,
                            error: Some(GatewayError::Decode("malformed HELLO".to_owned())),
                        });
                    }
                };

                let interval = Duration::from_millis(hello.heartbeat_interval);
                *heartbeat_interval = Some(interval);
                *next_beat = Instant::now() + interval;
                debug!(
                    shard_id = self.id,
                    interval_ms = hello.heartbeat_interval,
                    "received HELLO"
                );

                if let Err(error) = self.limiter.acquire().await {
                    warn!(shard_id = self.id, %error, "identify limiter unavailable");
                }

                if self.session.resumable() {
                    self.resume();
                } else {
                    self.identify();
                    // First heartbeat goes out with the identify.
                    self.send_heartbeat(false);
                }
                Flow::Continue
            }

            OpCode::HeartbeatAck => {
                self.heartbeat.mark_acked();
                trace!(
                    shard_id = self.id,
                    latency_ms = self.heartbeat.latency().map(|l| l.as_millis() as u64),
                    "heartbeat acknowledged"
                );
                Flow::Continue
            }

            OpCode::Heartbeat => {
                // Server-requested beat; does not affect ack tracking.
                debug!(shard_id = self.id, "server requested heartbeat");
                self.send_heartbeat(false);
                Flow::Continue
            }

            OpCode::Reconnect => {
                info!(shard_id = self.id, "server requested reconnect");
                Flow::End(ConnectionEnd::Reconnect {
                    forced: true,
                    error: None,
                })
            }

            OpCode::InvalidSession => {
                let resumable = packet
                    .d
                    .as_ref()
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                warn!(shard_id = self.id, resumable, "session invalidated");

                if resumable {
                    self.resume();
                } else {
                    self.session.set_session_id(None);
                    self.session.reset_sequence();
                    self.identify();
                }
                Flow::Continue
            }

            OpCode::Dispatch => {
                self.handle_dispatch(packet);
                Flow::Continue
            }

            other => {
                trace!(shard_id = self.id, opcode = ?other, "ignoring opcode");
                Flow::Continue
            }
        }
    }

    /// Send IDENTIFY for a fresh session.
    fn identify(&self) {
        self.session.set_status(ShardStatus::Identifying);
        self.session.reset_sequence();

        let options = self.client.options();
        let presence = self.session.presence().or_else(|| options.presence.clone());
        let identify = IdentifyData {
            token: &options.token,
            properties: ConnectionProperties::default(),
            compress: options.compress,
            large_threshold: options.large_threshold,
            shard: [self.id, self.total],
            presence,
            intents: options.intents,
        };

        info!(shard_id = self.id, "identifying");
        match serde_json::to_value(&identify) {
            Ok(data) => {
                self.send_ws(OpCode::Identify, data, true);
                self.metrics.inc_identifies();
            }
            Err(error) => warn!(shard_id = self.id, %error, "failed to serialize IDENTIFY"),
        }
    }

    /// Send RESUME for the existing session.
    fn resume(&self) {
        self.session.set_status(ShardStatus::Resuming);

        let Some(session_id) = self.session.session_id() else {
            warn!(shard_id = self.id, "resume requested without a session");
            self.identify();
            return;
        };

        let resume = ResumeData {
            token: &self.client.options().token,
            session_id: &session_id,
            seq: self.session.sequence(),
        };

        info!(shard_id = self.id, seq = resume.seq, "resuming session");
        match serde_json::to_value(&resume) {
            Ok(data) => self.send_ws(OpCode::Resume, data, true),
            Err(error) => warn!(shard_id = self.id, %error, "failed to serialize RESUME"),
        }
    }

    /// Queue a heartbeat carrying the current sequence. `scheduled`
    /// beats clear the ack flag; requested beats do not.
    pub(crate) fn send_heartbeat(&self, scheduled: bool) {
        let seq = self.session.sequence();
        let data = if seq > 0 { json!(seq) } else { Value::Null };
        self.sender.send(OpCode::Heartbeat, data, true);
        self.heartbeat.mark_sent(scheduled);
        self.metrics.inc_heartbeats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, GatewayOptions};
    use osmium_model::Intents;

    fn shard() -> (Shard, flume::Receiver<(u16, Event)>) {
        let (client, events) = Client::new(GatewayOptions::new("secret-token", Intents::GUILDS));
        (Shard::new(0, 1, client), events)
    }

    fn shard_with_intents(intents: Intents) -> (Shard, flume::Receiver<(u16, Event)>) {
        let (client, events) = Client::new(GatewayOptions::new("secret-token", intents));
        (Shard::new(0, 1, client), events)
    }

    #[test]
    fn test_initial_state() {
        let (shard, _events) = shard();
        assert_eq!(shard.status(), ShardStatus::Disconnected);
        assert_eq!(shard.shard_id(), 0);
        assert_eq!(shard.total_shards(), 1);
        assert!(!shard.is_ready());
        assert!(shard.latency().is_none());
    }

    #[test]
    fn test_connect_url_fresh_session() {
        let (shard, _events) = shard();
        let url = shard.connect_url().unwrap();
        assert!(url.as_str().starts_with("wss://gateway.discord.gg/?"));
        assert!(url.as_str().contains("v=10"));
        assert!(url.as_str().contains("encoding="));
        assert!(!url.as_str().contains("compress"));
    }

    #[test]
    fn test_connect_url_prefers_resume_url() {
        let (shard, _events) = shard();
        shard.session.set_session_id(Some("sess".to_owned()));
        shard
            .session
            .set_resume_url(Some("wss://resume.discord.gg/?v=10&encoding=json".to_owned()));

        let url = shard.connect_url().unwrap();
        assert!(url.as_str().starts_with("wss://resume.discord.gg/"));
    }

    #[test]
    fn test_close_policy_invalid_token_is_fatal() {
        let (shard, _events) = shard();
        shard.session.set_session_id(Some("sess".to_owned()));

        let frame = CloseFrame {
            code: WsCloseCode::from(4004),
            reason: "".into(),
        };
        let end = shard.close_policy(Some(frame));

        assert!(shard.session.session_id().is_none());
        match end {
            ConnectionEnd::Fatal { code, reason } => {
                assert_eq!(code, 4004);
                assert_eq!(reason, "Invalid token");
            }
            _ => panic!("4004 must be fatal"),
        }
    }

    #[test]
    fn test_close_policy_invalid_seq_resets_sequence() {
        let (shard, _events) = shard();
        shard.session.set_session_id(Some("sess".to_owned()));
        shard.session.track_sequence(40);

        let frame = CloseFrame {
            code: WsCloseCode::from(4007),
            reason: "".into(),
        };
        let end = shard.close_policy(Some(frame));

        assert_eq!(shard.session.sequence(), 0);
        assert_eq!(shard.session.session_id().as_deref(), Some("sess"));
        assert!(matches!(
            end,
            ConnectionEnd::Reconnect { forced: false, .. }
        ));
    }

    #[test]
    fn test_close_policy_unknown_code_reconnects() {
        let (shard, _events) = shard();
        let end = shard.close_policy(None);
        assert!(matches!(
            end,
            ConnectionEnd::Reconnect {
                forced: false,
                error: Some(GatewayError::Closed { code: 1006, .. }),
            }
        ));
    }

    #[tokio::test]
    async fn test_request_members_validation() {
        let (shard, _events) = shard();

        // All-members request without GUILD_MEMBERS intent.
        let err = shard
            .request_guild_members(Snowflake::new(1), RequestMembersOptions::default())
            .unwrap_err();
        assert!(matches!(err, GatewayError::MissingIntent("GUILD_MEMBERS")));

        // Presences without GUILD_PRESENCES intent.
        let err = shard
            .request_guild_members(
                Snowflake::new(1),
                RequestMembersOptions {
                    query: Some("a".to_owned()),
                    presences: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, GatewayError::MissingIntent("GUILD_PRESENCES")));

        // More than 100 user IDs.
        let ids: Vec<Snowflake> = (0..150).map(Snowflake::new).collect();
        let err = shard
            .request_guild_members(
                Snowflake::new(1),
                RequestMembersOptions {
                    user_ids: Some(ids),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_request_members_installs_nonce() {
        let (shard, _events) = shard_with_intents(Intents::GUILDS | Intents::GUILD_MEMBERS);
        let _rx = shard
            .request_guild_members(Snowflake::new(1), RequestMembersOptions::default())
            .unwrap();
        assert_eq!(shard.member_requests.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_tick_missed_ack() {
        let (shard, _events) = shard();
        shard.session.set_status(ShardStatus::Ready);
        shard.heartbeat.mark_sent(true); // unacked

        let mut next_beat = Instant::now();
        let flow = shard.heartbeat_tick(&mut next_beat, Duration::from_secs(41));
        match flow {
            Flow::End(ConnectionEnd::Reconnect {
                forced,
                error: Some(GatewayError::MissedHeartbeatAck),
            }) => assert!(forced),
            _ => panic!("expected missed-ack reconnect"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_suppressed_while_identifying() {
        let (shard, _events) = shard();
        shard.session.set_status(ShardStatus::Identifying);
        shard.heartbeat.mark_sent(true); // unacked, but suppressed states skip the check

        let mut next_beat = Instant::now();
        let flow = shard.heartbeat_tick(&mut next_beat, Duration::from_secs(41));
        assert!(matches!(flow, Flow::Continue));
        assert!(next_beat > Instant::now());
    }

    #[tokio::test]
    async fn test_second_run_rejected() {
        let (shard, events) = shard();
        let shard = Arc::new(shard);

        shard.running.store(true, Ordering::SeqCst);
        let err = shard.run().await.unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyConnected));

        let (_, event) = events.try_recv().unwrap();
        assert!(matches!(
            event,
            Event::ShardError(GatewayError::AlreadyConnected)
        ));
    }

    #[test]
    fn test_teardown_resolves_member_requests() {
        let (shard, _events) = shard();
        let (tx, mut rx) = oneshot::channel();
        shard.member_requests.insert("n".to_owned(), tx);

        shard.teardown();
        assert!(shard.member_requests.is_empty());
        assert_eq!(rx.try_recv().unwrap().len(), 0);
    }
}

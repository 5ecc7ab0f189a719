use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::audit::AuditEmitter;
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::errors::{CoreError, CoreResult};
use crate::events::ServerEvent;
use crate::fanout::{FanoutEngine, ListenerSink};
use crate::ids::{ChannelId, DeviceToken, SessionId, UserId};
use crate::model::{
    ChannelInfo, ChannelType, DeviceDescriptor, Participant, StartTransmissionParams,
    TerminationReason, TransmissionSummary,
};
use crate::participants::ParticipantRegistry;
use crate::session::TransmissionSession;

/// Join outcome handed back to the caller (§4.D.1): the current roster
/// plus whether a transmission is already in progress.
pub struct JoinOutcome {
    pub participant: Participant,
    pub roster: Vec<Participant>,
    pub active_transmission: Option<SessionId>,
}

pub struct ChunkAck {
    pub next_expected_sequence: u64,
}

enum Command {
    Join {
        user_id: UserId,
        username: String,
        device_token: DeviceToken,
        descriptor: DeviceDescriptor,
        reply: oneshot::Sender<CoreResult<JoinOutcome>>,
    },
    Leave {
        device_token: DeviceToken,
        reply: oneshot::Sender<CoreResult<()>>,
    },
    AttachSocket {
        device_token: DeviceToken,
        sink: Arc<dyn ListenerSink>,
        reply: oneshot::Sender<CoreResult<()>>,
    },
    DetachSocket {
        device_token: DeviceToken,
    },
    Touch {
        device_token: DeviceToken,
    },
    Pong {
        device_token: DeviceToken,
    },
    StartTransmission {
        user_id: UserId,
        device_token: DeviceToken,
        params: StartTransmissionParams,
        reply: oneshot::Sender<CoreResult<SessionId>>,
    },
    SubmitChunk {
        device_token: DeviceToken,
        sequence: u64,
        payload_b64: String,
        reported_size: usize,
        reply: oneshot::Sender<CoreResult<ChunkAck>>,
    },
    EndTransmission {
        device_token: DeviceToken,
        total_duration_ms: i64,
        reply: oneshot::Sender<CoreResult<TransmissionSummary>>,
    },
    /// Fires when a per-session deadline timer (armed at
    /// `start_transmission` time) elapses. Carries the session it was
    /// armed for so a timer left over from an already-ended session can't
    /// force-close a newer one.
    DeadlineFired {
        session_id: SessionId,
    },
    IdleTick,
    Shutdown,
    /// For tests: returns whether the channel has zero participants and
    /// no active session, the eviction predicate the Router consumes.
    IsEvictable {
        reply: oneshot::Sender<bool>,
    },
}

/// Component D. One dedicated task per channel owns all of this state;
/// every mutating operation is a message processed to completion before
/// the next begins (§4.D, §5) — an actor, not a mutex.
struct CoordinatorState {
    channel_uuid: ChannelId,
    channel_info: ChannelInfo,
    cfg: CoreConfig,
    clock: Arc<dyn Clock>,
    participants: ParticipantRegistry,
    active_session: Option<TransmissionSession>,
    fanout: Arc<FanoutEngine>,
    audit: Arc<AuditEmitter>,
    last_activity: i64,
    /// Sender looping back to this Coordinator's own command queue, so
    /// handlers can arm a timer (e.g. the transmission deadline) that
    /// delivers itself as a future command rather than being polled
    /// reactively.
    self_tx: mpsc::UnboundedSender<Command>,
}

/// Clonable handle to a running Coordinator task. Holding a handle is
/// cheap: it is just an `mpsc::Sender`.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    /// Spawns the Coordinator task and its idle-sweep timer (§4.D.8,
    /// §4.G). `channel_info` is resolved once at materialization time by
    /// the Router via the catalog collaborator (§6.2).
    pub fn spawn(
        channel_info: ChannelInfo,
        cfg: CoreConfig,
        clock: Arc<dyn Clock>,
        fanout: Arc<FanoutEngine>,
        audit: Arc<AuditEmitter>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let sweep_interval = cfg.idle_sweep_interval();
        let sweep_tx = tx.clone();

        let state = CoordinatorState {
            channel_uuid: channel_info.uuid.clone(),
            channel_info,
            cfg,
            last_activity: clock.now_ms(),
            clock,
            participants: ParticipantRegistry::new(),
            active_session: None,
            fanout,
            audit,
            self_tx: tx.clone(),
        };

        tokio::spawn(run_loop(state, rx));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                if sweep_tx.send(Command::IdleTick).is_err() {
                    return;
                }
            }
        });

        Self { tx }
    }

    pub async fn join(
        &self,
        user_id: UserId,
        username: String,
        device_token: DeviceToken,
        descriptor: DeviceDescriptor,
    ) -> CoreResult<JoinOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Join {
            user_id,
            username,
            device_token,
            descriptor,
            reply,
        })?;
        await_reply(rx).await
    }

    pub async fn leave(&self, device_token: DeviceToken) -> CoreResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Leave { device_token, reply })?;
        await_reply(rx).await
    }

    pub async fn attach_socket(
        &self,
        device_token: DeviceToken,
        sink: Arc<dyn ListenerSink>,
    ) -> CoreResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AttachSocket {
            device_token,
            sink,
            reply,
        })?;
        await_reply(rx).await
    }

    pub fn detach_socket(&self, device_token: DeviceToken) {
        let _ = self.tx.send(Command::DetachSocket { device_token });
    }

    pub fn touch(&self, device_token: DeviceToken) {
        let _ = self.tx.send(Command::Touch { device_token });
    }

    /// Replies `pong` directly to the pinging device's own socket (§6.4:
    /// "server replies pong"), never broadcast to other listeners.
    pub fn pong(&self, device_token: DeviceToken) {
        let _ = self.tx.send(Command::Pong { device_token });
    }

    pub async fn start_transmission(
        &self,
        user_id: UserId,
        device_token: DeviceToken,
        params: StartTransmissionParams,
    ) -> CoreResult<SessionId> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StartTransmission {
            user_id,
            device_token,
            params,
            reply,
        })?;
        await_reply(rx).await
    }

    pub async fn submit_chunk(
        &self,
        device_token: DeviceToken,
        sequence: u64,
        payload_b64: String,
        reported_size: usize,
    ) -> CoreResult<ChunkAck> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SubmitChunk {
            device_token,
            sequence,
            payload_b64,
            reported_size,
            reply,
        })?;
        await_reply(rx).await
    }

    pub async fn end_transmission(
        &self,
        device_token: DeviceToken,
        total_duration_ms: i64,
    ) -> CoreResult<TransmissionSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::EndTransmission {
            device_token,
            total_duration_ms,
            reply,
        })?;
        await_reply(rx).await
    }

    pub async fn is_evictable(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::IsEvictable { reply }).is_err() {
            return true;
        }
        rx.await.unwrap_or(true)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    fn send(&self, cmd: Command) -> CoreResult<()> {
        self.tx
            .send(cmd)
            .map_err(|_| CoreError::FatalChannel("coordinator task is gone".into()))
    }
}

async fn await_reply<T>(rx: oneshot::Receiver<CoreResult<T>>) -> CoreResult<T> {
    rx.await
        .map_err(|_| CoreError::FatalChannel("coordinator dropped reply channel".into()))?
}

async fn run_loop(mut state: CoordinatorState, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Join {
                user_id,
                username,
                device_token,
                descriptor,
                reply,
            } => {
                let result = state.handle_join(user_id, username, device_token, descriptor).await;
                let _ = reply.send(result);
            }
            Command::Leave { device_token, reply } => {
                let result = state.handle_leave(device_token).await;
                let _ = reply.send(result);
            }
            Command::AttachSocket {
                device_token,
                sink,
                reply,
            } => {
                let result = state.handle_attach_socket(device_token, sink).await;
                let _ = reply.send(result);
            }
            Command::DetachSocket { device_token } => {
                state.fanout.detach(&device_token).await;
            }
            Command::Touch { device_token } => {
                let now = state.clock.now_ms();
                state.participants.touch(state.clock.as_ref(), &device_token);
                state.last_activity = now;
            }
            Command::Pong { device_token } => {
                let now = state.clock.now_ms();
                state
                    .fanout
                    .broadcast(&[device_token], &ServerEvent::Pong { timestamp: now })
                    .await;
            }
            Command::StartTransmission {
                user_id,
                device_token,
                params,
                reply,
            } => {
                let result = state.handle_start_transmission(user_id, device_token, params).await;
                let _ = reply.send(result);
            }
            Command::SubmitChunk {
                device_token,
                sequence,
                payload_b64,
                reported_size,
                reply,
            } => {
                let result = state
                    .handle_submit_chunk(device_token, sequence, payload_b64, reported_size)
                    .await;
                let _ = reply.send(result);
            }
            Command::EndTransmission {
                device_token,
                total_duration_ms,
                reply,
            } => {
                let result = state
                    .handle_end_transmission(device_token, total_duration_ms, TerminationReason::ClientEnd)
                    .await;
                let _ = reply.send(result);
            }
            Command::DeadlineFired { session_id } => {
                let still_current = state
                    .active_session
                    .as_ref()
                    .map(|s| s.session_id == session_id)
                    .unwrap_or(false);
                if still_current {
                    let now = state.clock.now_ms();
                    state.fire_deadline(now).await;
                }
            }
            Command::IdleTick => {
                state.handle_idle_tick().await;
            }
            Command::IsEvictable { reply } => {
                let now = state.clock.now_ms();
                let idle_long_enough = now - state.last_activity >= state.cfg.coordinator_evict_ms as i64;
                let evictable = state.participants.is_empty()
                    && state.active_session.is_none()
                    && idle_long_enough;
                let _ = reply.send(evictable);
            }
            Command::Shutdown => {
                state.handle_shutdown().await;
                return;
            }
        }
    }
}

impl CoordinatorState {
    fn other_listeners(&self, exclude: &DeviceToken) -> Vec<DeviceToken> {
        self.participants.all_except(exclude)
    }

    async fn handle_join(
        &mut self,
        user_id: UserId,
        username: String,
        device_token: DeviceToken,
        descriptor: DeviceDescriptor,
    ) -> CoreResult<JoinOutcome> {
        let now = self.clock.now_ms();
        let participant = self.participants.join(
            self.clock.as_ref(),
            user_id.clone(),
            username.clone(),
            device_token.clone(),
            descriptor,
            self.channel_info.max_participants,
        )?;
        self.last_activity = now;

        self.fanout
            .broadcast(
                &self.other_listeners(&device_token),
                &ServerEvent::ParticipantJoin {
                    user_id,
                    username,
                    timestamp: now,
                },
            )
            .await;

        info!(channel_uuid = %self.channel_uuid, device_token = %device_token, "participant joined");

        Ok(JoinOutcome {
            participant,
            roster: self.participants.snapshot(),
            active_transmission: self.active_session.as_ref().map(|s| s.session_id.clone()),
        })
    }

    async fn handle_leave(&mut self, device_token: DeviceToken) -> CoreResult<()> {
        let participant = self.participants.leave(&device_token)?;
        let now = self.clock.now_ms();
        self.last_activity = now;
        self.fanout.detach(&device_token).await;

        let owns_active_session = self
            .active_session
            .as_ref()
            .map(|s| s.owner_device_token == device_token)
            .unwrap_or(false);

        if owns_active_session {
            self.close_active_session(now, TerminationReason::OwnerDisconnect).await;
        }

        self.fanout
            .broadcast(
                &self.other_listeners(&device_token),
                &ServerEvent::ParticipantLeave {
                    user_id: participant.user_id,
                    timestamp: now,
                },
            )
            .await;

        debug!(channel_uuid = %self.channel_uuid, device_token = %device_token, "participant left");
        Ok(())
    }

    async fn handle_attach_socket(
        &mut self,
        device_token: DeviceToken,
        sink: Arc<dyn ListenerSink>,
    ) -> CoreResult<()> {
        if self.participants.get(&device_token).is_none() {
            return Err(CoreError::UnknownParticipant);
        }
        self.fanout.attach(device_token, sink).await;
        Ok(())
    }

    async fn handle_start_transmission(
        &mut self,
        user_id: UserId,
        device_token: DeviceToken,
        params: StartTransmissionParams,
    ) -> CoreResult<SessionId> {
        let participant = self
            .participants
            .get(&device_token)
            .ok_or(CoreError::UnknownParticipant)?;
        if participant.user_id != user_id {
            return Err(CoreError::UnknownParticipant);
        }
        if self.active_session.is_some() {
            return Err(CoreError::Busy);
        }
        if params.is_emergency && self.channel_info.channel_type != ChannelType::Emergency {
            return Err(CoreError::ForbiddenEmergency);
        }
        if params.sample_rate < self.cfg.sample_rate_min_hz || params.sample_rate > self.cfg.sample_rate_max_hz {
            return Err(CoreError::Validation("sample_rate outside configured envelope"));
        }
        if params.bitrate < self.cfg.bitrate_min_bps || params.bitrate > self.cfg.bitrate_max_bps {
            return Err(CoreError::Validation("bitrate outside configured envelope"));
        }

        let now = self.clock.now_ms();
        let session_id = crate::ids::IdGenerator::session_id();
        let listener_count_at_start = self.participants.len().saturating_sub(1);
        let is_emergency = params.is_emergency;
        let audio_format = params.audio_format;

        let session = TransmissionSession::new(
            session_id.clone(),
            self.channel_uuid.clone(),
            user_id.clone(),
            device_token.clone(),
            now,
            params,
            listener_count_at_start,
            &self.cfg,
        );
        let deadline = session.deadline;
        self.active_session = Some(session);
        self.last_activity = now;
        self.arm_deadline_timer(session_id.clone(), now, deadline);

        self.fanout
            .broadcast(
                &self.other_listeners(&device_token),
                &ServerEvent::TransmissionStarted {
                    session_id: session_id.clone(),
                    user_id,
                    username: participant.username.clone(),
                    audio_format,
                    is_emergency,
                    timestamp: now,
                },
            )
            .await;

        info!(channel_uuid = %self.channel_uuid, session_id = %session_id, "transmission started");
        Ok(session_id)
    }

    async fn handle_submit_chunk(
        &mut self,
        device_token: DeviceToken,
        sequence: u64,
        payload_b64: String,
        reported_size: usize,
    ) -> CoreResult<ChunkAck> {
        let now = self.clock.now_ms();
        let cfg = self.cfg.clone();

        let session = self.active_session.as_mut().ok_or(CoreError::NoSession)?;
        if session.owner_device_token != device_token {
            return Err(CoreError::NotOwner);
        }

        if session.is_past_deadline(now) {
            self.fire_deadline(now).await;
            return Err(CoreError::NoSession);
        }

        let is_emergency = session.is_emergency;
        let session_id = session.session_id.clone();
        let result = session.accept_chunk(now, sequence, payload_b64, reported_size, &cfg)?;
        self.last_activity = now;

        if !result.drained.is_empty() {
            let listeners = self.other_listeners(&device_token);
            for chunk in &result.drained {
                self.fanout
                    .broadcast(
                        &listeners,
                        &ServerEvent::AudioChunk {
                            session_id: session_id.clone(),
                            sequence: chunk.sequence,
                            audio_data: chunk.payload_b64.clone(),
                            timestamp: chunk.received_at,
                            size_bytes: chunk.size_bytes,
                            is_emergency: is_emergency.then_some(true),
                        },
                    )
                    .await;
            }
        }

        Ok(ChunkAck {
            next_expected_sequence: result.next_expected,
        })
    }

    async fn handle_end_transmission(
        &mut self,
        device_token: DeviceToken,
        _total_duration_ms: i64,
        reason: TerminationReason,
    ) -> CoreResult<TransmissionSummary> {
        {
            let session = self.active_session.as_ref().ok_or(CoreError::NoSession)?;
            if session.owner_device_token != device_token {
                return Err(CoreError::NotOwner);
            }
        }

        let now = self.clock.now_ms();
        let record = self.close_active_session(now, reason).await.expect("session verified present above");

        Ok(TransmissionSummary {
            session_id: record.session_id,
            duration_ms: record.duration_ms,
            chunks_count: record.chunks_count,
            total_bytes: record.total_bytes,
            reason: record.termination_reason,
        })
    }

    /// Tears down `active_session` (if any), broadcasts
    /// `transmission_ended`, and hands the record to the audit emitter.
    /// Returns the record so callers that need summary fields can reuse
    /// it without re-deriving anything.
    async fn close_active_session(
        &mut self,
        now: i64,
        reason: TerminationReason,
    ) -> Option<crate::model::AuditRecord> {
        let session = self.active_session.take()?;
        let owner_device_token = session.owner_device_token.clone();
        let owner_user_id = session.owner_user_id.clone();
        let record = session.close(now, reason);

        self.fanout
            .broadcast(
                &self.other_listeners(&owner_device_token),
                &ServerEvent::TransmissionEnded {
                    session_id: record.session_id.clone(),
                    user_id: owner_user_id,
                    duration: record.duration_ms,
                    total_chunks: record.chunks_count,
                    total_bytes: record.total_bytes,
                    timestamp: now,
                    reason,
                },
            )
            .await;

        self.audit.emit(record.clone());
        self.last_activity = now;
        Some(record)
    }

    /// Schedules a timer that delivers `DeadlineFired` to this
    /// Coordinator's own queue once `deadline` elapses (§4.D.3: "schedules
    /// a timer at `deadline`"), so a transmitter that goes silent without
    /// disconnecting is force-closed promptly rather than waiting for the
    /// next idle-sweep tick.
    fn arm_deadline_timer(&self, session_id: SessionId, now: i64, deadline: i64) {
        let remaining = (deadline - now).max(0) as u64;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(remaining)).await;
            let _ = tx.send(Command::DeadlineFired { session_id });
        });
    }

    async fn fire_deadline(&mut self, now: i64) {
        if self.active_session.is_some() {
            warn!(channel_uuid = %self.channel_uuid, "transmission deadline reached");
            self.close_active_session(now, TerminationReason::Deadline).await;
        }
    }

    async fn handle_idle_tick(&mut self) {
        let now = self.clock.now_ms();

        if let Some(session) = self.active_session.as_mut() {
            session.expire_old_chunks(now);
            if session.is_past_deadline(now) {
                self.fire_deadline(now).await;
            }
        }

        let idle = self.participants.expired(now, self.cfg.idle_participant_ms);
        for device_token in idle {
            if let Ok(participant) = self.participants.leave(&device_token) {
                self.fanout.detach(&device_token).await;
                let owns_active_session = self
                    .active_session
                    .as_ref()
                    .map(|s| s.owner_device_token == device_token)
                    .unwrap_or(false);
                if owns_active_session {
                    self.close_active_session(now, TerminationReason::OwnerDisconnect).await;
                }
                self.fanout
                    .broadcast(
                        &self.other_listeners(&device_token),
                        &ServerEvent::ParticipantLeave {
                            user_id: participant.user_id,
                            timestamp: now,
                        },
                    )
                    .await;
            }
        }
    }

    async fn handle_shutdown(&mut self) {
        let now = self.clock.now_ms();
        self.close_active_session(now, TerminationReason::ChannelShutdown).await;

        let all = self.participants.all();
        self.fanout
            .broadcast(&all, &ServerEvent::ChannelClosing { timestamp: now })
            .await;
        for device_token in all {
            self.fanout.detach(&device_token).await;
        }
        info!(channel_uuid = %self.channel_uuid, "channel shut down");
    }
}

use apertus_event_system::{
    core_events, current_timestamp, decode_payload, EventBus, Plugin, PluginBase, PluginError,
};
use parking_lot::Mutex;
use replication::{
    AudioReplica, PlaybackStateReplica, PlaybackStatus, ReplicaError, ReplicaId, ReplicaService,
    ReplicaType,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const PLUGIN_NAME: &str = "playback";

// ============================================================================
// Event payloads
// ============================================================================

/// Payload of [`core_events::PLAY_AUDIO`].
///
/// A payload that is not JSON is taken as a bare stream URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayAudioRequest {
    pub stream_url: String,
    #[serde(default)]
    pub volume: Option<f32>,
    /// Playback finishes once the position reaches this many seconds
    #[serde(default)]
    pub duration_secs: Option<f32>,
}

impl PlayAudioRequest {
    fn parse(payload: &str) -> Self {
        decode_payload(payload).unwrap_or_else(|_| Self {
            stream_url: payload.trim().to_string(),
            volume: None,
            duration_secs: None,
        })
    }
}

/// Payload of every playback notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackNotification {
    pub stream_url: String,
    pub status: PlaybackStatus,
    pub position_ms: u64,
    pub timestamp: u64,
}

/// Payload of [`core_events::PLAYBACK_ERROR`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackErrorEvent {
    pub error: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Owner written into the replicas' allocation ids
    pub owner_id: String,
    /// How often the run loop advances the position while playing
    pub tick: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            owner_id: "local".to_string(),
            tick: Duration::from_millis(250),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone)]
struct Session {
    status: PlaybackStatus,
    stream_url: String,
    position: f32,
    duration: Option<f32>,
}

/// State shared between the inbox handlers and the run loop.
struct PlaybackController {
    events: Arc<EventBus>,
    replicas: Arc<ReplicaService>,
    audio_id: ReplicaId,
    state_id: ReplicaId,
    session: Mutex<Session>,
}

fn replica_failure(e: ReplicaError) -> PluginError {
    PluginError::ExecutionError(format!("replication failed: {}", e))
}

impl PlaybackController {
    fn play(&self, request: PlayAudioRequest) -> Result<(), PluginError> {
        if request.stream_url.is_empty() {
            self.events.trigger_json(
                core_events::PLAYBACK_ERROR,
                &PlaybackErrorEvent {
                    error: "PlayAudio without a stream URL".to_string(),
                    timestamp: current_timestamp(),
                },
            )?;
            return Err(PluginError::ExecutionError(
                "PlayAudio without a stream URL".to_string(),
            ));
        }

        // The session only changes once both replicas carry the new state.
        let mut session = self.session.lock();
        let next = Session {
            status: PlaybackStatus::Playing,
            stream_url: request.stream_url.clone(),
            position: 0.0,
            duration: request.duration_secs,
        };

        self.replicas
            .with_replica_mut::<AudioReplica, _>(self.audio_id, |audio| {
                audio.set_stream_url(request.stream_url.as_str());
                audio.set_playback_position(0.0);
                if let Some(volume) = request.volume {
                    audio.set_volume(volume);
                }
            })
            .map_err(replica_failure)?;
        self.sync(&next)?;
        *session = next;

        info!("🎵 PlaybackPlugin: Playing {}", session.stream_url);
        self.notify(core_events::PLAYBACK_STARTED, &session)?;
        self.notify(core_events::PLAYBACK_STATE_CHANGED, &session)
    }

    /// Moves from `from` to `to`; anything else is ignored.
    fn transition(&self, from: &[PlaybackStatus], to: PlaybackStatus) -> Result<bool, PluginError> {
        let mut session = self.session.lock();
        if !from.contains(&session.status) {
            debug!(
                "PlaybackPlugin: Ignoring {:?} request while {:?}",
                to, session.status
            );
            return Ok(false);
        }

        let mut next = session.clone();
        next.status = to;
        if to == PlaybackStatus::Stopped {
            next.position = 0.0;
        }
        self.sync(&next)?;
        *session = next;

        info!("🎵 PlaybackPlugin: {:?}", to);
        if to == PlaybackStatus::Stopped {
            self.notify(core_events::PLAYBACK_STOPPED, &session)?;
        }
        self.notify(core_events::PLAYBACK_STATE_CHANGED, &session)?;
        Ok(true)
    }

    /// Advances the position by `elapsed` while playing.
    fn advance(&self, elapsed: Duration) -> Result<(), PluginError> {
        let mut session = self.session.lock();
        if session.status != PlaybackStatus::Playing {
            return Ok(());
        }

        let mut next = session.clone();
        next.position += elapsed.as_secs_f32();
        let finished = next
            .duration
            .map_or(false, |duration| next.position >= duration);
        if finished {
            next.status = PlaybackStatus::Finished;
        }
        self.sync(&next)?;
        *session = next;

        if finished {
            info!("🎵 PlaybackPlugin: Finished {}", session.stream_url);
            self.notify(core_events::PLAYBACK_FINISHED, &session)?;
            self.notify(core_events::PLAYBACK_STATE_CHANGED, &session)?;
        }
        Ok(())
    }

    /// Writes the session into both replicas and sends them.
    fn sync(&self, session: &Session) -> Result<(), PluginError> {
        let position = session.position;
        self.replicas
            .with_replica_mut::<AudioReplica, _>(self.audio_id, |audio| {
                audio.set_playback_position(position)
            })
            .map_err(replica_failure)?;
        self.replicas
            .with_replica_mut::<PlaybackStateReplica, _>(self.state_id, |state| {
                state.set_status(session.status);
                state.set_position_ms((position * 1000.0).round() as u64);
                state.set_stream_id(session.stream_url.as_str());
            })
            .map_err(replica_failure)?;

        for id in [self.audio_id, self.state_id] {
            self.replicas.send_replica_by_id(id).map_err(replica_failure)?;
        }
        Ok(())
    }

    fn notify(&self, event_name: &str, session: &Session) -> Result<(), PluginError> {
        self.events.trigger_json(
            event_name,
            &PlaybackNotification {
                stream_url: session.stream_url.clone(),
                status: session.status,
                position_ms: (session.position * 1000.0).round() as u64,
                timestamp: current_timestamp(),
            },
        )?;
        Ok(())
    }
}

// ============================================================================
// Plugin
// ============================================================================

/// Reacts to `PlayAudio`, `PauseAudio`, `ResumeAudio` and `StopAudio`,
/// keeping an [`AudioReplica`] and a [`PlaybackStateReplica`] in sync with the
/// current session.
pub struct PlaybackPlugin {
    base: PluginBase,
    tick: Duration,
    controller: Arc<PlaybackController>,
}

impl PlaybackPlugin {
    /// Creates the plugin and registers its two replicas with `replicas`.
    /// Both replica types must already be registered in the service's
    /// factory. On error no replica is left behind in the service.
    pub fn new(
        events: Arc<EventBus>,
        replicas: Arc<ReplicaService>,
        config: PlaybackConfig,
    ) -> Result<Self, PluginError> {
        let base = PluginBase::new(PLUGIN_NAME, events.clone())?;

        let create = |type_tag: &str, name: &str| {
            replicas
                .create_replica(type_tag, name, true, &config.owner_id, true)
                .map_err(|e| PluginError::InitializationFailed(e.to_string()))
        };
        let audio_id = create(AudioReplica::TYPE_TAG, "playback-audio")?;
        let state_id = match create(PlaybackStateReplica::TYPE_TAG, "playback-state") {
            Ok(id) => id,
            Err(e) => {
                replicas.remove_replica(audio_id);
                return Err(e);
            }
        };
        debug!(
            "🎵 PlaybackPlugin: Creating new instance (audio {}, state {})",
            audio_id, state_id
        );

        Ok(Self {
            base,
            tick: config.tick,
            controller: Arc::new(PlaybackController {
                events,
                replicas,
                audio_id,
                state_id,
                session: Mutex::new(Session {
                    status: PlaybackStatus::Idle,
                    stream_url: String::new(),
                    position: 0.0,
                    duration: None,
                }),
            }),
        })
    }

    pub fn audio_id(&self) -> ReplicaId {
        self.controller.audio_id
    }

    pub fn state_id(&self) -> ReplicaId {
        self.controller.state_id
    }

    pub fn status(&self) -> PlaybackStatus {
        self.controller.session.lock().status
    }

    /// Current position in seconds.
    pub fn position(&self) -> f32 {
        self.controller.session.lock().position
    }
}

impl Plugin for PlaybackPlugin {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn init(&self) -> Result<(), PluginError> {
        let controller = self.controller.clone();
        self.base.subscribe(core_events::PLAY_AUDIO, move |payload| {
            controller.play(PlayAudioRequest::parse(payload))
        })?;

        let controller = self.controller.clone();
        self.base.subscribe(core_events::PAUSE_AUDIO, move |_| {
            controller
                .transition(&[PlaybackStatus::Playing], PlaybackStatus::Paused)
                .map(|_| ())
        })?;

        let controller = self.controller.clone();
        self.base.subscribe(core_events::RESUME_AUDIO, move |_| {
            controller
                .transition(&[PlaybackStatus::Paused], PlaybackStatus::Playing)
                .map(|_| ())
        })?;

        let controller = self.controller.clone();
        self.base.subscribe(core_events::STOP_AUDIO, move |_| {
            controller
                .transition(
                    &[PlaybackStatus::Playing, PlaybackStatus::Paused],
                    PlaybackStatus::Stopped,
                )
                .map(|_| ())
        })?;

        info!("🎵 PlaybackPlugin: ✅ Handlers registered");
        Ok(())
    }

    fn run(&self) -> Result<(), PluginError> {
        let tick = self.tick;
        self.base.run_until_destroyed(tick, || {
            if let Err(e) = self.controller.advance(tick) {
                warn!("🎵 PlaybackPlugin: Failed to advance playback: {}", e);
            }
            Ok(())
        })
    }

    fn destroy(&self) {
        self.base.destroy();
    }

    fn execution_identity(&self) -> Option<ThreadId> {
        self.base.execution_identity()
    }
}

//! Local media tracks and what each peer link sends.
//!
//! The controller never touches a device itself. Every operation returns
//! [`MediaStep`]s: device work for the backend, track changes that apply to
//! every peer link, and the signaling message that tells the room about the
//! new state. Peers learn about mute and camera-off from those messages,
//! never from the media itself.

use std::fmt;

use signaling_protocol::messages::{StartScreenShare, ToggleCamera, ToggleMic};
use signaling_protocol::ClientMessage;
use tracing::debug;

/// Backend-assigned handle for one local capture track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(String);

impl TrackId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outgoing sender slots on a peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackSlot {
    Microphone,
    /// Camera, or the screen while sharing.
    Video,
    ScreenAudio,
}

impl TrackSlot {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TrackSlot::Microphone => "microphone",
            TrackSlot::Video => "video",
            TrackSlot::ScreenAudio => "screen-audio",
        }
    }
}

/// What disabling a track does to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrackPolicy {
    /// Keep the device open and flip the track's enabled flag.
    #[default]
    Mute,
    /// Stop the device; acquire it again on enable.
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaSource {
    Microphone,
    Camera,
    Screen { with_audio: bool },
}

/// Tracks handed back by the backend after an acquisition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquiredTracks {
    pub audio: Option<TrackId>,
    pub video: Option<TrackId>,
}

impl AcquiredTracks {
    #[must_use]
    pub fn audio(track: impl Into<TrackId>) -> Self {
        Self {
            audio: Some(track.into()),
            video: None,
        }
    }

    #[must_use]
    pub fn video(track: impl Into<TrackId>) -> Self {
        Self {
            audio: None,
            video: Some(track.into()),
        }
    }
}

/// A change every peer link must apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackChange {
    /// Swap the track on an existing sender. Never renegotiates when the
    /// sender exists; adds one (and renegotiates) when it does not.
    Replace { slot: TrackSlot, track: Option<TrackId> },
    /// New sender; renegotiates.
    Add { slot: TrackSlot, track: TrackId },
    /// Drop the sender; renegotiates.
    Remove { slot: TrackSlot },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaStep {
    Acquire(MediaSource),
    SetEnabled { track: TrackId, enabled: bool },
    Stop(TrackId),
    Links(TrackChange),
    Notify(ClientMessage),
}

/// Owns the local capture tracks.
#[derive(Debug)]
pub struct MediaTrackController {
    policy: TrackPolicy,
    microphone: Option<TrackId>,
    camera: Option<TrackId>,
    screen: Option<TrackId>,
    screen_audio: Option<TrackId>,
    audio_enabled: bool,
    video_enabled: bool,
    screen_requested: bool,
}

impl MediaTrackController {
    #[must_use]
    pub fn new(policy: TrackPolicy) -> Self {
        Self {
            policy,
            microphone: None,
            camera: None,
            screen: None,
            screen_audio: None,
            audio_enabled: true,
            video_enabled: true,
            screen_requested: false,
        }
    }

    #[must_use]
    pub fn policy(&self) -> TrackPolicy {
        self.policy
    }

    #[must_use]
    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    #[must_use]
    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    #[must_use]
    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    #[must_use]
    pub fn microphone(&self) -> Option<&TrackId> {
        self.microphone.as_ref()
    }

    #[must_use]
    pub fn camera(&self) -> Option<&TrackId> {
        self.camera.as_ref()
    }

    #[must_use]
    pub fn screen(&self) -> Option<&TrackId> {
        self.screen.as_ref()
    }

    /// Track the video sender should carry right now.
    #[must_use]
    pub fn outgoing_video(&self) -> Option<&TrackId> {
        self.screen
            .as_ref()
            .or(self.camera.as_ref().filter(|_| self.video_enabled))
    }

    /// Senders a freshly created link starts with.
    #[must_use]
    pub fn outgoing_tracks(&self) -> Vec<(TrackSlot, TrackId)> {
        let mut tracks = Vec::new();
        if let Some(mic) = &self.microphone {
            tracks.push((TrackSlot::Microphone, mic.clone()));
        }
        if let Some(video) = self.outgoing_video() {
            tracks.push((TrackSlot::Video, video.clone()));
        }
        if let Some(audio) = &self.screen_audio {
            tracks.push((TrackSlot::ScreenAudio, audio.clone()));
        }
        tracks
    }

    /// Open microphone and camera.
    #[must_use]
    pub fn request_local_media(&self) -> Vec<MediaStep> {
        vec![
            MediaStep::Acquire(MediaSource::Microphone),
            MediaStep::Acquire(MediaSource::Camera),
        ]
    }

    pub fn media_acquired(&mut self, source: MediaSource, tracks: AcquiredTracks) -> Vec<MediaStep> {
        let mut steps = Vec::new();
        match source {
            MediaSource::Microphone => {
                let Some(track) = tracks.audio else {
                    return steps;
                };
                if let Some(old) = self.microphone.replace(track.clone()) {
                    steps.push(MediaStep::Stop(old));
                }
                if !self.audio_enabled {
                    steps.push(MediaStep::SetEnabled {
                        track: track.clone(),
                        enabled: false,
                    });
                }
                steps.push(MediaStep::Links(TrackChange::Replace {
                    slot: TrackSlot::Microphone,
                    track: Some(track),
                }));
            }
            MediaSource::Camera => {
                let Some(track) = tracks.video else {
                    return steps;
                };
                if let Some(old) = self.camera.replace(track.clone()) {
                    steps.push(MediaStep::Stop(old));
                }
                if !self.video_enabled {
                    if self.policy == TrackPolicy::Release {
                        // Disabled while the device was opening.
                        self.camera = None;
                        steps.push(MediaStep::Stop(track));
                        return steps;
                    }
                    steps.push(MediaStep::SetEnabled {
                        track: track.clone(),
                        enabled: false,
                    });
                }
                if self.screen.is_none() {
                    steps.push(MediaStep::Links(TrackChange::Replace {
                        slot: TrackSlot::Video,
                        track: self.outgoing_video().cloned(),
                    }));
                }
            }
            MediaSource::Screen { .. } => {
                if !self.screen_requested {
                    debug!(target: "negotiation.engine", "Screen capture arrived after cancel");
                    steps.extend(tracks.video.into_iter().map(MediaStep::Stop));
                    steps.extend(tracks.audio.into_iter().map(MediaStep::Stop));
                    return steps;
                }
                self.screen_requested = false;
                let Some(video) = tracks.video else {
                    return steps;
                };
                self.screen = Some(video.clone());
                steps.push(MediaStep::Links(TrackChange::Replace {
                    slot: TrackSlot::Video,
                    track: Some(video.clone()),
                }));
                if let Some(audio) = tracks.audio {
                    self.screen_audio = Some(audio.clone());
                    steps.push(MediaStep::Links(TrackChange::Add {
                        slot: TrackSlot::ScreenAudio,
                        track: audio,
                    }));
                }
                steps.push(MediaStep::Notify(ClientMessage::StartScreenShare(
                    StartScreenShare {
                        stream_id: Some(video.to_string()),
                    },
                )));
            }
        }
        steps
    }

    /// Acquisition failed. Only a pending screen request needs unwinding.
    pub fn media_unavailable(&mut self, source: MediaSource) {
        if matches!(source, MediaSource::Screen { .. }) {
            self.screen_requested = false;
        }
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) -> Vec<MediaStep> {
        let mut steps = Vec::new();
        self.audio_enabled = enabled;
        match (self.policy, enabled) {
            (TrackPolicy::Mute, _) => {
                if let Some(mic) = &self.microphone {
                    steps.push(MediaStep::SetEnabled {
                        track: mic.clone(),
                        enabled,
                    });
                }
            }
            (TrackPolicy::Release, false) => {
                if let Some(mic) = self.microphone.take() {
                    steps.push(MediaStep::Stop(mic));
                    steps.push(MediaStep::Links(TrackChange::Replace {
                        slot: TrackSlot::Microphone,
                        track: None,
                    }));
                }
            }
            (TrackPolicy::Release, true) => {
                if self.microphone.is_none() {
                    steps.push(MediaStep::Acquire(MediaSource::Microphone));
                }
            }
        }
        steps.push(MediaStep::Notify(ClientMessage::ToggleMic(ToggleMic {
            is_muted: !enabled,
        })));
        steps
    }

    pub fn set_video_enabled(&mut self, enabled: bool) -> Vec<MediaStep> {
        let mut steps = Vec::new();
        self.video_enabled = enabled;
        match (self.policy, enabled) {
            (TrackPolicy::Mute, _) => {
                if let Some(camera) = &self.camera {
                    steps.push(MediaStep::SetEnabled {
                        track: camera.clone(),
                        enabled,
                    });
                    if enabled && self.screen.is_none() {
                        steps.push(MediaStep::Links(TrackChange::Replace {
                            slot: TrackSlot::Video,
                            track: Some(camera.clone()),
                        }));
                    }
                }
            }
            (TrackPolicy::Release, false) => {
                if let Some(camera) = self.camera.take() {
                    steps.push(MediaStep::Stop(camera));
                    if self.screen.is_none() {
                        steps.push(MediaStep::Links(TrackChange::Replace {
                            slot: TrackSlot::Video,
                            track: None,
                        }));
                    }
                }
            }
            (TrackPolicy::Release, true) => {
                if self.camera.is_none() {
                    steps.push(MediaStep::Acquire(MediaSource::Camera));
                }
            }
        }
        steps.push(MediaStep::Notify(ClientMessage::ToggleCamera(ToggleCamera {
            is_camera_off: !enabled,
        })));
        steps
    }

    /// Ask for a screen source. A second request while one is pending or
    /// active does nothing.
    pub fn start_screen_capture(&mut self, with_audio: bool) -> Vec<MediaStep> {
        if self.screen.is_some() || self.screen_requested {
            return Vec::new();
        }
        self.screen_requested = true;
        vec![MediaStep::Acquire(MediaSource::Screen { with_audio })]
    }

    /// Release the screen and put the camera back on every link (or nothing,
    /// when video is off).
    pub fn stop_screen_capture(&mut self) -> Vec<MediaStep> {
        self.screen_requested = false;
        let Some(screen) = self.screen.take() else {
            return Vec::new();
        };
        let mut steps = vec![MediaStep::Stop(screen)];
        if let Some(audio) = self.screen_audio.take() {
            steps.push(MediaStep::Stop(audio));
            steps.push(MediaStep::Links(TrackChange::Remove {
                slot: TrackSlot::ScreenAudio,
            }));
        }
        steps.push(MediaStep::Links(TrackChange::Replace {
            slot: TrackSlot::Video,
            track: self.outgoing_video().cloned(),
        }));
        steps.push(MediaStep::Notify(ClientMessage::StopScreenShare));
        steps
    }

    /// A capture source stopped outside our control (OS "stop sharing",
    /// unplugged camera).
    pub fn capture_ended(&mut self, track: &TrackId) -> Vec<MediaStep> {
        if self.screen.as_ref() == Some(track) || self.screen_audio.as_ref() == Some(track) {
            return self.stop_screen_capture();
        }
        if self.camera.as_ref() == Some(track) {
            self.camera = None;
            if self.screen.is_none() {
                return vec![MediaStep::Links(TrackChange::Replace {
                    slot: TrackSlot::Video,
                    track: None,
                })];
            }
        } else if self.microphone.as_ref() == Some(track) {
            self.microphone = None;
            return vec![MediaStep::Links(TrackChange::Replace {
                slot: TrackSlot::Microphone,
                track: None,
            })];
        }
        Vec::new()
    }

    /// Stop every device.
    pub fn release_all(&mut self) -> Vec<MediaStep> {
        self.screen_requested = false;
        [
            self.microphone.take(),
            self.camera.take(),
            self.screen.take(),
            self.screen_audio.take(),
        ]
        .into_iter()
        .flatten()
        .map(MediaStep::Stop)
        .collect()
    }
}

//! Local capture. The stream handle is acquired once and then shared
//! read-only by every peer session.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MediaError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: Some(VideoConstraints {
                width: 480,
                height: 480,
            }),
            audio: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub kind: TrackKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<VideoConstraints>,
}

/// Describes a media stream: what a peer advertises and what the far side renders.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: String,
    pub tracks: Vec<TrackInfo>,
}

impl StreamInfo {
    pub fn has(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }
}

/// Handle to the captured local stream. Cloning shares the same stream.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalStream(Arc<StreamInfo>);

impl LocalStream {
    pub fn new(info: StreamInfo) -> Self {
        Self(Arc::new(info))
    }

    pub fn info(&self) -> &StreamInfo {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }
}

/// Media received from the far side of a session.
pub type RemoteStream = StreamInfo;

pub trait MediaSource {
    /// Suspends until the platform grants or refuses capture access.
    fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> impl Future<Output = Result<LocalStream, MediaError>> + Send;
}

/// Capture source that fabricates tracks matching the requested constraints.
/// Used by the headless client and in tests; can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct SyntheticMediaSource {
    label: String,
    failure: Option<MediaError>,
}

impl SyntheticMediaSource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            failure: None,
        }
    }

    pub fn failing(err: MediaError) -> Self {
        Self {
            label: String::new(),
            failure: Some(err),
        }
    }
}

impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalStream, MediaError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let mut tracks = Vec::new();
        if let Some(video) = constraints.video {
            if video.width == 0 || video.height == 0 {
                return Err(MediaError::Unsatisfiable(format!(
                    "video {}x{}",
                    video.width, video.height
                )));
            }
            tracks.push(TrackInfo {
                kind: TrackKind::Video,
                label: format!("{} camera", self.label),
                resolution: Some(video),
            });
        }
        if constraints.audio {
            tracks.push(TrackInfo {
                kind: TrackKind::Audio,
                label: format!("{} microphone", self.label),
                resolution: None,
            });
        }
        if tracks.is_empty() {
            return Err(MediaError::Unsatisfiable("no tracks requested".into()));
        }
        Ok(LocalStream::new(StreamInfo {
            id: Uuid::new_v4().to_string(),
            tracks,
        }))
    }
}

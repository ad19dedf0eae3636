//! Task classification: kind, category, status and admission context.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::UserId;

/// Which pair of queue tables a task occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Download,
    Upload,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Download => f.write_str("download"),
            TaskKind::Upload => f.write_str("upload"),
        }
    }
}

/// Source category of a transfer. Each category has its own size cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Torrent,
    DirectLink,
    VideoSite,
    CloudDownload,
    Newsgroup,
    /// Cloud-to-cloud copy; does not consume local disk.
    Clone,
}

impl Category {
    /// Label used in user-facing limit messages.
    pub fn label(self) -> &'static str {
        match self {
            Category::Torrent => "Torrent",
            Category::DirectLink => "Direct link",
            Category::VideoSite => "Video site",
            Category::CloudDownload => "Cloud",
            Category::Newsgroup => "Newsgroup",
            Category::Clone => "Clone",
        }
    }
}

/// Where the finished transfer ends up.
///
/// Mirror tasks upload to cloud storage; leech tasks upload into the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Mirror,
    Leech,
}

/// Status reported by the engine that owns a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Downloading,
    Uploading,
    QueuedDownload,
    QueuedUpload,
    Seeding,
    Paused,
    Checking,
    Archiving,
    Extracting,
    Converting,
    Splitting,
    Cloning,
}

impl TaskStatus {
    /// Transcode, compress and archive-extract phases.
    pub fn is_cpu_intensive(self) -> bool {
        matches!(
            self,
            TaskStatus::Archiving | TaskStatus::Extracting | TaskStatus::Converting
        )
    }

    /// Actively moving bytes.
    pub fn is_transferring(self) -> bool {
        matches!(self, TaskStatus::Downloading | TaskStatus::Uploading)
    }
}

/// Everything the admission gate needs to know about a task that is not
/// registered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub user: UserId,
    pub category: Category,
    pub destination: Destination,

    /// Owner/sudo users bypass every limit.
    pub trusted: bool,

    /// Number of entries when the request is a video playlist.
    pub playlist_items: Option<usize>,

    /// Archive or extract requested: the volume must hold the data twice.
    pub needs_extra_space: bool,
}

impl TaskContext {
    pub fn new(user: UserId, category: Category, destination: Destination) -> Self {
        Self {
            user,
            category,
            destination,
            trusted: false,
            playlist_items: None,
            needs_extra_space: false,
        }
    }

    pub fn trusted(mut self) -> Self {
        self.trusted = true;
        self
    }

    pub fn with_playlist(mut self, items: usize) -> Self {
        self.playlist_items = Some(items);
        self
    }

    pub fn with_extra_space(mut self) -> Self {
        self.needs_extra_space = true;
        self
    }
}

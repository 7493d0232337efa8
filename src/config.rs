use std::path::PathBuf;
use std::time::Duration;

/// Server/bind configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory served as the static fallback (the game client)
    pub static_dir: String,
    /// Where the durable store snapshot lives
    pub state_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4096,
            static_dir: "static".to_string(),
            state_file: PathBuf::from("parlor-state.json"),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.port);

        let static_dir = std::env::var("STATIC_DIR")
            .ok()
            .and_then(|v| {
                let trimmed = v.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or(defaults.static_dir);

        let state_file = std::env::var("STATE_FILE")
            .ok()
            .and_then(|v| {
                let trimmed = v.trim();
                (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
            })
            .unwrap_or(defaults.state_file);

        Self {
            port,
            static_dir,
            state_file,
        }
    }
}

/// Per-round timing and input limits, shared by every room
#[derive(Debug, Clone)]
pub struct GameTimings {
    /// QUESTION_SUBMIT window (T_question)
    pub question_seconds: u32,
    /// ASK window per question (T_answer)
    pub answer_seconds: u32,
    /// Fixed REVEAL pacing delay; runtime-only, never persisted
    pub reveal_seconds: u32,
    pub max_question_chars: usize,
    pub max_answer_chars: usize,
    pub max_nickname_chars: usize,
    pub max_title_chars: usize,
}

impl Default for GameTimings {
    fn default() -> Self {
        Self {
            question_seconds: 90,
            answer_seconds: 60,
            reveal_seconds: 8,
            max_question_chars: 300,
            max_answer_chars: 500,
            max_nickname_chars: 24,
            max_title_chars: 80,
        }
    }
}

impl GameTimings {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let timings = Self {
            question_seconds: std::env::var("QUESTION_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.question_seconds),
            answer_seconds: std::env::var("ANSWER_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.answer_seconds),
            reveal_seconds: std::env::var("REVEAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.reveal_seconds),
            max_question_chars: std::env::var("MAX_QUESTION_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_question_chars),
            max_answer_chars: std::env::var("MAX_ANSWER_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_answer_chars),
            max_nickname_chars: defaults.max_nickname_chars,
            max_title_chars: defaults.max_title_chars,
        };

        tracing::info!(
            question_seconds = timings.question_seconds,
            answer_seconds = timings.answer_seconds,
            reveal_seconds = timings.reveal_seconds,
            "Game timings loaded"
        );

        timings
    }
}

/// Idle-room sweep configuration
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Rooms idle longer than this are destroyed
    pub room_ttl: Duration,
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            room_ttl: Duration::from_secs(3600),
            interval: Duration::from_secs(60),
        }
    }
}

impl SweepConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let room_ttl = std::env::var("ROOM_TTL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.room_ttl);

        let interval = std::env::var("SWEEP_INTERVAL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.interval);

        Self { room_ttl, interval }
    }
}

/// Archival hook configuration. Unset directory disables archival; room
/// teardown still proceeds.
#[derive(Debug, Clone, Default)]
pub struct ArchiveConfig {
    pub dir: Option<PathBuf>,
}

impl ArchiveConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let dir = std::env::var("ARCHIVE_DIR").ok().and_then(|v| {
            let trimmed = v.trim();
            (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
        });

        if dir.is_none() {
            tracing::info!("ARCHIVE_DIR not set, room archival disabled");
        }

        Self { dir }
    }
}

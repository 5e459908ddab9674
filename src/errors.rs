use crate::types::OutputRole;

/// Result alias used across the recording core
pub type RecordingResult<T> = Result<T, RecordingError>;

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("no recording is in progress")]
    NotRecording,

    #[error("configuration rejected{}: {message}", role_suffix(.role))]
    Configuration {
        role: Option<OutputRole>,
        message: String,
    },

    #[error("write failure on {role} output: {message}")]
    WriteFailure { role: OutputRole, message: String },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("frame sync error: {0}")]
    Sync(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recorder task has shut down")]
    Shutdown,
}

fn role_suffix(role: &Option<OutputRole>) -> String {
    match role {
        Some(role) => format!(" for {role} output"),
        None => String::new(),
    }
}

impl RecordingError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            role: None,
            message: message.into(),
        }
    }

    pub fn output_configuration(role: OutputRole, message: impl Into<String>) -> Self {
        Self::Configuration {
            role: Some(role),
            message: message.into(),
        }
    }

    pub fn write_failure(role: OutputRole, message: impl Into<String>) -> Self {
        Self::WriteFailure {
            role,
            message: message.into(),
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }

    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync(message.into())
    }

    /// True for caller misuse (start while recording, stop while idle)
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::AlreadyRecording | Self::NotRecording)
    }
}

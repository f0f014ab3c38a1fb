use std::path::PathBuf;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    IO(#[from] std::io::Error),

    #[error("could not find `{binary}` in the executable search path")]
    BinaryNotFound { binary: String },

    #[error("failed to start `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// `open` was called on a tunnel that is opening, open or closing.
    #[error("tunnel is already open")]
    AlreadyOpen,

    #[error("tunnel startup timed out after {0:?}")]
    StartupTimeout(Duration),

    #[error("tunnel process exited unexpectedly: {0}")]
    ProcessExit(String),

    // Another ngrok session is occupying the account, usually because ngrok
    // is already running somewhere else.
    #[error("ngrok cannot be started because another simultaneous session is active")]
    AlreadyRunning,

    #[error("ngrok requires a verified account and authtoken")]
    AuthtokenRequired,

    #[error("expected one secure and one insecure tunnel, control API reported {0}")]
    MultipleTunnels(usize),

    /// The tunnel process printed something we do not recognize. The raw text
    /// is kept so it can be reported to the user.
    #[error("tunnel process produced unexpected output: {0}")]
    UnclassifiedProcessOutput(String),

    #[error("the file {0} does not exist")]
    FileDoesNotExist(PathBuf),

    #[error("the path {0} is a directory")]
    FileIsDirectory(PathBuf),

    #[error("the file type of {0} is not supported")]
    FiletypeNotSupported(PathBuf),

    #[error("the tunnel did not expose a secure endpoint")]
    NoSecureEndpoint,

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("messaging API error ({status}): {message}")]
    Messaging { status: u16, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("no phone number known for `{0}`")]
    UnknownRecipient(String),
}

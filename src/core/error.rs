use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,

    GitCommandFailed,
    GitDetachedHead,
    GitRemoteUnrecognized,

    RemoteRequestFailed,
    RemoteBadStatus,
    RemoteInvalidPayload,

    DeploySpawnFailed,
    DeploySignalFailed,
    DeployCancelled,

    InternalIoError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",

            ErrorCode::GitCommandFailed => "git.command_failed",
            ErrorCode::GitDetachedHead => "git.detached_head",
            ErrorCode::GitRemoteUnrecognized => "git.remote_unrecognized",

            ErrorCode::RemoteRequestFailed => "remote.request_failed",
            ErrorCode::RemoteBadStatus => "remote.bad_status",
            ErrorCode::RemoteInvalidPayload => "remote.invalid_payload",

            ErrorCode::DeploySpawnFailed => "deploy.spawn_failed",
            ErrorCode::DeploySignalFailed => "deploy.signal_failed",
            ErrorCode::DeployCancelled => "deploy.cancelled",

            ErrorCode::InternalIoError => "internal.io_error",
        }
    }

    /// Process exit status used when an error of this code ends the program.
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorCode::ConfigInvalidJson
            | ErrorCode::ConfigInvalidValue
            | ErrorCode::ValidationMissingArgument => 2,

            ErrorCode::GitCommandFailed
            | ErrorCode::GitDetachedHead
            | ErrorCode::GitRemoteUnrecognized
            | ErrorCode::RemoteRequestFailed
            | ErrorCode::RemoteBadStatus
            | ErrorCode::RemoteInvalidPayload
            | ErrorCode::DeploySpawnFailed
            | ErrorCode::DeploySignalFailed
            | ErrorCode::DeployCancelled => 20,

            ErrorCode::InternalIoError => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadStatusDetails {
    pub url: String,
    pub status: u16,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        let message = format!("Missing required argument: {}", args.join(", "));
        Self::new(
            ErrorCode::ValidationMissingArgument,
            message,
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let path = path.into();
        let message = format!("Invalid JSON in configuration {}: {}", path, err);
        Self::new(
            ErrorCode::ConfigInvalidJson,
            message,
            to_details(ConfigInvalidJsonDetails {
                path,
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let problem = problem.into();
        let message = format!("Invalid configuration value for '{}': {}", key, problem);
        Self::new(
            ErrorCode::ConfigInvalidValue,
            message,
            to_details(ConfigInvalidValueDetails {
                key,
                value,
                problem,
            }),
        )
    }

    pub fn git_command_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::GitCommandFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
        .retryable()
    }

    pub fn git_detached_head() -> Self {
        Self::new(
            ErrorCode::GitDetachedHead,
            "Working copy is on a detached HEAD; no branch to track",
            Value::Object(serde_json::Map::new()),
        )
        .with_hint("Check out the branch to deploy, e.g. 'git checkout main'")
    }

    pub fn git_remote_unrecognized(url: impl Into<String>) -> Self {
        let url = url.into();
        Self::new(
            ErrorCode::GitRemoteUnrecognized,
            format!("Cannot derive owner/repository from remote URL '{}'", url),
            serde_json::json!({ "url": url }),
        )
        .with_hint("Expected git@host:owner/repo.git or https://host/owner/repo.git")
    }

    pub fn remote_request_failed(err: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::RemoteRequestFailed,
            format!("Request to hosting API failed: {}", err),
            serde_json::json!({ "error": err.to_string() }),
        )
        .retryable()
    }

    pub fn remote_bad_status(url: impl Into<String>, status: u16) -> Self {
        Self::new(
            ErrorCode::RemoteBadStatus,
            format!("Hosting API returned HTTP {}", status),
            to_details(BadStatusDetails {
                url: url.into(),
                status,
            }),
        )
        .retryable()
    }

    pub fn remote_invalid_payload(problem: impl Into<String>) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::RemoteInvalidPayload,
            format!("Malformed commit payload: {}", problem),
            serde_json::json!({ "problem": problem }),
        )
        .retryable()
    }

    pub fn deploy_spawn_failed(command: &str, err: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::DeploySpawnFailed,
            format!("Failed to start deploy command: {}", err),
            serde_json::json!({ "command": command, "error": err.to_string() }),
        )
        .retryable()
    }

    pub fn deploy_signal_failed(pgid: i32, err: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::DeploySignalFailed,
            format!("Failed to signal process group {}: {}", pgid, err),
            serde_json::json!({ "pgid": pgid, "error": err.to_string() }),
        )
    }

    pub fn deploy_cancelled(generation: u64) -> Self {
        Self::new(
            ErrorCode::DeployCancelled,
            "Deploy lifetime was cancelled",
            serde_json::json!({ "generation": generation }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        let message = match &context {
            Some(ctx) => format!("IO error ({}): {}", ctx, error),
            None => format!("IO error: {}", error),
        };
        Self::new(
            ErrorCode::InternalIoError,
            message,
            to_details(InternalIoErrorDetails { error, context }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    fn retryable(mut self) -> Self {
        self.retryable = Some(true);
        self
    }

    pub fn is_cancellation(&self) -> bool {
        self.code == ErrorCode::DeployCancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_argument_lists_flags_in_message() {
        let err = Error::validation_missing_argument(vec!["--token".into(), "--deploy".into()]);
        assert_eq!(err.code, ErrorCode::ValidationMissingArgument);
        assert!(err.message.contains("--token, --deploy"));
        assert_eq!(err.details["args"][1], "--deploy");
        assert_eq!(err.code.exit_code(), 2);
    }

    #[test]
    fn transient_failures_are_marked_retryable() {
        assert_eq!(Error::remote_bad_status("u", 502).retryable, Some(true));
        assert_eq!(Error::remote_invalid_payload("no sha").retryable, Some(true));
        assert_eq!(Error::git_command_failed("pull").retryable, Some(true));
        assert_eq!(Error::git_detached_head().retryable, None);
    }

    #[test]
    fn bad_status_carries_status_in_details() {
        let err = Error::remote_bad_status("https://api.example/x", 404);
        assert_eq!(err.code.as_str(), "remote.bad_status");
        assert_eq!(err.details["status"], 404);
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn cancellation_is_distinguishable() {
        assert!(Error::deploy_cancelled(3).is_cancellation());
        assert!(!Error::deploy_spawn_failed("x", "boom").is_cancellation());
    }

    #[test]
    fn remote_unrecognized_has_hint() {
        let err = Error::git_remote_unrecognized("file:///tmp/repo");
        assert_eq!(err.hints.len(), 1);
        assert_eq!(err.details["url"], "file:///tmp/repo");
    }
}

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use fieldsync_core::WriteNotification;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    /// Payload of a `notify` request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<WriteNotification>,
}

impl DaemonRequest {
    pub fn command(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            notification: None,
        }
    }

    pub fn notify(notification: WriteNotification) -> Self {
        Self {
            cmd: "notify".to_string(),
            notification: Some(notification),
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Status payload. Retries briefly so a freshly started daemon has time to bind.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::command("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::command("stop"))?;
    response_into_data(response).map(|_| ())
}

/// Run one poll tick now and return its summary.
pub fn request_poll(home: &Path) -> Result<Value, DaemonError> {
    let response = send_request(home, &DaemonRequest::command("poll"))?;
    response_into_data(response)
}

/// Hand a write notification to the change queue. Returns once it is queued
/// (or filtered out), not once it is processed.
pub fn request_notify(home: &Path, notification: WriteNotification) -> Result<Value, DaemonError> {
    let response = send_request(home, &DaemonRequest::notify(notification))?;
    response_into_data(response)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn notify_request_carries_wire_field_names() {
        let request = DaemonRequest::notify(WriteNotification {
            msgtype: "write-response".into(),
            code: "success".into(),
            content_type: "application/vnd.oada.fields.1+json".into(),
            resource_id: "resources/fields".into(),
            rev: 12,
            user_id: "users/u".into(),
        });

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["cmd"], "notify");
        assert_eq!(encoded["notification"]["_rev"], 12);
        assert_eq!(
            encoded["notification"]["contentType"],
            "application/vnd.oada.fields.1+json"
        );
    }

    #[test]
    fn plain_command_omits_notification() {
        let line = serde_json::to_string(&DaemonRequest::command("status")).unwrap();
        assert_eq!(line, r#"{"cmd":"status"}"#);
        let parsed: DaemonRequest = serde_json::from_value(json!({ "cmd": "poll" })).unwrap();
        assert!(parsed.notification.is_none());
    }

    #[test]
    fn missing_socket_reports_not_running() {
        let home = TempDir::new().unwrap();
        let err = send_request(home.path(), &DaemonRequest::command("status")).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = response_into_data(DaemonResponse::error("unknown command 'x'")).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(ref m) if m.contains("unknown command")));
    }
}

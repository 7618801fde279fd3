//! Control-plane binding
//!
//! Maps the `AddProbe`, `RemoveProbe` and `ListProbes` calls onto the
//! registry and registry errors onto wire status codes. Transports (gRPC,
//! HTTP, a local socket) wrap [`ControlPlane`] and only move the serde
//! request and response types around.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::config::ProbeConfig;
use crate::error::Error;
use crate::registry::{ProbeRegistry, RemoveOutcome};

/// Status of a control-plane reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// Request applied
    Ok,
    /// A probe with that name is already registered or starting
    AlreadyExists,
    /// The probe definition could not be resolved into options
    InvalidConfig,
    /// No running probe has that name
    NotFound,
    /// The executor failed to start or another unexpected error
    Internal,
}

impl From<&Error> for StatusCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::AlreadyExists(_) => StatusCode::AlreadyExists,
            Error::NotFound(_) => StatusCode::NotFound,
            Error::InvalidConfig(_) => StatusCode::InvalidConfig,
            _ => StatusCode::Internal,
        }
    }
}

/// Request to start a new probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddProbeRequest {
    /// Definition of the probe to add
    pub probe_config: ProbeConfig,
}

/// Reply to an [`AddProbeRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddProbeResponse {
    pub status: StatusCode,
    /// Error description, absent on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request to stop and forget a probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveProbeRequest {
    /// Name the probe was added under
    pub probe_name: String,
}

/// Reply to a [`RemoveProbeRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveProbeResponse {
    pub status: StatusCode,
    /// Set when the probe ignored cancellation and its task was aborted
    #[serde(default)]
    pub forced: bool,
    /// Error description, or why the stop was not clean
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One probe in a [`ListProbesResponse`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeEntry {
    pub name: String,
    pub config: ProbeConfig,
}

/// Snapshot of the registered probes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListProbesResponse {
    /// Probes ordered by name
    pub probes: Vec<ProbeEntry>,
}

/// Request handler on top of a shared registry
#[derive(Debug, Clone)]
pub struct ControlPlane {
    registry: Arc<ProbeRegistry>,
}

impl ControlPlane {
    /// Create a handler serving `registry`
    pub fn new(registry: Arc<ProbeRegistry>) -> Self {
        Self { registry }
    }

    /// The registry requests are applied to
    pub fn registry(&self) -> &Arc<ProbeRegistry> {
        &self.registry
    }

    /// Add a probe
    ///
    /// # Returns
    ///
    /// `OK`, `ALREADY_EXISTS`, `INVALID_CONFIG` (with the cause in
    /// `message`), or `INTERNAL` when the executor failed to start
    pub async fn add_probe(&self, request: AddProbeRequest) -> AddProbeResponse {
        match self.registry.add(request.probe_config).await {
            Ok(()) => AddProbeResponse {
                status: StatusCode::Ok,
                message: None,
            },
            Err(e) => {
                let status = StatusCode::from(&e);
                if status == StatusCode::Internal {
                    error!(error = %e, "AddProbe failed");
                }
                AddProbeResponse {
                    status,
                    message: Some(e.to_string()),
                }
            }
        }
    }

    /// Remove a probe
    ///
    /// A probe that had to be aborted still answers `OK`, with `forced` set.
    pub async fn remove_probe(&self, request: RemoveProbeRequest) -> RemoveProbeResponse {
        match self.registry.remove(&request.probe_name).await {
            Ok(outcome) => {
                let message = match &outcome {
                    RemoveOutcome::Stopped => None,
                    RemoveOutcome::Failed(msg) => Some(msg.clone()),
                    RemoveOutcome::Forced => {
                        Some("probe did not stop within the grace period".to_string())
                    }
                };
                RemoveProbeResponse {
                    status: StatusCode::Ok,
                    forced: outcome == RemoveOutcome::Forced,
                    message,
                }
            }
            Err(e) => RemoveProbeResponse {
                status: StatusCode::from(&e),
                forced: false,
                message: Some(e.to_string()),
            },
        }
    }

    /// List probes in name order
    pub fn list_probes(&self) -> ListProbesResponse {
        let probes = self
            .registry
            .list()
            .into_iter()
            .map(|info| ProbeEntry {
                name: info.name,
                config: (*info.config).clone(),
            })
            .collect();
        ListProbesResponse { probes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_variants() {
        let cases = [
            (Error::AlreadyExists("p".into()), StatusCode::AlreadyExists),
            (Error::NotFound("p".into()), StatusCode::NotFound),
            (
                Error::invalid_config(Error::invalid_input("bad")),
                StatusCode::InvalidConfig,
            ),
            (Error::execution("boom"), StatusCode::Internal),
            (Error::Other("?".into()), StatusCode::Internal),
        ];

        for (err, want) in cases {
            assert_eq!(StatusCode::from(&err), want, "{err}");
        }
    }

    #[test]
    fn status_code_wire_names() {
        assert_eq!(
            serde_json::to_string(&StatusCode::AlreadyExists).unwrap(),
            "\"ALREADY_EXISTS\""
        );
        assert_eq!(serde_json::to_string(&StatusCode::Ok).unwrap(), "\"OK\"");
    }

    #[test]
    fn add_request_from_json() {
        let request: AddProbeRequest = serde_json::from_str(
            r#"{"probe_config": {"name": "web", "probe_type": "http", "interval": "5s"}}"#,
        )
        .unwrap();

        assert_eq!(request.probe_config.name, "web");
        assert_eq!(request.probe_config.interval.as_deref(), Some("5s"));
    }
}

//! API request and response types for the HTTP host.

use serde::{Deserialize, Serialize};

use crate::traits::{CommandResult, GatewayStatus};

// ============================================================================
// Response Types
// ============================================================================

/// API response wrapper for consistent JSON structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (present when success=true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present when success=false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable error code (present when success=false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    /// Create an error response
    pub fn err(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code.to_string()),
        }
    }
}

/// Result of a train command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Gateway message
    pub message: String,
}

impl From<CommandResult> for CommandResponse {
    fn from(result: CommandResult) -> Self {
        Self {
            message: result.message,
        }
    }
}

/// Train status plus who is driving
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainStatusResponse {
    /// Gateway status
    #[serde(flatten)]
    pub train: GatewayStatus,
    /// Current controller id
    pub controller: Option<String>,
}

/// Runtime-adjustable settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfigResponse {
    /// Control timeout in seconds
    pub queue_timeout: u64,
}

/// Script validation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    /// Number of parsed commands
    pub commands: usize,
}

// ============================================================================
// Request Types
// ============================================================================

/// POST /queue/join
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Client id
    pub user_id: String,
    /// Display name
    pub username: String,
}

/// Any request that only identifies the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequest {
    /// Client id
    pub user_id: String,
}

/// POST /train/speed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedRequest {
    /// Client id
    pub user_id: String,
    /// Speed step 0..=31
    pub speed: u8,
}

/// POST /train/direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionRequest {
    /// Client id
    pub user_id: String,
    /// `forward`, `reverse` or `toggle`
    pub direction: String,
}

/// POST /train/bell and /train/lights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchRequest {
    /// Client id
    pub user_id: String,
    /// On or off
    pub state: bool,
}

/// POST /config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdateRequest {
    /// New control timeout in seconds (10..=3600)
    pub queue_timeout: Option<u64>,
}

/// POST /scripts/validate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRequest {
    /// Script source
    pub script: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Direction;

    #[test]
    fn error_response_omits_data() {
        let resp = ApiResponse::<()>::err("not_queued", "User not in queue");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "not_queued");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn ok_response_omits_error_fields() {
        let json = serde_json::to_value(ApiResponse::ok(3)).unwrap();
        assert_eq!(json["data"], 3);
        assert!(json.get("error").is_none());
        assert!(json.get("code").is_none());
    }

    #[test]
    fn train_status_is_flattened() {
        let resp = TrainStatusResponse {
            train: GatewayStatus {
                connected: true,
                speed: 4,
                direction: Direction::Reverse,
                mock_mode: true,
            },
            controller: Some("a".into()),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["speed"], 4);
        assert_eq!(json["direction"], "reverse");
        assert_eq!(json["controller"], "a");
    }

    #[test]
    fn config_update_timeout_is_optional() {
        let req: ConfigUpdateRequest = serde_json::from_str("{}").unwrap();
        assert!(req.queue_timeout.is_none());
    }
}

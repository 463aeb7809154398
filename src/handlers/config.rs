//! # Configuration Channel
//!
//! `POST /configure` carries `{action, params}` requests from the control
//! GUI. Action names map onto the closed [`ControlAction`] set by
//! exhaustive matching; an unrecognized name is an explicit
//! `unknown_action` error rather than a silent success. Parameters are
//! validated before any configuration changes, so a bad value never leaves
//! a half-applied update behind.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

/// Wire shape of a configure request.
#[derive(Debug, Deserialize)]
pub struct ConfigureRequest {
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The closed set of supported control actions, each with typed parameters.
#[derive(Debug, PartialEq)]
pub enum ControlAction {
    SetSampleRate { value: u32 },
    SetPacketSize { value: usize },
    SaveToCsv,
}

impl ControlAction {
    /// Map an `{action, params}` request onto a typed action.
    pub fn parse(request: &ConfigureRequest) -> Result<Self, AppError> {
        match request.action.as_str() {
            "set_sample_rate" => {
                let value = numeric_param(&request.params, "value")?;
                let value = u32::try_from(value).map_err(|_| {
                    AppError::Validation(format!("Sample rate {} is out of range", value))
                })?;
                Ok(ControlAction::SetSampleRate { value })
            }
            "set_packet_size" => {
                let value = numeric_param(&request.params, "value")?;
                Ok(ControlAction::SetPacketSize {
                    value: value as usize,
                })
            }
            "save_to_csv" => Ok(ControlAction::SaveToCsv),
            other => Err(AppError::UnknownAction(other.to_string())),
        }
    }
}

fn numeric_param(params: &serde_json::Value, name: &str) -> Result<u64, AppError> {
    params.get(name).and_then(|v| v.as_u64()).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Action requires a non-negative numeric '{}' parameter",
            name
        ))
    })
}

/// `POST /configure`
pub async fn configure(
    state: web::Data<AppState>,
    body: web::Json<ConfigureRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    let action = ControlAction::parse(&request)?;

    match action {
        ControlAction::SetSampleRate { value } => {
            if value == 0 {
                return Err(AppError::Validation(
                    "Sample rate must be greater than 0".to_string(),
                ));
            }
            let mut config = state.get_config();
            config.acquisition.sample_rate = value;
            state.update_config(config).map_err(AppError::Validation)?;
        }
        ControlAction::SetPacketSize { value } => {
            // The range check happens in AppConfig::validate, before the
            // stored configuration changes.
            let mut config = state.get_config();
            config.acquisition.packet_size = value;
            state.update_config(config).map_err(AppError::Validation)?;
        }
        ControlAction::SaveToCsv => {
            state
                .controller
                .export_snapshot()
                .await
                .map_err(|err| AppError::Export(err.to_string()))?;
        }
    }

    Ok(HttpResponse::Ok().json(json!({
        "status": "action handled",
        "action": request.action
    })))
}

/// `GET /config`: current configuration snapshot. Data-plane clients read
/// `acquisition.channel_count` here to reshape the binary stream.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "acquisition": {
                "sample_rate": config.acquisition.sample_rate,
                "packet_size": config.acquisition.packet_size,
                "channel_count": config.acquisition.channel_count,
                "emulate": config.acquisition.emulate
            },
            "export": {
                "directory": config.export.directory
            }
        }
    })))
}

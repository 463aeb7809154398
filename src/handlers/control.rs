//! # Control Plane: start / stop / status
//!
//! The start request may override the configured acquisition defaults for
//! the one session it starts; overrides are validated here, before any
//! state changes. Start-while-running and stop-while-idle are informational
//! no-ops, so pollers can retry without side effects.

use crate::acquisition::controller::{AcquisitionMode, SessionParams};
use crate::config::{AppConfig, MAX_PACKET_SIZE};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Body of `POST /start`. Every field is optional; the configured defaults
/// fill the gaps, and an empty or missing body starts a continuous session.
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub mode: Option<AcquisitionMode>,
    /// Session length in seconds; required for timed mode.
    pub duration: Option<f64>,
    pub sample_rate: Option<u32>,
    pub packet_size: Option<usize>,
}

/// Merge the start request with the configured defaults, rejecting bad
/// values before the controller sees them.
fn resolve_params(request: &StartRequest, config: &AppConfig) -> Result<SessionParams, AppError> {
    let sample_rate = request.sample_rate.unwrap_or(config.acquisition.sample_rate);
    if sample_rate == 0 {
        return Err(AppError::Validation(
            "Sample rate must be greater than 0".to_string(),
        ));
    }

    let packet_size = request.packet_size.unwrap_or(config.acquisition.packet_size);
    if packet_size > MAX_PACKET_SIZE {
        return Err(AppError::Validation(format!(
            "Packet size must be between 0 and {}, got {}",
            MAX_PACKET_SIZE, packet_size
        )));
    }

    let mode = request.mode.unwrap_or(AcquisitionMode::Auto);

    let duration = match request.duration {
        Some(seconds) if seconds <= 0.0 => {
            return Err(AppError::Validation(
                "Duration must be greater than 0 seconds".to_string(),
            ));
        }
        Some(seconds) => Some(Duration::from_secs_f64(seconds)),
        None => None,
    };

    if mode == AcquisitionMode::Timed && duration.is_none() {
        return Err(AppError::Validation(
            "Timed mode requires a duration".to_string(),
        ));
    }

    Ok(SessionParams {
        mode,
        duration,
        sample_rate,
        packet_size,
        channel_count: config.acquisition.channel_count,
        emulate: config.acquisition.emulate,
    })
}

/// `POST /start`
pub async fn start(
    state: web::Data<AppState>,
    body: Option<web::Json<StartRequest>>,
) -> AppResult<HttpResponse> {
    let request = body.map(|json| json.into_inner()).unwrap_or_default();
    let params = resolve_params(&request, &state.get_config())?;

    let outcome = state
        .controller
        .start(params)
        .await
        .map_err(AppError::Acquisition)?;

    Ok(HttpResponse::Ok().json(json!({ "status": outcome.as_status() })))
}

/// `POST /stop`
pub async fn stop(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let outcome = state.controller.stop().await;
    Ok(HttpResponse::Ok().json(json!({ "status": outcome.as_status() })))
}

/// `GET /status`: pure read, no side effects.
pub async fn status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "running": state.controller.is_running(),
        "clients": state.controller.subscriber_count()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = AppConfig::default();
        let params = resolve_params(&StartRequest::default(), &config).unwrap();

        assert_eq!(params.mode, AcquisitionMode::Auto);
        assert_eq!(params.sample_rate, 1000);
        assert_eq!(params.packet_size, 100);
        assert_eq!(params.channel_count, 8);
        assert!(params.duration.is_none());
    }

    #[test]
    fn test_overrides_are_validated() {
        let config = AppConfig::default();

        let request = StartRequest {
            packet_size: Some(1024),
            ..StartRequest::default()
        };
        assert!(resolve_params(&request, &config).is_err());

        let request = StartRequest {
            packet_size: Some(1023),
            sample_rate: Some(2000),
            ..StartRequest::default()
        };
        let params = resolve_params(&request, &config).unwrap();
        assert_eq!(params.packet_size, 1023);
        assert_eq!(params.sample_rate, 2000);
    }

    #[test]
    fn test_timed_mode_needs_a_positive_duration() {
        let config = AppConfig::default();

        let request = StartRequest {
            mode: Some(AcquisitionMode::Timed),
            ..StartRequest::default()
        };
        assert!(resolve_params(&request, &config).is_err());

        let request = StartRequest {
            mode: Some(AcquisitionMode::Timed),
            duration: Some(-1.0),
            ..StartRequest::default()
        };
        assert!(resolve_params(&request, &config).is_err());

        let request = StartRequest {
            mode: Some(AcquisitionMode::Timed),
            duration: Some(2.5),
            ..StartRequest::default()
        };
        let params = resolve_params(&request, &config).unwrap();
        assert_eq!(params.duration, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_mode_parses_from_wire_names() {
        let request: StartRequest = serde_json::from_str(r#"{"mode": "timed", "duration": 5}"#).unwrap();
        assert_eq!(request.mode, Some(AcquisitionMode::Timed));

        let request: StartRequest = serde_json::from_str(r#"{"mode": "auto"}"#).unwrap();
        assert_eq!(request.mode, Some(AcquisitionMode::Auto));

        assert!(serde_json::from_str::<StartRequest>(r#"{"mode": "warp"}"#).is_err());
    }
}

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::{
    auth::extractors::CurrentUser,
    error::ApiError,
    lookup::{
        dto::{Fields, HostRequest, LookupRequest, PortScanRequest},
        host::{validate_host, validate_port},
        services,
    },
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/lookup", post(research))
        .route("/lookup/whois", post(whois))
        .route("/lookup/dns", post(dns))
        .route("/lookup/geoip", post(geoip))
        .route("/lookup/port", post(port_scan))
        .route("/lookup/speed", post(speed))
}

/// Tool failures are data, not transport errors: a dead WHOIS server yields
/// `{"error": ...}` inside a 200, exactly like a successful probe would
/// yield its result.
fn tool_value<T: Serialize>(outcome: anyhow::Result<T>) -> Value {
    match outcome {
        Ok(v) => serde_json::to_value(v).unwrap_or_else(|e| json!({ "error": e.to_string() })),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

const ALL_CHECKS: [&str; 4] = ["whois", "dns_records", "ip_geolocation", "port_scan"];

#[instrument(skip(state, payload))]
async fn research(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Json(payload): Json<LookupRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_host(&payload.domain)?;
    validate_port(payload.port)?;

    let checks = payload
        .fields
        .map(Fields::into_list)
        .unwrap_or_else(|| ALL_CHECKS.iter().map(|s| s.to_string()).collect());

    let mut results = serde_json::Map::new();
    results.insert("domain".into(), json!(payload.domain));
    for check in checks {
        let value = match check.as_str() {
            "whois" => tool_value(services::whois(&state, &payload.domain).await),
            "dns_records" => tool_value(Ok(services::dns_records(&state, &payload.domain).await)),
            "ip_geolocation" => tool_value(services::geolocate(&state, &payload.domain).await),
            "port_scan" => {
                tool_value(services::port_scan(&state, &payload.domain, payload.port).await)
            }
            _ => json!({ "error": "unknown check" }),
        };
        results.insert(check, value);
    }

    Ok(Json(Value::Object(results)))
}

#[instrument(skip(state, payload))]
async fn whois(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Json(payload): Json<HostRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_host(&payload.host)?;
    Ok(Json(tool_value(services::whois(&state, &payload.host).await)))
}

#[instrument(skip(state, payload))]
async fn dns(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Json(payload): Json<HostRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_host(&payload.host)?;
    Ok(Json(tool_value(Ok(
        services::dns_records(&state, &payload.host).await
    ))))
}

#[instrument(skip(state, payload))]
async fn geoip(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Json(payload): Json<HostRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_host(&payload.host)?;
    Ok(Json(tool_value(
        services::geolocate(&state, &payload.host).await,
    )))
}

#[instrument(skip(state, payload))]
async fn port_scan(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Json(payload): Json<PortScanRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_host(&payload.host)?;
    validate_port(payload.port)?;
    Ok(Json(tool_value(
        services::port_scan(&state, &payload.host, payload.port).await,
    )))
}

#[instrument(skip(state))]
async fn speed(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(tool_value(services::speed_test(&state).await)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_value_wraps_errors_inline() {
        let value = tool_value::<Value>(Err(anyhow::anyhow!("connect refused")));
        assert_eq!(value, json!({"error": "connect refused"}));
        let value = tool_value(Ok(json!({"port": 80})));
        assert_eq!(value, json!({"port": 80}));
    }
}

//service/mod.rs
pub mod expiry_worker;
pub mod relay_service;


use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use bytes::BytesMut;
use futures::StreamExt;
use log::{debug, info, warn};

use crate::app_state::AppState;
use crate::error::RelayError;
use crate::stats::ServiceStatsView;

/// Filename every download is served under; the real name only lives in the share link
pub const DOWNLOAD_FILENAME: &str = "only_you_know";

/// Extract the token from an `Authorization: Bearer <token>` header.
/// Missing, malformed and empty tokens all yield `None`.
fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn declared_length(req: &HttpRequest) -> Option<u64> {
    req.headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

pub async fn put_service(key: String, mut payload: web::Payload, req: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, RelayError> {
    let _mdc = log_mdc::insert_scoped("key", &key);
    let max = app_state.config.limits.max_file_size;

    match declared_length(&req) {
        Some(len) if len <= max => debug!("PUT {} declares {} bytes", key, len),
        Some(len) => {
            warn!("Rejecting upload of {} bytes for {}, limit is {}", len, key, max);
            return Err(RelayError::PayloadTooLarge { max });
        }
        None => {
            warn!("Rejecting upload for {} without Content-Length", key);
            return Err(RelayError::PayloadTooLarge { max });
        }
    }

    let deletion_key = bearer_token(&req).ok_or_else(|| RelayError::validation("Deletion key required"))?;

    info!("Starting chunk load for key: {}", key);
    let mut bytes = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| RelayError::validation(format!("Error reading payload: {}", e)))?;
        if (bytes.len() + chunk.len()) as u64 > max {
            warn!("Body for {} exceeded {} bytes while streaming", key, max);
            return Err(RelayError::PayloadTooLarge { max });
        }
        bytes.extend_from_slice(&chunk);
    }
    info!("Total received data size: {} bytes", bytes.len());

    let relay = app_state.relay.clone();
    let content = bytes.to_vec();
    web::block(move || relay.upload(&key, content, &deletion_key))
        .await
        .map_err(|e| RelayError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().body("OK"))
}

pub async fn get_service(key: String, app_state: web::Data<AppState>) -> Result<HttpResponse, RelayError> {
    let _mdc = log_mdc::insert_scoped("key", &key);

    let relay = app_state.relay.clone();
    let record = web::block(move || relay.download(&key))
        .await
        .map_err(|e| RelayError::Internal(e.to_string()))??;

    debug!("Serving {} bytes for {}", record.size, record.key);
    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", DOWNLOAD_FILENAME),
        ))
        .insert_header((header::CONTENT_LENGTH, record.size.to_string()))
        .body(record.content))
}

pub async fn delete_service(key: String, req: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, RelayError> {
    let _mdc = log_mdc::insert_scoped("key", &key);

    let secret = bearer_token(&req).ok_or(RelayError::Unauthorized)?;
    let relay = app_state.relay.clone();
    web::block(move || relay.delete(&key, &secret))
        .await
        .map_err(|e| RelayError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().body("File deleted"))
}

pub async fn stats_service(app_state: web::Data<AppState>) -> Result<HttpResponse, RelayError> {
    let relay = app_state.relay.clone();
    let stats = web::block(move || relay.stats())
        .await
        .map_err(|e| RelayError::Internal(e.to_string()))??;

    let body = serde_json::to_string_pretty(&ServiceStatsView::from(&stats))
        .map_err(|e| RelayError::Internal(e.to_string()))?;
    Ok(HttpResponse::Ok().content_type("application/json").body(body))
}

const UPLOAD_SCRIPT: &str = r#"#!/bin/bash
set -euo pipefail

if [ "$#" -ne 1 ]; then
  echo "Usage: $0 <filename>"
  exit 1
fi

BASE_URL="__PUBLIC_URL__"
FILENAME=$(basename "$1")
KEY=$(openssl rand -hex 32)
IV=$(openssl rand -hex 16)
SECRET=$(openssl rand -hex 16)
ENCODED_FILENAME=$(echo -n "$FILENAME" | xxd -plain | tr -d '\n' | sed 's/\(.\{2\}\)/%\1/g')

TMP=$(mktemp)
trap 'rm -f "$TMP"' EXIT

openssl enc -aes-256-cbc -in "$1" -out "$TMP" -K "$KEY" -iv "$IV"
HASH=$(sha256sum "$TMP" | cut -d' ' -f1)

curl -sf -X PUT "${BASE_URL}/${HASH}.enc" \
  -H "Content-Type: application/octet-stream" \
  -H "Authorization: Bearer ${SECRET}" \
  --data-binary @"$TMP" > /dev/null

echo "${BASE_URL}/d/#${HASH}${KEY}${IV}${ENCODED_FILENAME}"
echo "Delete early with: curl -X DELETE -H \"Authorization: Bearer ${SECRET}\" ${BASE_URL}/${HASH}"
"#;

/// Render the shell helper for `public_url`
pub fn upload_script(public_url: &str) -> String {
    UPLOAD_SCRIPT.replace("__PUBLIC_URL__", public_url.trim_end_matches('/'))
}

pub async fn upload_script_service(app_state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .body(upload_script(&app_state.config.server.public_url))
}

// src/api.rs
use actix_web::{delete, get, put, web, HttpRequest, HttpResponse, Responder};

use crate::app_state::AppState;
use crate::error::RelayError;
use crate::service::{delete_service, get_service, put_service, stats_service, upload_script_service};

#[get("/api/stats")]
pub async fn stats(app_state: web::Data<AppState>) -> Result<HttpResponse, RelayError> {
    stats_service(app_state).await
}

#[get("/upload.sh")]
pub async fn upload_script(app_state: web::Data<AppState>) -> impl Responder {
    upload_script_service(app_state).await
}

#[put("/{key}")]
pub async fn put(
    key: web::Path<String>,
    payload: web::Payload,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, RelayError> {
    put_service(key.into_inner(), payload, req, app_state).await
}

#[get("/{key}")]
pub async fn get(key: web::Path<String>, app_state: web::Data<AppState>) -> Result<HttpResponse, RelayError> {
    get_service(key.into_inner(), app_state).await
}

#[delete("/{key}")]
pub async fn delete(
    key: web::Path<String>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, RelayError> {
    delete_service(key.into_inner(), req, app_state).await
}

/// Register every route. Fixed paths go first so `/{key}` cannot shadow them.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(stats)
        .service(upload_script)
        .service(put)
        .service(get)
        .service(delete);
}

use actix_web::{web, App, HttpServer};
use log::{error, info};
use std::io;

use crypt_send::api;
use crypt_send::app_state::AppState;
use crypt_send::config::AppConfig;
use crypt_send::logging::init_logging;
use crypt_send::service::expiry_worker::ExpiryWorker;

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = AppConfig::load(|config| init_logging(&config.logging.config_file))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let state = AppState::from_config(config.clone()).map_err(|e| {
        error!("Failed to initialize storage: {}", e);
        io::Error::new(io::ErrorKind::Other, e.to_string())
    })?;

    if config.expiry.enabled {
        // First tick fires immediately, reconciling blobs that expired while down
        ExpiryWorker::from_config(state.relay.clone(), &config.expiry).start_background();
    } else {
        info!("Expiry worker disabled");
    }

    let data = web::Data::new(state);
    info!("Starting server on {}:{}", config.server.host, config.server.port);

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(data.clone())
            .configure(api::configure)
    })
    .workers(config.server.workers.max(1))
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}

use actix_web::{middleware, web, App, HttpServer};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chunk_vault::api::object_handler;
use chunk_vault::app_state::AppState;
use chunk_vault::config::AppConfig;
use chunk_vault::metadata::expiry_worker::spawn_expiry_worker;

fn init_logging(config: &AppConfig) {
    let log_config = &config.logging.config_file;
    if Path::new(log_config).exists() {
        match log4rs::init_file(log_config, Default::default()) {
            Ok(()) => return,
            Err(e) => eprintln!("Failed to load {}: {}, falling back to env_logger", log_config, e),
        }
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = AppConfig::load().map_err(|e| std::io::Error::other(e.to_string()))?;
    init_logging(&config);

    let state = AppState::from_config(config.clone())?;
    match state.protocol.metadata().backend() {
        Some(backend) => {
            let interval = Duration::from_secs(config.metadata.purge_interval.max(1));
            spawn_expiry_worker(Arc::clone(backend), interval);
        }
        None => warn!("Metadata disabled, expiry worker not started"),
    }

    let host = config.server.host.clone();
    let port = config.server.port;
    info!("Starting server on {}:{}", host, port);

    let data = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(data.clone())
            .default_service(web::to(object_handler))
    })
    .workers(config.server.workers.max(1))
    .bind((host.as_str(), port))?
    .run()
    .await
}

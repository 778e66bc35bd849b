use actix_web::{web::Data, HttpServer};
use household_bills::{config::Config, create_app, AppState};
use log::info;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::load().map_err(|e| {
        log::error!("FATAL: {}", e);
        e
    })?;
    let address = (config.host.clone(), config.port);
    info!("Starting in {} mode", config.environment);

    let state = Data::new(AppState::connect(config).await.map_err(|e| {
        log::error!("FATAL: failed to open database: {}", e);
        e
    })?);

    info!("Starting HTTP server on http://{}:{}/", address.0, address.1);

    HttpServer::new(move || create_app(state.clone()))
        .bind(address)?
        .run()
        .await
}

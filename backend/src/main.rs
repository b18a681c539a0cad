use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use backend::pipeline::config::PipelineConfig;
use backend::routes::configure_routes;
use backend::storage::disk::DiskStorage;
use backend::store::ResultStore;
use std::env;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = PipelineConfig::from_env();
    config.ensure_dirs()?;
    let storage = DiskStorage::new(config.uploads_dir.clone());
    let store = ResultStore::new();

    let port = env::var("PORT").unwrap_or_else(|_| "5000".to_string());
    let bind_address = format!("0.0.0.0:{}", port);

    log::info!("Starting server on {}", bind_address);

    let images_dir = config.images_dir.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allowed_origin("http://localhost:5173")
                    .allowed_origin("http://localhost:5174")
                    .allowed_origin("http://localhost:3000")
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(storage.clone()))
            .configure(|cfg| configure_routes(cfg, images_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Result;
use pipeserve::config::Settings;
use pipeserve::server::{body_config, routes};
use pipeserve::service::{AppState, Service};
use std::{env, process};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: ./pipeserve <vision|audio|qa|translation> [config file]";

fn get_args() -> (Service, Option<String>) {
    let args: Vec<String> = env::args().collect();
    if !(2..=3).contains(&args.len()) {
        println!("{USAGE}");
        process::exit(1);
    }

    let service = match args[1].parse::<Service>() {
        Ok(service) => service,
        Err(e) => {
            println!("{e}\n{USAGE}");
            process::exit(1);
        }
    };
    let config_file = args.get(2).cloned();

    (service, config_file)
}

#[actix_web::main]
async fn main() -> Result<()> {
    let (service, config_file) = get_args();
    let settings = Settings::load(config_file.as_deref())?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Models load before binding, a failure here means the service never serves
    let state = web::Data::new(AppState::load(service, &settings).await?);

    let max_body_bytes = settings.max_body_bytes;
    let port = settings.port.unwrap_or_else(|| service.default_port());
    info!("starting {service} service on {}:{port}", settings.host);

    // Start the HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(body_config(max_body_bytes))
            .wrap(middleware::Logger::default())
            .configure(routes::configure(service))
    })
    .bind((settings.host.as_str(), port))?
    .run()
    .await?;

    Ok(())
}

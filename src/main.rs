use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use carboncoin::api::{self, ApiDoc};
use carboncoin::blockchain::storage::NodeStorage;
use carboncoin::blockchain::Wallet;
use carboncoin::config::Settings;
use carboncoin::network::HttpPeerClient;
use carboncoin::node::Node;
use carboncoin::registry::Registry;

// Restore the configured wallet or create a new one, and make sure the
// registry knows about it
fn load_wallet(settings: &Settings, registry: &Registry) -> anyhow::Result<Wallet> {
    let wallet = match &settings.node.private_key {
        Some(key) => Wallet::restore(key).context("invalid private key")?,
        None => {
            let wallet = Wallet::generate();
            info!("Generated new wallet {}", wallet.address());
            wallet
        }
    };

    registry.register_wallet(&wallet, None)?;
    Ok(wallet)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut settings = Settings::load().context("failed to load configuration")?;
    settings.apply_args(&args)?;

    let registry = Registry::open(settings.registry_dir())?;
    let wallet = load_wallet(&settings, &registry)?;
    let storage = NodeStorage::open(settings.storage_dir())
        .with_context(|| format!("failed to open storage at {}", settings.storage_dir().display()))?;
    let client = HttpPeerClient::new(&settings.network)?;

    let host = settings.node.host.clone();
    let port = settings.node.port;

    let node = Node::builder(settings)
        .wallet(wallet)
        .client(Arc::new(client))
        .storage(storage)
        .registry(registry)
        .build()?;

    node.claim_session()?;
    node.bootstrap().await;
    node.start_services();

    let data = web::Data::from(Arc::clone(&node));

    info!("Starting HTTP server at http://{}:{}", host, port);

    // Start HTTP server
    let server = HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(data.clone())
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi()),
            )
    })
    .bind((host.as_str(), port))?
    .run();

    // `/shutdown` stops the node; stop the server with it
    let handle = server.handle();
    let watcher = Arc::clone(&node);
    tokio::spawn(async move {
        watcher.wait_for_shutdown().await;
        handle.stop(true).await;
    });

    server.await?;

    node.shutdown();
    info!("Node on port {} stopped", port);
    Ok(())
}

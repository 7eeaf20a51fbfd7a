use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, warn};

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use http::{
    HeaderName, Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use anyhow::anyhow;

use gadka_gateway::{ServerConfig, routes, state::AppState};

/// Gadka Gateway - Voice assistant server with an ASCII avatar
#[derive(Parser, Debug)]
#[command(name = "gadka-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let address = config.address();
    let tls_config = config.tls.clone();
    let is_tls_enabled = config.is_tls_enabled();
    let cors_origins = config.cors_allowed_origins.clone();
    println!("Starting server on {address}");

    // Bind the viewer listener first so the discovery endpoint can report
    // the real port.
    let viewer_listener = bind_viewer_listener(&config).await?;
    let viewer_addr = viewer_listener.local_addr()?;

    // Create application state
    let app_state = AppState::new(config, viewer_addr);

    // Configure CORS
    let cors_layer = if let Some(ref origins) = cors_origins {
        if origins == "*" {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    AUTHORIZATION,
                    CONTENT_TYPE,
                    HeaderName::from_static("x-requested-with"),
                ])
                .allow_credentials(false)
        } else {
            // Parse comma-separated origins
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    AUTHORIZATION,
                    CONTENT_TYPE,
                    HeaderName::from_static("x-requested-with"),
                ])
                .allow_credentials(true)
        }
    } else {
        // No CORS configured - strict same-origin only for production security
        info!(
            "CORS not configured, defaulting to same-origin only. \
             Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
        );
        CorsLayer::new()
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(false)
    };

    // Security headers
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    // Main app: health check, discovery, session channel
    let app: Router = routes::create_session_router()
        .with_state(app_state.clone())
        .layer(cors_layer)
        .layer(security_headers);

    // Viewer app runs on its own listener; viewers are plain WS clients.
    let viewer_app: Router = routes::create_viewer_router().with_state(app_state);
    println!("Viewer channel listening on ws://{viewer_addr}/viewer");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(viewer_listener, viewer_app).await {
            tracing::error!("viewer server error: {}", e);
        }
    });

    // Parse socket address
    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    // Start server with or without TLS
    if is_tls_enabled {
        let tls = tls_config.expect("TLS config must be present when TLS is enabled");

        // Load TLS configuration from certificate and key files
        let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|e| {
                anyhow!(
                    "Failed to load TLS certificates from {} and {}: {}",
                    tls.cert_path.display(),
                    tls.key_path.display(),
                    e
                )
            })?;

        println!("Server listening on https://{} (TLS enabled)", socket_addr);

        axum_server::bind_rustls(socket_addr, rustls_config)
            .serve(app.into_make_service())
            .await
            .map_err(|e| anyhow!("TLS server error: {}", e))?;
    } else {
        println!("Server listening on http://{}", socket_addr);

        let listener = TcpListener::bind(&socket_addr).await?;
        axum::serve(listener, app).await?;
    }

    Ok(())
}

/// Bind the viewer listener, scanning past an occupied port a bounded number
/// of times before letting the system assign one.
async fn bind_viewer_listener(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    let mut port = config.viewer_port;
    for _ in 0..config.viewer_port_attempts {
        match TcpListener::bind((config.host.as_str(), port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!("viewer port {} unavailable ({}), trying next", port, e);
                port = port.wrapping_add(1);
            }
        }
    }

    warn!(
        "no free viewer port after {} attempts, letting the system choose",
        config.viewer_port_attempts
    );
    TcpListener::bind((config.host.as_str(), 0))
        .await
        .map_err(|e| anyhow!("Failed to bind viewer listener: {}", e))
}

use std::sync::Arc;

use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use schoolbus_auth::config::Config;
use schoolbus_auth::identity::{self, FirebaseAuth};
use schoolbus_auth::routes;
use schoolbus_auth::session::SessionCodec;
use schoolbus_auth::users::SqliteUserRepository;
use schoolbus_auth::{AppState, AuthService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.logging.level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SchoolBus auth service");

    // Identity provider; startup fails if it cannot be initialized
    let firebase = FirebaseAuth::initialize(&config.firebase).await?;
    let provider = identity::install(Arc::new(firebase))?;

    let users = SqliteUserRepository::new(&config.database.url)?;
    tracing::info!("User store opened at {}", config.database.url);

    let sessions = SessionCodec::new(&config.jwt.secret, config.jwt.ttl()?);

    let state = Arc::new(AppState {
        auth: AuthService::new(provider, Arc::new(users), sessions),
        route_policy: routes::route_policy(),
    });

    // Build CORS layer
    let cors = match config.cors.origin_list() {
        None => CorsLayer::new().allow_origin(Any),
        Some(origins) => {
            let origins = origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok())
                .collect::<Vec<_>>();
            CorsLayer::new().allow_origin(AllowOrigin::list(origins))
        }
    }
    .allow_methods(Any)
    .allow_headers(Any);

    let app = routes::app(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

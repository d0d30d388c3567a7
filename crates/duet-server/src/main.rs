use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use duet_api::middleware::require_auth;
use duet_api::{AppState, AppStateInner, conversations, messages};
use duet_chat::{
    ConversationDirectory, HttpProfileDirectory, Mailer, MessageStore, Notifier, ProfileDirectory,
    SmtpConfig, SmtpMailer,
};
use duet_crypto::MessageCipher;
use duet_gateway::auth::{JwtVerifier, TokenVerifier};
use duet_gateway::connection;
use duet_gateway::dispatcher::Dispatcher;
use duet_gateway::presence::PresenceRegistry;
use duet_gateway::router::GatewayContext;

#[derive(Clone)]
struct WsState {
    ctx: GatewayContext,
    verifier: Arc<dyn TokenVerifier>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duet=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("DUET_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    // Falls back to the JWT secret so a single-secret deployment keeps
    // decrypting its existing messages
    let message_secret =
        std::env::var("DUET_MESSAGE_SECRET").unwrap_or_else(|_| jwt_secret.clone());
    let db_path = std::env::var("DUET_DB_PATH").unwrap_or_else(|_| "duet.db".into());
    let host = std::env::var("DUET_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("DUET_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let public_url =
        std::env::var("DUET_PUBLIC_URL").unwrap_or_else(|_| "http://localhost:3000".into());
    let profile_url = std::env::var("DUET_PROFILE_URL").ok();

    let smtp_config = SmtpConfig {
        host: std::env::var("SMTP_HOST").unwrap_or_default(),
        port: std::env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".into())
            .parse()?,
        starttls: std::env::var("SMTP_SECURE").map(|v| v == "true").unwrap_or(false),
        username: std::env::var("SMTP_USER").ok(),
        password: std::env::var("SMTP_PASS").ok(),
        from: std::env::var("SMTP_FROM")
            .unwrap_or_else(|_| "Duet <notifications@duet.local>".into()),
    };

    // Storage and the single derived message key
    let db = Arc::new(duet_db::Database::open(&PathBuf::from(&db_path))?);
    let cipher = Arc::new(MessageCipher::from_secret(&message_secret));

    // External collaborators
    let profiles: Arc<dyn ProfileDirectory> = Arc::new(HttpProfileDirectory::new(profile_url));
    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(&smtp_config)?);
    let notifier = Arc::new(Notifier::new(profiles.clone(), mailer, public_url));

    // Realtime router, with the presence registry handed in at construction
    let dispatcher = Dispatcher::new(PresenceRegistry::new());
    let gateway_ctx = GatewayContext {
        dispatcher,
        directory: Arc::new(ConversationDirectory::new(db.clone())),
        store: Arc::new(MessageStore::new(db.clone(), cipher.clone())),
        notifier,
    };
    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(jwt_secret.clone()));

    // REST state
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        directory: ConversationDirectory::new(db.clone()),
        store: MessageStore::new(db, cipher),
        profiles,
        jwt_secret,
    });

    // Routes
    let protected_routes = Router::new()
        .route("/chats/start", post(conversations::start_chat))
        .route("/chats", get(conversations::list_chats))
        .route("/chats/{chat_id}/passkey", post(conversations::set_pass_key))
        .route("/chats/{chat_id}/messages", get(messages::get_messages))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(WsState {
            ctx: gateway_ctx,
            verifier,
        });

    let app = Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Duet server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    State(state): State<WsState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.ctx, state.verifier, query.token)
    })
}

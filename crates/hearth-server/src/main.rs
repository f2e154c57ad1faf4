use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use hearth_api::auth::{self, AppState, AppStateInner};
use hearth_api::friendships::{self, FriendPolicy};
use hearth_api::middleware::{require_admin, require_auth};
use hearth_api::{admin, comments, likes, notifications, posts, profiles};
use hearth_gateway::connection;
use hearth_gateway::dispatcher::Dispatcher;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hearth=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("HEARTH_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("HEARTH_DB_PATH").unwrap_or_else(|_| "hearth.db".into());
    let host = std::env::var("HEARTH_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("HEARTH_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let friends = FriendPolicy {
        rerequest_after_decline: std::env::var("HEARTH_FRIEND_REREQUEST")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
    };

    // Init database
    let db = hearth_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state; the dispatcher doubles as the notification event sink
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
        sink: Arc::new(dispatcher.clone()),
        friends,
    });

    let ws_state = ServerState {
        dispatcher,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/auth/password", put(auth::change_password))
        .route("/users/me", get(auth::me).put(profiles::update_profile))
        .route("/users/search", get(profiles::search_users))
        .route("/users/{user_id}", get(profiles::get_profile))
        .route("/posts", post(posts::create_post))
        .route("/posts", get(posts::list_posts))
        .route("/posts/{post_id}", get(posts::get_post))
        .route("/posts/{post_id}", delete(posts::delete_post))
        .route("/posts/{post_id}/comments", post(comments::create_comment))
        .route("/posts/{post_id}/like", post(likes::toggle_like))
        .route("/comments/{comment_id}", delete(comments::delete_comment))
        .route("/friends", get(friendships::list_friends))
        .route("/friends/pending", get(friendships::list_pending))
        .route("/friends/requests", post(friendships::send_request))
        .route("/friends/respond", post(friendships::respond_request))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/unread", get(notifications::unread_count))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route(
            "/notifications/{notification_id}/read",
            post(notifications::mark_read),
        )
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state.clone());

    let admin_routes = Router::new()
        .route("/admin/stats", get(admin::stats))
        .route("/admin/post-comments", get(admin::recent_comments))
        .route("/admin/post-likes", get(admin::recent_likes))
        .route("/admin/login-activity", get(admin::login_activity))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(ws_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Hearth server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.jwt_secret)
    })
}

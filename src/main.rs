mod config;
mod db;
mod frame;
mod routes;
mod services;
mod state;
mod store;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env();
    let store = store::connect(&config).await.expect("store init failed");
    let port = config.port;
    let state = state::AppState::new(store, config);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "inkboard listening");
    axum::serve(listener, app).await.expect("server failed");
}

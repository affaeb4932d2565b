// OracleBook Confidential Market - Main Entry Point
// Encrypted bets, committee-verified settlement, escrow conservation

use axum::{
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::{Arc, Mutex}};
use tower_http::cors::{Any, CorsLayer};

// Module declarations
mod app_state;
mod auth;
mod confidential;
mod decryption;
mod escrow;
mod events;
mod gateway;
mod handlers;
mod models;
mod settlement;

use app_state::{AppState, SharedState};
use handlers::*;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    println!("\n═══════════════════════════════════════════════");
    println!("     OracleBook Confidential Market");
    println!("═══════════════════════════════════════════════\n");

    // Initialize application state
    let state: SharedState = Arc::new(Mutex::new(AppState::new()));

    // Clone state for shutdown handler before moving into router
    let shutdown_state = state.clone();

    // Build router with all endpoints
    let app = Router::new()
        // ===== MARKET ENDPOINTS =====
        .route("/markets", get(get_markets))
        .route("/markets", post(create_market))
        .route("/markets/:id", get(get_market))
        .route("/markets/:id/settle", post(settle_market))

        // ===== BETTING ENDPOINTS =====
        .route("/bets", post(place_bet))
        .route("/bets/:account", get(get_user_bets))
        .route("/tickets/:id", get(get_ticket))
        .route("/tickets/:id/claim", post(claim_payout))

        // ===== GATEWAY ENDPOINTS =====
        .route("/gateway/callback", post(decryption_callback))
        .route("/gateway/pending", get(get_pending_decryptions))
        .route("/encrypt", post(encrypt_bet))

        // ===== ACCOUNT & ROLE ENDPOINTS =====
        .route("/accounts/connect", post(connect_account))
        .route("/balance/:account", get(get_balance))
        .route("/roles/grant", post(grant_role))
        .route("/roles/revoke", post(revoke_role))

        // ===== EVENTS =====
        .route("/events", get(get_events))

        // ===== HEALTH CHECK =====
        .route("/", get(health_check))
        .route("/health", get(health_check))

        // Apply CORS and state
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], 4004));
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();

    // Spawn shutdown handler
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");

        tracing::info!("shutdown signal received, saving state");
        if let Ok(app_state) = shutdown_state.lock() {
            if let Err(e) = app_state.save_to_disk() {
                tracing::error!("failed to save state: {}", e);
            } else {
                tracing::info!("state saved");
            }
        }
        std::process::exit(0);
    });

    axum::serve(listener, app).await.unwrap();
}

async fn health_check() -> &'static str {
    "OracleBook Confidential Market - Online"
}

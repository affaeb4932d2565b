// HTTP request handlers for the OracleBook API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde_json::{json, Value};

use crate::app_state::{SharedState, STARTER_BALANCE};
use crate::auth::generate_wallet_address;
use crate::confidential::{compute_commitment, InputProof};
use crate::escrow::EscrowLedger;
use crate::models::*;
use crate::settlement::{EngineError, ErrorKind};

/// Map an engine error onto an HTTP status. Protocol and concurrency
/// rejections are conflicts; authorization failures stay distinguishable so
/// operators can alert on them separately.
fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::MarketNotFound(_) | EngineError::TicketNotFound(_) => StatusCode::NOT_FOUND,
        _ => match err.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authorization => StatusCode::UNAUTHORIZED,
            ErrorKind::Protocol => StatusCode::CONFLICT,
            ErrorKind::Concurrency => StatusCode::CONFLICT,
        },
    }
}

fn error_body(err: &EngineError) -> Json<Value> {
    Json(json!({
        "success": false,
        "error": err.to_string(),
        "kind": err.kind().as_str(),
    }))
}

// ===== ACCOUNTS =====

pub async fn connect_account(
    State(state): State<SharedState>,
    Json(request): Json<ConnectAccountRequest>,
) -> Json<ConnectAccountResponse> {
    let mut app_state = state.lock().unwrap();

    let address = request.address.unwrap_or_else(|| {
        generate_wallet_address(request.username.as_deref().unwrap_or("anonymous"))
    });

    let is_new_account = !app_state.escrow.lock().unwrap().has_account(&address);
    if is_new_account {
        app_state.escrow.lock().unwrap().register(&address, STARTER_BALANCE);
        app_state.log_activity("CONNECT", &format!("funded new account {}", address));
    }
    let balance = app_state.escrow.lock().unwrap().balance(&address);

    Json(ConnectAccountResponse { success: true, address, balance, is_new_account })
}

pub async fn get_balance(
    State(state): State<SharedState>,
    Path(account): Path<String>,
) -> Json<Value> {
    let app_state = state.lock().unwrap();
    let balance = app_state.escrow.lock().unwrap().balance(&account);
    Json(json!({ "account": account, "balance": balance }))
}

// ===== MARKETS =====

pub async fn get_markets(State(state): State<SharedState>) -> Json<Value> {
    let app_state = state.lock().unwrap();
    let markets: Vec<Value> = app_state
        .engine
        .markets()
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "outcome_count": m.outcome_count,
                "start_time": m.start_time,
                "lock_time": m.lock_time,
                "state": m.state().as_str(),
                "escrow_balance": m.escrow_balance,
                "settled": m.settled,
                "ticket_count": app_state.engine.tickets_for_market(m.id).len(),
            })
        })
        .collect();

    Json(json!({ "markets": markets }))
}

pub async fn get_market(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let app_state = state.lock().unwrap();
    let market = app_state
        .engine
        .market(id)
        .map_err(|e| (status_for(&e), error_body(&e)))?;

    Ok(Json(json!({
        "id": market.id,
        "outcome_count": market.outcome_count,
        "start_time": market.start_time,
        "lock_time": market.lock_time,
        "state": market.state().as_str(),
        "settled": market.settled,
        "winning_outcome": market.winning_outcome,
        "escrow_balance": market.escrow_balance,
        "payout_ratio": market.payout_ratio,
        "decryption_pending": market.decryption_pending,
        "tickets": app_state.engine.tickets_for_market(id).len(),
    })))
}

pub async fn create_market(
    State(state): State<SharedState>,
    Json(request): Json<CreateMarketRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut app_state = state.lock().unwrap();

    app_state
        .engine
        .create_market(
            &request.caller,
            request.market_id,
            request.outcome_count,
            request.start_time,
            request.lock_time,
        )
        .map_err(|e| (status_for(&e), error_body(&e)))?;

    app_state.log_activity(
        "MARKET_CREATED",
        &format!("market {} by {}", request.market_id, request.caller),
    );
    Ok(Json(json!({ "success": true, "market_id": request.market_id })))
}

// ===== BETS =====

pub async fn place_bet(
    State(state): State<SharedState>,
    Json(request): Json<PlaceBetRequest>,
) -> Result<Json<PlaceBetResponse>, (StatusCode, Json<PlaceBetResponse>)> {
    let mut app_state = state.lock().unwrap();

    let proof = InputProof(request.input_proof.clone());
    let ticket_id = app_state
        .engine
        .place_bet(
            &request.bettor,
            request.market_id,
            request.encrypted_outcome,
            request.encrypted_stake,
            &proof,
            request.commitment,
            request.escrow_value,
        )
        .map_err(|e| (status_for(&e), Json(PlaceBetResponse::failure(&e.to_string()))))?;

    let new_balance = app_state.escrow.lock().unwrap().balance(&request.bettor);
    app_state.log_activity(
        "BET_PLACED",
        &format!(
            "ticket {} on market {} | {} escrowed {}",
            ticket_id, request.market_id, request.bettor, request.escrow_value
        ),
    );

    Ok(Json(PlaceBetResponse {
        success: true,
        ticket_id: Some(ticket_id),
        market_id: Some(request.market_id),
        escrowed_value: Some(request.escrow_value),
        new_balance: Some(new_balance),
        error: None,
    }))
}

pub async fn get_ticket(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let app_state = state.lock().unwrap();
    let ticket = app_state
        .engine
        .ticket(id)
        .map_err(|e| (status_for(&e), error_body(&e)))?;
    let ticket_state = app_state
        .engine
        .ticket_state(id)
        .map_err(|e| (status_for(&e), error_body(&e)))?;

    Ok(Json(json!({
        "ticket": ticket,
        "state": ticket_state.as_str(),
    })))
}

pub async fn get_user_bets(
    State(state): State<SharedState>,
    Path(account): Path<String>,
) -> Json<Value> {
    let app_state = state.lock().unwrap();
    let tickets = app_state.engine.tickets_for_bettor(&account);
    Json(json!({ "account": account, "tickets": tickets }))
}

// ===== SETTLEMENT & CLAIMS =====

pub async fn settle_market(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
    Json(request): Json<SettleMarketRequest>,
) -> Result<Json<InitiationResponse>, (StatusCode, Json<InitiationResponse>)> {
    let mut app_state = state.lock().unwrap();

    let request_id = app_state
        .engine
        .settle_market(&request.caller, id, request.winning_outcome)
        .map_err(|e| (status_for(&e), Json(InitiationResponse::failure(&e.to_string()))))?;

    app_state.log_activity(
        "SETTLEMENT_INITIATED",
        &format!("market {} outcome {} request {}", id, request.winning_outcome, request_id),
    );

    let auto_resolved = finish_initiation(&mut app_state, request_id)
        .map_err(|e| (status_for(&e), Json(InitiationResponse::failure(&e.to_string()))))?;

    Ok(Json(InitiationResponse {
        success: true,
        request_id: Some(request_id),
        auto_resolved,
        error: None,
    }))
}

pub async fn claim_payout(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<InitiationResponse>, (StatusCode, Json<InitiationResponse>)> {
    let mut app_state = state.lock().unwrap();

    let proof = InputProof(request.input_proof.clone());
    let request_id = app_state
        .engine
        .claim_payout(&request.caller, id, &proof)
        .map_err(|e| (status_for(&e), Json(InitiationResponse::failure(&e.to_string()))))?;

    app_state.log_activity(
        "CLAIM_INITIATED",
        &format!("ticket {} by {} request {}", id, request.caller, request_id),
    );

    let auto_resolved = finish_initiation(&mut app_state, request_id)
        .map_err(|e| (status_for(&e), Json(InitiationResponse::failure(&e.to_string()))))?;

    Ok(Json(InitiationResponse {
        success: true,
        request_id: Some(request_id),
        auto_resolved,
        error: None,
    }))
}

/// In mock mode the committee answer is produced and applied inline; against
/// a remote coprocessor the pending request is dispatched asynchronously and
/// the callback arrives later on /gateway/callback.
fn finish_initiation(
    app_state: &mut crate::app_state::AppState,
    request_id: u64,
) -> Result<bool, EngineError> {
    if app_state.auto_decrypt {
        app_state.resolve_inline(request_id)?;
        return Ok(true);
    }

    if !app_state.rpc.is_mock() {
        if let Some(request) = app_state.engine.decryption_request(request_id) {
            let handles = request.handles.clone();
            let rpc = app_state.rpc.clone();
            tokio::spawn(async move {
                if let Err(err) = rpc.dispatch_decryption(request_id, handles).await {
                    tracing::warn!(request_id, %err, "failed to dispatch decryption request");
                }
            });
        }
    }
    Ok(false)
}

// ===== DECRYPTION CALLBACK =====

pub async fn decryption_callback(
    State(state): State<SharedState>,
    Json(request): Json<CallbackRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut app_state = state.lock().unwrap();

    let cleartexts = hex::decode(request.cleartexts.trim_start_matches("0x")).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": format!("Invalid cleartexts hex: {}", e) })),
        )
    })?;

    app_state
        .engine
        .apply_decryption_callback(request.request_id, &cleartexts, &request.proof)
        .map_err(|e| (status_for(&e), error_body(&e)))?;

    app_state.log_activity(
        "CALLBACK_APPLIED",
        &format!("request {} resolved", request.request_id),
    );
    Ok(Json(json!({ "success": true, "request_id": request.request_id })))
}

pub async fn get_pending_decryptions(State(state): State<SharedState>) -> Json<Value> {
    let app_state = state.lock().unwrap();
    let pending: Vec<Value> = app_state
        .engine
        .pending_decryptions()
        .iter()
        .map(|r| {
            json!({
                "request_id": r.request_id,
                "kind": r.kind.as_str(),
                "subject_id": r.subject_id,
                "created_at": r.created_at,
            })
        })
        .collect();
    Json(json!({ "pending": pending }))
}

// ===== ROLES =====

pub async fn grant_role(
    State(state): State<SharedState>,
    Json(request): Json<RoleRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut app_state = state.lock().unwrap();

    app_state
        .roles
        .lock()
        .unwrap()
        .grant_role(&request.caller, &request.account, request.role)
        .map_err(|e| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": e.to_string(), "kind": "authorization" })),
            )
        })?;

    app_state.log_activity(
        "ROLE_GRANTED",
        &format!("{} -> {} by {}", request.role, request.account, request.caller),
    );
    Ok(Json(json!({ "success": true })))
}

pub async fn revoke_role(
    State(state): State<SharedState>,
    Json(request): Json<RoleRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut app_state = state.lock().unwrap();

    app_state
        .roles
        .lock()
        .unwrap()
        .revoke_role(&request.caller, &request.account, request.role)
        .map_err(|e| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": e.to_string(), "kind": "authorization" })),
            )
        })?;

    app_state.log_activity(
        "ROLE_REVOKED",
        &format!("{} from {} by {}", request.role, request.account, request.caller),
    );
    Ok(Json(json!({ "success": true })))
}

// ===== MOCK-MODE INPUT ENCRYPTION =====

/// Local-mode convenience: build an encrypted (outcome, stake) pair plus
/// commitment, standing in for the wallet-side input builder.
pub async fn encrypt_bet(
    State(state): State<SharedState>,
    Json(request): Json<EncryptBetRequest>,
) -> Result<Json<EncryptBetResponse>, (StatusCode, Json<EncryptBetResponse>)> {
    let app_state = state.lock().unwrap();

    if !app_state.auto_decrypt {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(EncryptBetResponse::failure(
                "input encryption is only served in mock mode; use your wallet's input builder",
            )),
        ));
    }

    let input = app_state.gateway.lock().unwrap().create_encrypted_input(
        &request.bettor,
        request.market_id,
        request.outcome,
        request.stake,
    );
    let commitment =
        compute_commitment(&input.outcome_handle, &input.stake_handle, &request.bettor);

    Ok(Json(EncryptBetResponse {
        success: true,
        encrypted_outcome: Some(input.outcome_handle),
        encrypted_stake: Some(input.stake_handle),
        input_proof: Some(input.proof.0),
        commitment: Some(commitment),
        error: None,
    }))
}

// ===== EVENTS & ACTIVITY =====

pub async fn get_events(State(state): State<SharedState>) -> Json<Value> {
    let app_state = state.lock().unwrap();
    Json(json!({
        "events": app_state.engine.events(),
        "activity": app_state.activity,
    }))
}

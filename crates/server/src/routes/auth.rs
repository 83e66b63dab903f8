//! Registration, verification, and login handlers.

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::PublicProfile;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    message: &'static str,
    verification_token: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    message: &'static str,
    session_token: String,
    referral_code: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    message: &'static str,
    session_token: String,
    profile: PublicProfile,
}

/// `POST /api/register`
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>)> {
    let registration = state.auth().register(&req.email, &req.password).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Verification code sent, check your email",
            verification_token: registration.verification_token.as_str().to_owned(),
        }),
    ))
}

/// `POST /api/verify`
pub async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>> {
    let session = state.auth().verify(&req.token, &req.code).await?;

    // The account just passed the verified flip, so the code is assigned.
    let referral_code = session
        .account
        .referral_code()
        .map(|c| c.as_str().to_owned())
        .ok_or_else(|| crate::error::AppError::Internal("verified account without code".into()))?;

    Ok(Json(VerifyResponse {
        message: "Account verified",
        session_token: session.token,
        referral_code,
    }))
}

/// `POST /api/login`
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let session = state.auth().login(&req.email, &req.password).await?;

    Ok(Json(LoginResponse {
        message: "Logged in",
        profile: session.account.profile(),
        session_token: session.token,
    }))
}

// Certificates: issuing, listing, PDF download and public verification.

use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use guildhall_core::certificates::{Certificate, CertificateVerification, IssueCertificateInput};

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/certificates", axum::routing::post(issue_certificate))
        .route("/api/me/certificates", get(my_certificates))
        .route("/api/certificates/verify/{code}", get(verify_certificate))
        .route("/api/certificates/{id}", get(get_certificate))
        .route("/api/certificates/{id}/pdf", get(certificate_pdf))
}

async fn issue_certificate(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<IssueCertificateInput>,
) -> Result<(StatusCode, Json<Certificate>), ApiError> {
    let cert = state
        .run(move |db| db.issue_certificate(&user, &input))
        .await?;
    Ok((StatusCode::CREATED, Json(cert)))
}

async fn my_certificates(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Certificate>>, ApiError> {
    Ok(Json(state.run(move |db| db.my_certificates(&user)).await?))
}

async fn get_certificate(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<Certificate>, ApiError> {
    Ok(Json(state.run(move |db| db.get_certificate(&user, &id)).await?))
}

async fn certificate_pdf(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> Result<Response, ApiError> {
    let public_url = state.config.server.public_url.clone();
    let filename = format!("certificate-{id}.pdf");
    let pdf = state
        .run(move |db| db.certificate_pdf(&user, &id, &public_url))
        .await?;
    Ok((
        [
            (CONTENT_TYPE, "application/pdf".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        pdf,
    )
        .into_response())
}

async fn verify_certificate(
    State(state): State<AppState>,
    ApiPath(code): ApiPath<String>,
) -> Result<Json<CertificateVerification>, ApiError> {
    Ok(Json(state.run(move |db| db.verify_certificate(&code)).await?))
}

//! Request handlers for the public HTTP surface.
//!
//! Each handler answers one route with a status code and a body, leaving
//! transport, routing and multipart decoding to the embedding web layer.
//!
//! | Method | Path                      | Handler                  |
//! |--------|---------------------------|--------------------------|
//! | GET    | /getRoots                 | [`get_roots`]            |
//! | GET    | /getName/:address         | [`get_name`]             |
//! | GET    | /getPrivateProof/:address | [`get_private_proof`]    |
//! | GET    | /getPublicProof/:address  | [`get_public_proof`]     |
//! | POST   | /uploadPrivateCSV         | [`upload_private_csv`]   |
//! | POST   | /uploadPublicCSV          | [`upload_public_csv`]    |
//! | PUT    | /regenerateMerkleRoot     | [`regenerate_merkle_root`] |

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::auth::AdminCredentials;
use crate::balance::Cohort;
use crate::error::Error;
use crate::service::AllowlistService;

#[derive(Debug, Clone, PartialEq)]
pub enum ApiBody {
    Json(Value),
    Text(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ApiBody,
}

impl ApiResponse {
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(json) => Self {
                status: 200,
                body: ApiBody::Json(json),
            },
            Err(e) => {
                error!(error = %e, "failed to encode response");
                Self::text(400, "Failed")
            }
        }
    }

    pub fn text(status: u16, message: &str) -> Self {
        Self {
            status,
            body: ApiBody::Text(message.to_string()),
        }
    }
}

impl From<Error> for ApiResponse {
    fn from(err: Error) -> Self {
        if err.status() >= 400 {
            error!(error = %err, "request failed");
        }
        Self::text(err.status(), err.public_message())
    }
}

/// Multipart upload fields.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub credentials: AdminCredentials,
    pub csv_file: Option<Vec<u8>>,
}

/// Lookups of an unparseable address answer like any unknown address.
fn lookup_miss(err: Error) -> ApiResponse {
    match err {
        Error::InvalidAddress(_) => ApiResponse::from(Error::not_found("unparseable address")),
        other => ApiResponse::from(other),
    }
}

pub fn get_roots(service: &AllowlistService) -> ApiResponse {
    match service.roots() {
        Ok(roots) => ApiResponse::json(&roots),
        Err(e) => e.into(),
    }
}

pub fn get_name(service: &AllowlistService, address: &str) -> ApiResponse {
    match service.name(address) {
        Ok(entry) => ApiResponse::json(&entry),
        Err(e) => lookup_miss(e),
    }
}

fn get_proof(service: &AllowlistService, cohort: Cohort, address: &str) -> ApiResponse {
    match service.proof(cohort, address) {
        Ok(proof) => ApiResponse::json(&proof),
        Err(e) => lookup_miss(e),
    }
}

pub fn get_private_proof(service: &AllowlistService, address: &str) -> ApiResponse {
    get_proof(service, Cohort::Private, address)
}

pub fn get_public_proof(service: &AllowlistService, address: &str) -> ApiResponse {
    get_proof(service, Cohort::Public, address)
}

async fn upload(service: &AllowlistService, cohort: Cohort, form: &UploadForm) -> ApiResponse {
    match service
        .ingest_upload(cohort, &form.credentials, form.csv_file.as_deref())
        .await
    {
        Ok(_) => {
            info!(%cohort, "source upload accepted");
            ApiResponse::text(200, &format!("Updated {cohort} CSV"))
        }
        Err(e) => e.into(),
    }
}

pub async fn upload_private_csv(service: &AllowlistService, form: &UploadForm) -> ApiResponse {
    upload(service, Cohort::Private, form).await
}

pub async fn upload_public_csv(service: &AllowlistService, form: &UploadForm) -> ApiResponse {
    upload(service, Cohort::Public, form).await
}

pub async fn regenerate_merkle_root(
    service: &AllowlistService,
    credentials: &AdminCredentials,
) -> ApiResponse {
    match service.regenerate_authorized(credentials).await {
        Ok(_) => ApiResponse {
            status: 200,
            body: ApiBody::Empty,
        },
        Err(e) => e.into(),
    }
}

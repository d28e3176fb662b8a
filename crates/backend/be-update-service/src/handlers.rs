use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use be_remote_db::{Client, Release, Update};
use be_storage::StoredArtifact;
use tracing::{debug, instrument, warn};
use update_models::{ReleaseSyncRecord, UpdateMetadata};
use uuid::Uuid;

use crate::{
    analytics,
    error::{UpdateServiceError, UpdateServiceResult},
    service::AppState,
    types::{
        ClientCreated, ClientHealth, CreateClientRequest, CreateReleaseRequest, ListQuery,
        PublicKeyResponse, UpdateClientRequest, UpdateDraft, UpdateMetadataPatch, WebhookDelivery,
    },
    utils::download_file_name,
};

type HandlerResult<T> = Result<Json<T>, UpdateServiceError>;

pub const SIGNATURE_ALGORITHM: &str = "RSA-PKCS1v15-SHA256";

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// Multipart upload: metadata text fields plus one `file` field.
///
/// The file is streamed straight into storage. If the version field arrives
/// first, a duplicate is rejected before any bytes are written.
#[instrument(skip_all)]
pub async fn upload_update(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Update>), UpdateServiceError> {
    let mut draft = UpdateDraft::default();
    let mut stored: Option<StoredArtifact> = None;

    let read = read_upload(&state, &mut multipart, &mut draft, &mut stored).await;

    let result = match (read, stored) {
        (Ok(()), Some(artifact)) => state.catalog.publish(draft.clone(), artifact).await,
        (Ok(()), None) => Err(UpdateServiceError::MissingFile),
        (Err(e), Some(artifact)) => {
            state.catalog.discard(&artifact).await;
            Err(e)
        }
        (Err(e), None) => Err(e),
    };

    match result {
        Ok(update) => Ok((StatusCode::CREATED, Json(update))),
        Err(e) => {
            warn!("Update upload rejected: {}", e);
            analytics::track_upload_failed(draft.version.as_deref(), error_kind(&e));
            Err(e)
        }
    }
}

async fn read_upload(
    state: &AppState,
    multipart: &mut Multipart,
    draft: &mut UpdateDraft,
    stored: &mut Option<StoredArtifact>,
) -> UpdateServiceResult<()> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if name.eq_ignore_ascii_case("file") {
            if stored.is_some() {
                return Err(UpdateServiceError::validation(
                    "only one file may be uploaded",
                ));
            }
            if let Some(version) = draft.version.as_deref() {
                state.catalog.ensure_version_free(version).await?;
            }
            let file_name = field.file_name().unwrap_or("update.bin").to_string();
            debug!("Receiving upload {}", file_name);
            let artifact = state
                .catalog
                .store_artifact(Box::pin(field), &file_name, &state.shutdown)
                .await?;
            *stored = Some(artifact);
        } else {
            let value = field.text().await?;
            draft.set_field(&name, value)?;
        }
    }
    Ok(())
}

fn error_kind(e: &UpdateServiceError) -> &'static str {
    match e {
        UpdateServiceError::InvalidVersion(_) => "invalid_version",
        UpdateServiceError::VersionExists(_) => "version_exists",
        UpdateServiceError::MissingFile => "missing_file",
        UpdateServiceError::Storage(_) => "storage_error",
        UpdateServiceError::Database(_) => "database_error",
        _ => "invalid_request",
    }
}

pub async fn list_updates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> HandlerResult<Vec<Update>> {
    Ok(Json(state.catalog.list(query.include_inactive).await?))
}

pub async fn get_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult<Update> {
    Ok(Json(state.catalog.get(id).await?))
}

pub async fn edit_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateMetadataPatch>,
) -> HandlerResult<Update> {
    Ok(Json(state.catalog.edit(id, body).await?))
}

pub async fn delete_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, UpdateServiceError> {
    state.catalog.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn download_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, UpdateServiceError> {
    let (update, reader) = state.catalog.download(id).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        download_file_name(&update.version)
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, reader.size.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(reader.stream),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Releases
// ---------------------------------------------------------------------------

pub async fn create_release(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateReleaseRequest>,
) -> Result<(StatusCode, Json<Release>), UpdateServiceError> {
    let release = state.releases.create(body).await?;
    Ok((StatusCode::CREATED, Json(release)))
}

pub async fn list_releases(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> HandlerResult<Vec<Release>> {
    Ok(Json(state.releases.list(query.include_inactive).await?))
}

pub async fn get_release(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult<Release> {
    Ok(Json(state.releases.get(id).await?))
}

pub async fn toggle_release(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult<Release> {
    Ok(Json(state.releases.toggle_active(id).await?))
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

pub async fn create_client(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateClientRequest>,
) -> Result<(StatusCode, Json<ClientCreated>), UpdateServiceError> {
    let created = state.clients.create(body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_clients(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> HandlerResult<Vec<Client>> {
    Ok(Json(state.clients.list(query.include_inactive).await?))
}

pub async fn get_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult<Client> {
    Ok(Json(state.clients.get(id).await?))
}

pub async fn update_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateClientRequest>,
) -> HandlerResult<Client> {
    Ok(Json(state.clients.update(id, body).await?))
}

pub async fn delete_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, UpdateServiceError> {
    state.clients.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn delivery_response(delivery: WebhookDelivery) -> Response {
    let status = if delivery.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(delivery)).into_response()
}

pub async fn test_client_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, UpdateServiceError> {
    Ok(delivery_response(state.clients.test_webhook(id).await?))
}

pub async fn notify_client(
    State(state): State<Arc<AppState>>,
    Path((id, release_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, UpdateServiceError> {
    Ok(delivery_response(
        state.clients.notify_release(id, release_id).await?,
    ))
}

pub async fn client_health(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult<ClientHealth> {
    Ok(Json(state.clients.check_health(id).await?))
}

// ---------------------------------------------------------------------------
// Sync feed
// ---------------------------------------------------------------------------

pub async fn active_release_feed(
    State(state): State<Arc<AppState>>,
) -> HandlerResult<Vec<ReleaseSyncRecord>> {
    let records = state.catalog.sync_records().await?;
    debug!("Serving {} active releases to sync", records.len());
    Ok(Json(records))
}

pub async fn update_metadata(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult<UpdateMetadata> {
    Ok(Json(state.catalog.metadata(id).await?))
}

pub async fn public_key(State(state): State<Arc<AppState>>) -> Json<PublicKeyResponse> {
    Json(PublicKeyResponse {
        algorithm: SIGNATURE_ALGORITHM.to_string(),
        public_key: state.catalog.store().authority().public_key_pem().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::to_bytes, http::Request};
    use be_remote_db::{Repositories, Repository};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::catalog::tests::{file_count, test_store};

    const BOUNDARY: &str = "X-UPDATE-BOUNDARY";

    fn app(repos: &Repositories) -> (tempfile::TempDir, Router) {
        let (dir, store) = test_store();
        let state = Arc::new(AppState::new(repos, store, CancellationToken::new()));
        (dir, crate::create_router(state))
    }

    fn multipart_body(fields: &[(&str, &str)], file: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(file) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"fw.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(file);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(fields: &[(&str, &str)], file: Option<&[u8]>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/updates")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields, file)))
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const METADATA: &[(&str, &str)] = &[
        ("version", "2.1.0"),
        ("title", "Firmware 2.1.0"),
        ("severity", "critical"),
        ("update_type", "security"),
        ("security_fixes", r#"["CVE-2026-1234"]"#),
    ];

    #[tokio::test]
    async fn upload_release_sync_and_download() {
        let repos = Repositories::in_memory();
        let (_dir, app) = app(&repos);

        let response = app
            .clone()
            .oneshot(upload(METADATA, Some(b"firmware image".as_slice())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let update: Update = json(response).await;
        assert_eq!(update.version, "2.1.0");
        assert!(update.is_security_update);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/releases",
                serde_json::json!({ "update_id": update.id, "is_mandatory": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let release: Release = json(response).await;

        let response = app
            .clone()
            .oneshot(get("/api/sync/releases/active"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let feed: Vec<serde_json::Value> = json(response).await;
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0]["releaseId"], release.id.to_string());
        assert_eq!(feed[0]["cveList"], "CVE-2026-1234");
        assert_eq!(feed[0]["severity"], "critical");
        assert_eq!(feed[0]["fileHash"], update.file_hash);

        let response = app
            .clone()
            .oneshot(get(&format!("/api/updates/{}/download", update.id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"update-2.1.0.bin\""
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"firmware image");

        let response = app
            .oneshot(get(&format!("/api/sync/updates/{}/metadata", update.id)))
            .await
            .unwrap();
        let metadata: UpdateMetadata = json(response).await;
        assert_eq!(metadata.signature, update.digital_signature);
    }

    #[tokio::test]
    async fn download_streams_large_artifact() {
        let repos = Repositories::in_memory();
        let (_dir, app) = app(&repos);
        let image: Vec<u8> = (0..512 * 1024u32).map(|i| (i % 251) as u8).collect();

        let response = app
            .clone()
            .oneshot(upload(METADATA, Some(image.as_slice())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let update: Update = json(response).await;
        assert_eq!(update.file_size, image.len() as i64);

        let response = app
            .oneshot(get(&format!("/api/updates/{}/download", update.id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            image.len().to_string()
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.len(), image.len());
        assert_eq!(&bytes[..], &image[..]);
    }

    #[tokio::test]
    async fn duplicate_upload_is_conflict_and_leaves_no_file() {
        let repos = Repositories::in_memory();
        let (dir, app) = app(&repos);

        let response = app
            .clone()
            .oneshot(upload(METADATA, Some(b"first".as_slice())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(upload(METADATA, Some(b"second".as_slice())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(file_count(&dir), 1);
    }

    #[tokio::test]
    async fn upload_without_file_or_with_bad_version() {
        let repos = Repositories::in_memory();
        let (dir, app) = app(&repos);

        let response = app.clone().oneshot(upload(METADATA, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(upload(METADATA, Some(b"".as_slice())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(upload(
                &[("title", "No version"), ("version", "two")],
                Some(b"bytes".as_slice()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(file_count(&dir), 0);
        assert!(repos.updates.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_update_in_use_is_conflict() {
        let repos = Repositories::in_memory();
        let (_dir, app) = app(&repos);

        let response = app
            .clone()
            .oneshot(upload(METADATA, Some(b"payload".as_slice())))
            .await
            .unwrap();
        let update: Update = json(response).await;
        app.clone()
            .oneshot(json_request(
                "POST",
                "/api/releases",
                serde_json::json!({ "update_id": update.id }),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/updates/{}", update.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn client_secret_only_returned_on_create() {
        let repos = Repositories::in_memory();
        let (_dir, app) = app(&repos);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/clients",
                serde_json::json!({
                    "name": "Plant C",
                    "webhook_url": "https://portal.example.com/api/webhooks/release-notification"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: serde_json::Value = json(response).await;
        assert!(created["webhook_secret"].as_str().is_some());

        let response = app
            .oneshot(get(&format!(
                "/api/clients/{}",
                created["id"].as_str().unwrap()
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let fetched: serde_json::Value = json(response).await;
        assert!(fetched.get("webhook_secret").is_none());
        assert_eq!(fetched["name"], "Plant C");
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let repos = Repositories::in_memory();
        let (_dir, app) = app(&repos);
        let id = Uuid::now_v7();

        for uri in [
            format!("/api/updates/{id}"),
            format!("/api/updates/{id}/download"),
            format!("/api/releases/{id}"),
            format!("/api/clients/{id}"),
            format!("/api/sync/updates/{id}/metadata"),
        ] {
            let response = app.clone().oneshot(get(&uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn public_key_is_served() {
        let repos = Repositories::in_memory();
        let (_dir, app) = app(&repos);

        let response = app.oneshot(get("/api/signing/public-key")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let key: PublicKeyResponse = json(response).await;
        assert!(key.public_key.starts_with("-----BEGIN RSA PUBLIC KEY-----"));
        assert_eq!(key.algorithm, SIGNATURE_ALGORITHM);
    }
}

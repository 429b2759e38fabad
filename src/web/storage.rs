use std::path::{Component, Path, PathBuf};

use axum::{
    Json,
    extract::{FromRequest, Multipart, Path as AxumPath, Query, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::web::{
    AppState, AuthUser,
    responses::{ApiError, ApiResult, Envelope, created, ok},
    uploads::{ImageFieldConfig, PendingImage, UploadError, UploadResult, read_image_form},
};

/// The only bucket clients may upload into.
pub const UPLOAD_BUCKET: &str = "edutrail";
/// URL prefix under which stored files are served.
pub const PUBLIC_PREFIX: &str = "uploads";

/// Local directory exposed read-only over HTTP.
#[derive(Clone, Debug)]
pub struct PublicDisk {
    root: PathBuf,
    base_url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoredFile {
    pub path: String,
    #[serde(rename = "publicUrl")]
    pub public_url: String,
}

impl PublicDisk {
    pub fn new(root: PathBuf, base_url: String) -> Self {
        Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Writes the image under `bucket` with a generated name.
    pub async fn store(&self, bucket: &str, image: &PendingImage) -> UploadResult<StoredFile> {
        let dir = self.root.join(bucket);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| UploadError::storage(format!("Could not create upload directory: {err}")))?;

        let name = format!("{}.{}", Uuid::new_v4().simple(), image.kind.extension());
        tokio::fs::write(dir.join(&name), &image.bytes)
            .await
            .map_err(|err| UploadError::storage(format!("Could not save file: {err}")))?;

        let path = format!("{bucket}/{name}");
        Ok(StoredFile {
            public_url: self.public_url(&path),
            path,
        })
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/{PUBLIC_PREFIX}/{}",
            self.base_url,
            path.trim_start_matches('/')
        )
    }

    /// Maps a stored relative path to disk, refusing anything that leaves the root.
    pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative.trim_start_matches('/'));
        let mut components = relative.components().peekable();
        components.peek()?;
        if components.all(|component| matches!(component, Component::Normal(_))) {
            Some(self.root.join(relative))
        } else {
            None
        }
    }
}

#[derive(Deserialize)]
pub struct PublicUrlQuery {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Serialize)]
pub struct PublicUrlPayload {
    #[serde(rename = "publicUrl")]
    public_url: String,
}

pub async fn upload(
    State(state): State<AppState>,
    user: AuthUser,
    AxumPath(bucket): AxumPath<String>,
    request: Request,
) -> ApiResult<(StatusCode, Json<Envelope<StoredFile>>)> {
    if bucket != UPLOAD_BUCKET {
        return Err(ApiError::NotFound);
    }

    // A body that is not multipart cannot carry the file at all.
    let multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|_| file_required())?;

    let form = read_image_form(multipart, ImageFieldConfig::required("file")).await?;
    let Some(image) = form.image else {
        return Err(file_required());
    };

    let stored = state.disk().store(UPLOAD_BUCKET, &image).await.map_err(|err| {
        error!(?err, user_id = user.id, "failed to persist upload");
        ApiError::from(err)
    })?;

    info!(user_id = user.id, path = %stored.path, original = %image.original_name, "stored upload");
    Ok(created(stored))
}

pub async fn public_url(
    State(state): State<AppState>,
    _user: AuthUser,
    AxumPath(bucket): AxumPath<String>,
    Query(query): Query<PublicUrlQuery>,
) -> ApiResult<Json<Envelope<PublicUrlPayload>>> {
    let path = query
        .path
        .map(|path| path.trim().trim_start_matches('/').to_string())
        .filter(|path| !path.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing path".to_string()))?;

    Ok(ok(PublicUrlPayload {
        public_url: state.disk().public_url(&bucket_path(&bucket, &path)),
    }))
}

fn file_required() -> ApiError {
    ApiError::field("file", "The file field is required.")
}

/// Stored paths already carry their bucket; bare names are placed inside it.
fn bucket_path(bucket: &str, path: &str) -> String {
    if path.starts_with(&format!("{bucket}/")) {
        path.to_string()
    } else {
        format!("{bucket}/{path}")
    }
}

pub async fn serve_file(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
) -> Result<Response, ApiError> {
    let file_path = state.disk().resolve(&path).ok_or(ApiError::NotFound)?;

    let bytes = match tokio::fs::read(&file_path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(err) => {
            error!(?err, file = %file_path.display(), "failed to read stored file");
            return Err(ApiError::internal("Could not read file"));
        }
    };

    Ok(([(header::CONTENT_TYPE, content_type_for(&file_path))], bytes).into_response())
}

fn content_type_for(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => mime::IMAGE_JPEG.to_string(),
        "png" => mime::IMAGE_PNG.to_string(),
        "webp" => "image/webp".to_string(),
        _ => mime::APPLICATION_OCTET_STREAM.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::uploads::{ImageKind, tests::png_bytes};
    use tempfile::tempdir;

    fn disk(root: &Path) -> PublicDisk {
        PublicDisk::new(root.to_path_buf(), "https://edutrail.example/".to_string())
    }

    #[tokio::test]
    async fn stores_png_and_resolves_public_url() {
        let dir = tempdir().expect("temp dir");
        let disk = disk(dir.path());
        let image = PendingImage {
            original_name: "cover.png".to_string(),
            kind: ImageKind::Png,
            bytes: png_bytes(1024 * 1024),
        };

        let stored = disk.store(UPLOAD_BUCKET, &image).await.expect("store");

        assert!(stored.path.starts_with("edutrail/"));
        assert!(stored.path.ends_with(".png"));
        assert_eq!(
            stored.public_url,
            format!("https://edutrail.example/uploads/{}", stored.path)
        );

        let on_disk = disk.resolve(&stored.path).expect("resolvable");
        let written = tokio::fs::read(on_disk).await.expect("read back");
        assert_eq!(written.len(), 1024 * 1024);
    }

    #[test]
    fn resolve_refuses_traversal() {
        let dir = tempdir().expect("temp dir");
        let disk = disk(dir.path());

        assert!(disk.resolve("../secret.txt").is_none());
        assert!(disk.resolve("edutrail/../../etc/passwd").is_none());
        assert!(disk.resolve("").is_none());
        assert_eq!(
            disk.resolve("/edutrail/a.png"),
            Some(dir.path().join("edutrail/a.png"))
        );
    }

    #[test]
    fn bucket_path_avoids_double_prefix() {
        assert_eq!(bucket_path("edutrail", "edutrail/a.png"), "edutrail/a.png");
        assert_eq!(bucket_path("edutrail", "a.png"), "edutrail/a.png");
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.webp")), "image/webp");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }
}

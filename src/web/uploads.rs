use std::{collections::HashMap, path::Path};

use axum::extract::Multipart;
use sanitize_filename::sanitize;

use crate::web::responses::ApiError;

/// Largest accepted image, 2048 KiB.
pub const MAX_IMAGE_BYTES: usize = 2048 * 1024;
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Result type used by the shared upload helpers.
pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadErrorKind {
    /// The client sent something unacceptable for `field`.
    Invalid { field: String },
    /// Persisting the upload failed on our side.
    Storage,
}

/// Error returned when validating or persisting uploaded files.
#[derive(Debug)]
pub struct UploadError {
    kind: UploadErrorKind,
    message: String,
}

impl UploadError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self {
            kind: UploadErrorKind::Invalid {
                field: field.to_string(),
            },
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self {
            kind: UploadErrorKind::Storage,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &UploadErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UploadError {}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err.kind {
            UploadErrorKind::Invalid { field } => ApiError::field(&field, err.message),
            UploadErrorKind::Storage => ApiError::Internal(err.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
}

impl ImageKind {
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Webp => "webp",
        }
    }

    /// Identifies the image format from its leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageKind::Jpeg)
        } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(ImageKind::Png)
        } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
            Some(ImageKind::Webp)
        } else {
            None
        }
    }
}

/// Expectations for the single image field of a form.
#[derive(Debug, Clone, Copy)]
pub struct ImageFieldConfig<'a> {
    pub field_name: &'a str,
    pub required: bool,
    pub max_bytes: usize,
}

impl<'a> ImageFieldConfig<'a> {
    pub fn required(field_name: &'a str) -> Self {
        Self {
            field_name,
            required: true,
            max_bytes: MAX_IMAGE_BYTES,
        }
    }

    pub fn optional(field_name: &'a str) -> Self {
        Self {
            required: false,
            ..Self::required(field_name)
        }
    }
}

/// A validated image held in memory until it is written to the public disk.
#[derive(Debug, Clone)]
pub struct PendingImage {
    pub original_name: String,
    pub kind: ImageKind,
    pub bytes: Vec<u8>,
}

/// Aggregated output of the multipart reader.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub image: Option<PendingImage>,
    pub text_fields: HashMap<String, Vec<String>>,
}

impl UploadOutcome {
    pub fn first_text(&self, field_name: &str) -> Option<&str> {
        self.text_fields
            .get(field_name)
            .and_then(|values| values.first().map(|s| s.as_str()))
    }
}

/// Reads a multipart form holding text fields and at most one image file.
pub async fn read_image_form(
    mut multipart: Multipart,
    config: ImageFieldConfig<'_>,
) -> UploadResult<UploadOutcome> {
    let mut outcome = UploadOutcome::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::invalid("body", format!("Malformed upload form: {err}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let value = field.text().await.map_err(|err| {
                UploadError::invalid(&field_name, format!("Could not read field: {err}"))
            })?;
            outcome
                .text_fields
                .entry(field_name)
                .or_default()
                .push(value);
            continue;
        };

        if field_name != config.field_name {
            return Err(UploadError::invalid(
                &field_name,
                format!("Unsupported file field `{field_name}`."),
            ));
        }
        if outcome.image.is_some() {
            return Err(UploadError::invalid(
                config.field_name,
                format!("Only one {} may be uploaded.", config.field_name),
            ));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|err| {
            UploadError::invalid(config.field_name, format!("Upload interrupted: {err}"))
        })? {
            if bytes.len() + chunk.len() > config.max_bytes {
                return Err(too_large(config));
            }
            bytes.extend_from_slice(&chunk);
        }

        let kind = validate_image(config, &file_name, &bytes)?;
        outcome.image = Some(PendingImage {
            original_name: sanitize(&file_name),
            kind,
            bytes,
        });
    }

    if config.required && outcome.image.is_none() {
        return Err(UploadError::invalid(
            config.field_name,
            format!("The {} field is required.", config.field_name),
        ));
    }

    Ok(outcome)
}

/// Checks size, declared extension and actual content of an uploaded image.
pub fn validate_image(
    config: ImageFieldConfig<'_>,
    file_name: &str,
    bytes: &[u8],
) -> UploadResult<ImageKind> {
    if bytes.len() > config.max_bytes {
        return Err(too_large(config));
    }

    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let not_an_image = || {
        UploadError::invalid(
            config.field_name,
            format!(
                "The {} field must be a file of type: {}.",
                config.field_name,
                IMAGE_EXTENSIONS.join(", ")
            ),
        )
    };

    if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(not_an_image());
    }

    ImageKind::sniff(bytes).ok_or_else(not_an_image)
}

fn too_large(config: ImageFieldConfig<'_>) -> UploadError {
    UploadError::invalid(
        config.field_name,
        format!(
            "The {} field must not be greater than {} kilobytes.",
            config.field_name,
            config.max_bytes / 1024
        ),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn png_bytes(len: usize) -> Vec<u8> {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.resize(len.max(bytes.len()), 0);
        bytes
    }

    #[test]
    fn accepts_one_megabyte_png() {
        let kind = validate_image(
            ImageFieldConfig::required("file"),
            "photo.PNG",
            &png_bytes(1024 * 1024),
        )
        .expect("valid png");
        assert_eq!(kind, ImageKind::Png);
    }

    #[test]
    fn rejects_three_megabyte_file() {
        let err = validate_image(
            ImageFieldConfig::required("file"),
            "photo.png",
            &png_bytes(3 * 1024 * 1024),
        )
        .unwrap_err();
        assert_eq!(
            err.kind(),
            &UploadErrorKind::Invalid {
                field: "file".to_string()
            }
        );
        assert!(err.message().contains("2048 kilobytes"));
    }

    #[test]
    fn rejects_gif() {
        let err = validate_image(
            ImageFieldConfig::required("file"),
            "anim.gif",
            b"GIF89a\x01\x00\x01\x00",
        )
        .unwrap_err();
        assert!(err.message().contains("jpg, jpeg, png, webp"));
    }

    #[test]
    fn rejects_disguised_content() {
        let err = validate_image(
            ImageFieldConfig::required("file"),
            "notes.png",
            b"plain text pretending",
        );
        assert!(err.is_err());
    }

    #[test]
    fn sniffs_supported_formats() {
        assert_eq!(ImageKind::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageKind::Jpeg));
        assert_eq!(
            ImageKind::sniff(b"RIFF\x24\x00\x00\x00WEBPVP8 "),
            Some(ImageKind::Webp)
        );
        assert_eq!(ImageKind::sniff(b"RIFF"), None);
    }

    #[test]
    fn storage_errors_map_to_internal() {
        let api: ApiError = UploadError::storage("disk full").into();
        assert!(matches!(api, ApiError::Internal(ref message) if message == "disk full"));
    }
}

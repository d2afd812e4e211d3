use crate::api::PipelineError;
use std::path::Path;

/// Maximum file size: 256 MB
pub const MAX_FILE_SIZE: usize = 256 * 1024 * 1024; // 256 MB

/// Content types by extension for the file kinds the analysis pipeline accepts
const EXTENSION_CONTENT_TYPES: &[(&str, &str)] = &[
    // Tabular
    ("csv", "text/csv"),
    ("tsv", "text/tab-separated-values"),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("json", "application/json"),
    ("txt", "text/plain"),
    // Documents
    ("pdf", "application/pdf"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    // Images
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
];

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for PipelineError {
    fn from(err: ValidationError) -> Self {
        PipelineError::InvalidFile(err.to_string())
    }
}

/// Validates file size against the empty-file rule and the maximum limit
pub fn validate_file_size(size: u64, max_size: usize) -> Result<(), ValidationError> {
    if size == 0 {
        return Err(ValidationError {
            code: "EMPTY_FILE",
            message: "No file selected or file is empty".to_string(),
        });
    }
    if size > max_size as u64 {
        return Err(ValidationError {
            code: "FILE_TOO_LARGE",
            message: format!(
                "File size {} bytes exceeds maximum allowed {} bytes ({} MB)",
                size,
                max_size,
                max_size / 1024 / 1024
            ),
        });
    }
    Ok(())
}

/// Checks that a declared content type is a syntactically valid MIME type
pub fn validate_content_type(content_type: &str) -> Result<(), ValidationError> {
    content_type
        .parse::<mime::Mime>()
        .map(|_| ())
        .map_err(|_| ValidationError {
            code: "INVALID_CONTENT_TYPE",
            message: format!("'{}' is not a valid content type", content_type),
        })
}

/// Reduces a filename to its final path component and replaces reserved characters
pub fn sanitize_filename(filename: &str) -> Result<String, ValidationError> {
    // Accept both separators regardless of platform
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .unwrap_or("");

    if name.is_empty() || name == "." || name == ".." {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        });
    }

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Stripping path components from filename: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    Ok(sanitized)
}

/// Best-effort content type: magic bytes first, then the file extension
pub fn detect_content_type(filename: &str, header: &[u8]) -> Option<&'static str> {
    if let Some(kind) = infer::get(header) {
        return Some(kind.mime_type());
    }

    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?
        .to_lowercase();

    EXTENSION_CONTENT_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, content_type)| *content_type)
}

/// Full validation pipeline run before a file enters negotiation.
/// Returns the sanitized filename.
pub fn validate_upload(
    filename: &str,
    content_type: Option<&str>,
    size: u64,
    max_size: usize,
) -> Result<String, ValidationError> {
    // 1. Size check (also rejects empty files)
    validate_file_size(size, max_size)?;

    // 2. Sanitize filename
    let sanitized_filename = sanitize_filename(filename)?;

    // 3. Declared content type must at least parse
    if let Some(ct) = content_type.filter(|ct| !ct.is_empty()) {
        validate_content_type(ct)?;
    }

    Ok(sanitized_filename)
}

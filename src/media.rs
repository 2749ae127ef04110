/// Supporting-document rules: accepted kinds, validation states, upload
/// constraints.

pub const TYPE_IDENTITY: &str = "identity";
pub const TYPE_INCOME_PROOF: &str = "income_proof";
pub const TYPE_RESIDENCE_PROOF: &str = "residence_proof";
pub const TYPE_BANK_STATEMENT: &str = "bank_statement";
pub const TYPE_CONTRACT: &str = "contract";
pub const TYPE_OTHER: &str = "other";

pub const ALLOWED_TYPES: &[&str] = &[
    TYPE_IDENTITY,
    TYPE_INCOME_PROOF,
    TYPE_RESIDENCE_PROOF,
    TYPE_BANK_STATEMENT,
    TYPE_CONTRACT,
    TYPE_OTHER,
];

/// Document types a dossier must carry before it counts as complete.
pub const REQUIRED_TYPES: &[&str] = &[
    TYPE_IDENTITY,
    TYPE_INCOME_PROOF,
    TYPE_RESIDENCE_PROOF,
    TYPE_BANK_STATEMENT,
];

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_VALIDATED: &str = "validated";
pub const STATUS_REJECTED: &str = "rejected";

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/gif",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

pub fn is_allowed_type(media_type: &str) -> bool {
    ALLOWED_TYPES.contains(&media_type)
}

pub fn is_allowed_mime(mime: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime)
}

pub fn storage_key(media_id: uuid::Uuid, file_name: &str) -> String {
    format!("media/{media_id}/{file_name}")
}

/// Strips path separators and control characters from client filenames
/// before they become storage keys.
pub fn sanitize_file_name(original: &str) -> String {
    let cleaned: String = original
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | '"' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.trim().is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

use std::path::{Component, Path};

use reelport_protocol::constants::ALLOWED_EXTENSIONS;

use crate::TransferError;

/// Validates an uploaded file name and returns its lowercased extension.
///
/// Rejects:
/// - Empty names
/// - Anything that is not a bare file name (separators, `..`, absolute
///   paths, Windows prefixes)
/// - Names without an extension from the allowed video-container set
pub fn validate_file_name(file_name: &str) -> Result<String, TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidName("empty file name".into()));
    }

    let path = Path::new(file_name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => {
            return Err(TransferError::InvalidName(format!(
                "not a bare file name: {file_name}"
            )));
        }
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .ok_or_else(|| TransferError::UnsupportedExtension(file_name.to_string()))?;

    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(TransferError::UnsupportedExtension(file_name.to_string()));
    }

    Ok(ext)
}

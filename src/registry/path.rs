// Path helpers for the slash-separated registry namespace

use crate::error::RegistryError;

/// Characters a single path segment may not contain
const FORBIDDEN_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

/// Maximum length of one path segment
const MAX_SEGMENT_LEN: usize = 768;

/// Validate a single path segment (a user id, a session id, a field name)
pub fn validate_segment(segment: &str) -> Result<(), RegistryError> {
    if segment.is_empty() {
        return Err(RegistryError::InvalidPath(
            "path segment must not be empty".to_string(),
        ));
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(RegistryError::InvalidPath(format!(
            "path segment too long ({} bytes, max {})",
            segment.len(),
            MAX_SEGMENT_LEN
        )));
    }
    if let Some(c) = segment.chars().find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control()) {
        return Err(RegistryError::InvalidPath(format!(
            "path segment '{}' contains forbidden character {:?}",
            segment, c
        )));
    }
    Ok(())
}

/// Split a path into validated segments. Leading and trailing slashes are
/// ignored; an empty path addresses the root.
pub fn segments(path: &str) -> Result<Vec<&str>, RegistryError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let parts: Vec<&str> = trimmed.split('/').collect();
    for part in &parts {
        validate_segment(part)?;
    }
    Ok(parts)
}

/// Append a validated child key to a parent path
pub fn child_path(parent: &str, key: &str) -> Result<String, RegistryError> {
    validate_segment(key)?;
    let parent = parent.trim_end_matches('/');
    if parent.is_empty() {
        Ok(key.to_string())
    } else {
        Ok(format!("{}/{}", parent, key))
    }
}

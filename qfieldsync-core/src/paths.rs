use std::path::{Component, Path, PathBuf};

use crate::CoreError;

const MAX_REMOTE_NAME_LEN: usize = 1024;

/// Converts a remote file name into a path relative to the checkout directory.
///
/// Rejects empty names, absolute paths, drive prefixes and `..` segments so a
/// download can never escape the checkout directory.
pub fn validate_remote_name(name: &str) -> Result<PathBuf, CoreError> {
    let unsafe_name = || CoreError::UnsafeRemoteName(name.to_owned());

    if name.is_empty()
        || name.len() > MAX_REMOTE_NAME_LEN
        || name.starts_with('/')
        || name.contains('\\')
        || name.chars().any(char::is_control)
    {
        return Err(unsafe_name());
    }

    let mut relative = PathBuf::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(unsafe_name()),
            _ => {}
        }
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => relative.push(part),
            _ => return Err(unsafe_name()),
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(unsafe_name());
    }
    Ok(relative)
}

/// Remote name for a path relative to the checkout directory.
pub fn remote_name_from_relative(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_names_become_relative_paths() {
        let path = validate_remote_name("data/layers/roads.gpkg").unwrap();
        assert_eq!(path, Path::new("data").join("layers").join("roads.gpkg"));
        assert_eq!(
            remote_name_from_relative(&path).as_deref(),
            Some("data/layers/roads.gpkg")
        );
    }

    #[test]
    fn escaping_names_are_rejected() {
        for name in ["", "/etc/passwd", "../secret", "a/../../b", "a\\b", ".", "a\nb"] {
            assert!(
                validate_remote_name(name).is_err(),
                "accepted unsafe name {name:?}"
            );
        }
    }

    #[test]
    fn redundant_separators_are_tolerated() {
        assert_eq!(
            validate_remote_name("./dcim//photo.jpg").unwrap(),
            Path::new("dcim").join("photo.jpg")
        );
    }
}

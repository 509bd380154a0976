//! flatfs Path Module
//!
//! Path normalization, splitting and name validation for paths inside a
//! flatfs image.
//!
//! Supports:
//! - Absolute paths (`/foo/bar`) rooted at the image's root directory
//! - Relative paths (`foo/bar`, `../baz`) interpreted against a current directory
//! - Normalization of `.`, `..` and duplicate slashes
//!
//! Paths are plain `/`-separated strings. Names are compared byte for byte;
//! there is no case folding.

/// Path separator
pub const SEPARATOR: char = '/';

/// Maximum name length in bytes, excluding the null terminator stored on disk
/// (the on-disk length byte counts the terminator, so it caps at 255).
pub const MAX_NAME: usize = 254;

/// Normalize a path string
///
/// - Removes duplicate slashes
/// - Resolves `.` and `..`
/// - Absolute paths cannot climb above `/` (`/..` is `/`)
/// - Relative paths keep leading `..` components
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return String::from(".");
    }

    let is_absolute = path.starts_with(SEPARATOR);
    let mut components: Vec<&str> = Vec::new();

    for part in path.split(SEPARATOR) {
        match part {
            "" | "." => continue,
            ".." => {
                if components.last().map_or(false, |last| *last != "..") {
                    components.pop();
                } else if !is_absolute {
                    components.push("..");
                }
                // Absolute and already at root: stay at root
            }
            _ => components.push(part),
        }
    }

    if is_absolute {
        if components.is_empty() {
            String::from("/")
        } else {
            format!("/{}", components.join("/"))
        }
    } else if components.is_empty() {
        String::from(".")
    } else {
        components.join("/")
    }
}

/// Split path into parent directory and final name
///
/// Trailing slashes are ignored. A bare name has parent `"."`; `"/name"` has
/// parent `"/"`. The root itself splits into `("/", "")`.
pub fn split(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches(SEPARATOR);

    if trimmed.is_empty() {
        return if path.starts_with(SEPARATOR) { ("/", "") } else { (".", "") };
    }

    if let Some(pos) = trimmed.rfind(SEPARATOR) {
        if pos == 0 {
            ("/", &trimmed[1..])
        } else {
            (&trimmed[..pos], &trimmed[pos + 1..])
        }
    } else {
        (".", trimmed)
    }
}

/// Get the final component of a path
pub fn filename(path: &str) -> Option<&str> {
    match split(path) {
        (_, "") => None,
        (_, name) => Some(name),
    }
}

/// Join two paths together
pub fn join(base: &str, component: &str) -> String {
    if component.starts_with(SEPARATOR) {
        // Component is absolute, use it directly
        return String::from(component);
    }

    if base.is_empty() || base == "." {
        return String::from(component);
    }

    if base.ends_with(SEPARATOR) {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Get path components, skipping empty ones
pub fn components(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty()).collect()
}

/// Check if path is absolute
pub fn is_absolute(path: &str) -> bool {
    path.starts_with(SEPARATOR)
}

/// Check if a name can be stored as a directory entry
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(SEPARATOR)
        && !name.contains('\0')
        && name.len() <= MAX_NAME
}

/// Display form of a directory path: `/` for the root, `/a/b/` otherwise
pub fn as_directory(path: &str) -> String {
    let normalized = normalize(path);
    if normalized == "/" {
        normalized
    } else {
        format!("{}/", normalized)
    }
}

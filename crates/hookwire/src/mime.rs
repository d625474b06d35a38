//! Content-type inference from path extensions.
//!
//! Lookups consult the configured overrides first, then the `mime_guess`
//! table, and finally fall back to a fixed default.

use std::collections::HashMap;

/// Content type used when nothing else can be inferred.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Resolves a content type for a request path or bare extension.
#[derive(Debug, Clone)]
pub struct MimeResolver {
    default: String,
    /// Keyed by lowercase extension without the leading dot
    overrides: HashMap<String, String>,
}

impl Default for MimeResolver {
    fn default() -> Self {
        Self {
            default: DEFAULT_MIME_TYPE.to_string(),
            overrides: HashMap::new(),
        }
    }
}

impl MimeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the fallback content type.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = default.into();
        self
    }

    /// Map an extension (with or without leading dot) to a content type,
    /// taking precedence over the built-in table.
    pub fn with_override(mut self, extension: &str, mime: impl Into<String>) -> Self {
        let key = extension.trim_start_matches('.').to_ascii_lowercase();
        self.overrides.insert(key, mime.into());
        self
    }

    /// The fallback content type.
    pub fn default_mime(&self) -> &str {
        &self.default
    }

    /// Resolve a content type, returning `None` when the extension is unknown.
    pub fn lookup(&self, path_or_extension: &str) -> Option<String> {
        let ext = extension_of(path_or_extension)?;
        if let Some(mime) = self.overrides.get(&ext) {
            return Some(mime.clone());
        }
        mime_guess::from_ext(&ext).first_raw().map(str::to_string)
    }

    /// Resolve a content type, falling back to the default.
    pub fn guess(&self, path_or_extension: &str) -> String {
        self.lookup(path_or_extension)
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Resolve a content type with the built-in table only.
pub fn guess_mime_type(path_or_extension: &str) -> String {
    MimeResolver::default().guess(path_or_extension)
}

/// Extract the lowercase extension of the last path segment.
///
/// Input without any `/` or `.` is taken to be a bare extension (`"json"`).
fn extension_of(path_or_extension: &str) -> Option<String> {
    let input = path_or_extension
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    if input.is_empty() {
        return None;
    }
    if !input.contains('/') && !input.contains('.') {
        return Some(input.to_ascii_lowercase());
    }

    let segment = input.rsplit('/').next().unwrap_or_default();
    let (stem, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() || (stem.is_empty() && !segment.starts_with('.')) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

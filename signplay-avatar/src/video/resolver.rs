//! Sign identifier to clip URI mapping

use std::collections::HashMap;
use std::path::PathBuf;

/// Maps a sign identifier to the URI of its clip
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, sign_id: &str) -> String;
}

/// `<root>/<sign_id>.<extension>`, with per-sign overrides
///
/// The identifier is used verbatim as the file stem.
#[derive(Debug, Clone)]
pub struct PathTemplateResolver {
    root: PathBuf,
    extension: String,
    overrides: HashMap<String, String>,
}

impl PathTemplateResolver {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            overrides: HashMap::new(),
        }
    }

    /// Route one sign to an explicit URI
    pub fn with_override(mut self, sign_id: impl Into<String>, uri: impl Into<String>) -> Self {
        self.overrides.insert(sign_id.into(), uri.into());
        self
    }
}

impl SourceResolver for PathTemplateResolver {
    fn resolve(&self, sign_id: &str) -> String {
        if let Some(uri) = self.overrides.get(sign_id) {
            return uri.clone();
        }
        let ext = self.extension.trim_start_matches('.');
        let file_name = if ext.is_empty() {
            sign_id.to_string()
        } else {
            format!("{}.{}", sign_id, ext)
        };
        self.root.join(file_name).to_string_lossy().into_owned()
    }
}

impl<F> SourceResolver for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn resolve(&self, sign_id: &str) -> String {
        self(sign_id)
    }
}

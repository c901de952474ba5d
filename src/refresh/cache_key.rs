use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a refreshable unit of synchronized data: an entity type plus
/// the scope it was fetched for.
///
/// Rendering is deterministic, so two keys built from the same parts are
/// equal and print identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// `CacheKey::new("module", ["course_1"])` renders as `module/course_1`.
    pub fn new<S: AsRef<str>>(entity_type: &str, scope: impl IntoIterator<Item = S>) -> Self {
        let mut key = escape(entity_type);
        for part in scope {
            key.push('/');
            key.push_str(&escape(part.as_ref()));
        }
        Self(key)
    }

    /// Key for an unscoped listing of `entity_type`.
    pub fn global(entity_type: &str) -> Self {
        Self::new::<&str>(entity_type, [])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn entity_type(&self) -> String {
        let end = self.0.find('/').unwrap_or(self.0.len());
        unescape(&self.0[..end])
    }
}

// Separators inside a part are escaped so ("a/b", "c") and ("a", "b/c")
// cannot collide.
fn escape(part: &str) -> String {
    part.replace('%', "%25").replace('/', "%2F")
}

fn unescape(part: &str) -> String {
    part.replace("%2F", "/").replace("%25", "%")
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

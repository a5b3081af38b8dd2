//! Resource path rewriting
//!
//! Maps references found in robot descriptions (relative paths, rooted paths,
//! `package://` URIs) to URLs served by the host under
//! `<base-url>files<working-path>/...`.

use parking_lot::RwLock;

use crate::constants::FILES_ROUTE;

/// Normalized absolute path prefix used as the root for relative references
///
/// Always starts with `/`. Only the filesystem root itself ends with `/`; an
/// empty working directory normalizes to it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkingPath(String);

impl WorkingPath {
    /// Normalize a raw working directory string
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.strip_suffix('/').unwrap_or(raw);
        if trimmed.starts_with('/') {
            Self(trimmed.to_string())
        } else {
            Self(format!("/{trimmed}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Prefix to join references onto (empty for the root)
    fn join_prefix(&self) -> &str {
        if self.is_root() { "" } else { &self.0 }
    }
}

impl std::fmt::Display for WorkingPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolver from description references to fetchable URLs
///
/// The working path is the only mutable field. It sits behind a lock so that
/// resolutions running on other threads always observe a whole value; writes
/// happen only through [`PathResolver::set_working_path`].
#[derive(Debug)]
pub struct PathResolver {
    base_url: String,
    working_path: RwLock<WorkingPath>,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new("/", "")
    }
}

impl PathResolver {
    /// Create a resolver for a file-serving root and working directory
    pub fn new(base_url: impl Into<String>, working_path: &str) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            working_path: RwLock::new(WorkingPath::new(working_path)),
        }
    }

    /// File-serving root, always ending with `/`
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn working_path(&self) -> WorkingPath {
        self.working_path.read().clone()
    }

    /// Replace the working directory (normalized)
    pub fn set_working_path(&self, raw: &str) {
        let normalized = WorkingPath::new(raw);
        tracing::debug!("Working path set to '{}'", normalized);
        *self.working_path.write() = normalized;
    }

    /// Directory a ROS package is assumed to live in
    ///
    /// There is no package registry: every package sits directly under the
    /// working directory.
    pub fn package_path(&self, package: &str) -> String {
        format!("{}/{}", self.working_path.read().join_prefix(), package)
    }

    /// Value of an `optenv` substitution
    ///
    /// The environment is never consulted; the default is returned as is.
    pub fn optenv<'a>(&self, _name: &str, default: &'a str) -> &'a str {
        default
    }

    /// Expand a `package://` URI into a path under the working directory
    ///
    /// Other references are returned unchanged.
    pub fn expand_package_uri(&self, reference: &str) -> String {
        match reference.strip_prefix("package://") {
            Some(rest) => {
                let (package, relative) = rest.split_once('/').unwrap_or((rest, ""));
                if relative.is_empty() {
                    self.package_path(package)
                } else {
                    format!("{}/{}", self.package_path(package), relative)
                }
            }
            None => reference.to_string(),
        }
    }

    /// Resolve a reference to the URL the host serves it from
    pub fn resolve(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return reference.to_string();
        }

        let expanded = self.expand_package_uri(reference);
        let path = expanded.strip_prefix("file://").unwrap_or(&expanded);
        let working_path = self.working_path.read();
        let prefix = working_path.join_prefix();

        // Only a rooted reference can already carry the working path
        let url = if path.starts_with('/') && path.starts_with(working_path.as_str()) {
            format!("{}{}{}", self.base_url, FILES_ROUTE, path)
        } else if path.starts_with('/') {
            format!("{}{}{}{}", self.base_url, FILES_ROUTE, prefix, path)
        } else {
            format!("{}{}{}/{}", self.base_url, FILES_ROUTE, prefix, path)
        };

        tracing::debug!("Resolved '{}' -> '{}'", reference, url);
        url
    }
}

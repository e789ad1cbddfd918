//! The layout capability: maps artifact/metadata coordinates to the relative
//! URIs a [`crate::transport::Transporter`] understands, and resolves where
//! a resource's external checksum sidecars live. Pluggable, interface only —
//! no concrete layout ships in this crate.

use crate::checksum::ChecksumAlgorithm;

/// Coordinates for the two kinds of resource this connector moves.
///
/// Closed set (per the distilled spec's "tagged variants where the set is
/// closed"): a repository connector only ever transfers artifacts or
/// metadata, never an open-ended resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Artifact {
        group_id: String,
        artifact_id: String,
        version: String,
        classifier: String,
        extension: String,
    },
    Metadata {
        group_id: String,
        artifact_id: Option<String>,
        version: Option<String>,
        file: String,
    },
}

/// Maps coordinates to URIs inside one repository. Implementations are
/// supplied by the caller; this crate never constructs one itself.
pub trait Layout: Send + Sync {
    /// Relative URI for `resource` inside the repository.
    fn location_for(&self, resource: &Resource) -> String;

    /// `REMOTE_EXTERNAL` checksum sidecar locations for a resource already
    /// resolved to `resource_uri`, one per configured algorithm that the
    /// layout chooses to publish sidecars for (a layout may skip algorithms
    /// it knows the repository never publishes).
    fn checksum_locations_for(
        &self,
        resource_uri: &str,
        algorithms: &[ChecksumAlgorithm],
    ) -> Vec<(ChecksumAlgorithm, String)>;
}

/// Default checksum-location strategy: one sidecar per algorithm at
/// `resource_uri + "." + extension`, which is how every real Maven-style
/// layout publishes them. Layouts can use this directly from
/// `checksum_locations_for` or override it entirely.
pub fn default_checksum_locations(
    resource_uri: &str,
    algorithms: &[ChecksumAlgorithm],
) -> Vec<(ChecksumAlgorithm, String)> {
    algorithms
        .iter()
        .map(|algo| (algo.clone(), format!("{resource_uri}.{}", algo.extension())))
        .collect()
}

/// Rejects a location a [`Layout`] returned if it would resolve outside the
/// repository root once joined against it, e.g. a `..`-escaping or
/// absolute-URL coordinate from a malformed or hostile artifact version.
/// Every location this crate hands to a transporter should pass this check
/// first.
pub fn is_safe_relative_location(repository_root: &url::Url, location: &str) -> bool {
    match repository_root.join(location) {
        Ok(joined) => joined.as_str().starts_with(repository_root.as_str()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_traversal_outside_repository_root() {
        let root = url::Url::parse("https://repo.example.com/maven2/").unwrap();
        assert!(is_safe_relative_location(&root, "com/example/thing/1.0/thing-1.0.jar"));
        assert!(!is_safe_relative_location(&root, "../../etc/passwd"));
    }
}

//! Release index model and URL resolution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{InstallError, InstallResult};

/// Registry manifest published at `{base}/{product}/index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseIndex {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub versions: BTreeMap<String, ReleaseVersion>,
}

/// One published version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseVersion {
    pub version: String,
    #[serde(default)]
    pub builds: Vec<ReleaseBuild>,
    /// Checksum manifest filename or URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasums: Option<String>,
}

/// A per-platform artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseBuild {
    pub os: String,
    pub arch: String,
    pub filename: String,
    /// Absolute URL, or a path relative to the version directory
    #[serde(default)]
    pub url: String,
}

/// Operating system and architecture in release naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Platform of the running process.
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new(os, arch)
    }
}

impl ReleaseIndex {
    pub fn parse(bytes: &[u8]) -> InstallResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Exact version lookup.
    pub fn version(&self, product: &str, version: &str) -> InstallResult<&ReleaseVersion> {
        self.versions
            .get(version)
            .ok_or_else(|| InstallError::VersionNotFound {
                product: product.to_string(),
                version: version.to_string(),
            })
    }
}

impl ReleaseVersion {
    pub fn find_build(&self, platform: &Platform) -> Option<&ReleaseBuild> {
        self.builds
            .iter()
            .find(|b| b.os == platform.os && b.arch == platform.arch)
    }
}

/// Append path segments to `base`, keeping whatever path it already has.
pub fn join_url(base: &str, segments: &[&str]) -> InstallResult<String> {
    let mut url = Url::parse(base).map_err(|e| InstallError::InvalidUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    url.path_segments_mut()
        .map_err(|_| InstallError::InvalidUrl {
            url: base.to_string(),
            reason: "URL cannot be a base".into(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

/// URL of the release index for `product`.
pub fn index_url(base: &str, product: &str) -> InstallResult<String> {
    join_url(base, &[product, "index.json"])
}

/// Resolve a build or checksum reference. Anything not starting with
/// `http` is a filename under `{base}/{product}/{version}/`.
pub fn resolve_reference(
    base: &str,
    product: &str,
    version: &str,
    reference: &str,
) -> InstallResult<String> {
    if reference.starts_with("http") {
        Ok(reference.to_string())
    } else {
        join_url(base, &[product, version, reference])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "name": "terraform",
        "versions": {
            "1.6.6": {
                "version": "1.6.6",
                "shasums": "terraform_1.6.6_SHA256SUMS",
                "builds": [
                    {"os": "linux", "arch": "amd64", "filename": "terraform_1.6.6_linux_amd64.zip", "url": "terraform_1.6.6_linux_amd64.zip"},
                    {"os": "linux", "arch": "arm64", "filename": "terraform_1.6.6_linux_arm64.zip", "url": "https://cdn.example/terraform_1.6.6_linux_arm64.zip"},
                    {"os": "darwin", "arch": "arm64", "filename": "terraform_1.6.6_darwin_arm64.zip", "url": ""}
                ]
            }
        }
    }"#;

    #[test]
    fn test_parse_and_lookup() {
        let index = ReleaseIndex::parse(INDEX.as_bytes()).unwrap();
        let version = index.version("terraform", "1.6.6").unwrap();
        assert_eq!(version.builds.len(), 3);
        assert_eq!(version.shasums.as_deref(), Some("terraform_1.6.6_SHA256SUMS"));

        assert!(matches!(
            index.version("terraform", "1.6.7"),
            Err(InstallError::VersionNotFound { .. })
        ));
    }

    /// Every build in the index is selectable by its exact os/arch pair.
    #[test]
    fn test_build_selection_matches_exactly() {
        let index = ReleaseIndex::parse(INDEX.as_bytes()).unwrap();
        let version = index.version("terraform", "1.6.6").unwrap();

        for build in &version.builds {
            let platform = Platform::new(build.os.clone(), build.arch.clone());
            assert_eq!(version.find_build(&platform), Some(build));
        }

        assert!(version.find_build(&Platform::new("windows", "amd64")).is_none());
        assert!(version.find_build(&Platform::new("linux", "386")).is_none());
    }

    #[test]
    fn test_malformed_index() {
        assert!(matches!(
            ReleaseIndex::parse(b"{not json"),
            Err(InstallError::IndexParse(_))
        ));
    }

    #[test]
    fn test_join_url_preserves_base_path() {
        assert_eq!(
            index_url("https://mirror.example/hashicorp", "terraform").unwrap(),
            "https://mirror.example/hashicorp/terraform/index.json"
        );
        assert_eq!(
            index_url("https://mirror.example/hashicorp/", "terraform").unwrap(),
            "https://mirror.example/hashicorp/terraform/index.json"
        );
        assert_eq!(
            index_url("https://releases.hashicorp.com", "terraform").unwrap(),
            "https://releases.hashicorp.com/terraform/index.json"
        );
    }

    #[test]
    fn test_resolve_reference() {
        let base = "https://mirror.example/releases";
        assert_eq!(
            resolve_reference(base, "terraform", "1.6.6", "terraform_1.6.6_linux_amd64.zip").unwrap(),
            "https://mirror.example/releases/terraform/1.6.6/terraform_1.6.6_linux_amd64.zip"
        );
        assert_eq!(
            resolve_reference(base, "terraform", "1.6.6", "https://cdn.example/t.zip").unwrap(),
            "https://cdn.example/t.zip"
        );
    }

    #[test]
    fn test_current_platform_uses_release_names() {
        let platform = Platform::current();
        assert_ne!(platform.os, "macos");
        assert_ne!(platform.arch, "x86_64");
        assert_ne!(platform.arch, "aarch64");
    }
}

//! Install orchestration: resolve, download, verify, extract.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use url::Url;

use crate::checksum;
use crate::error::{InstallError, InstallResult};
use crate::extract::{self, executable_name};
use crate::index::{self, Platform, ReleaseIndex};
use crate::retry::{retry, Cancellation, RetryPolicy};
use crate::spec::InstallSpec;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

/// Something that can put the tool binary on disk.
#[async_trait]
pub trait ToolInstaller: Send + Sync {
    /// Install according to `spec` and return the absolute executable path.
    async fn install(&self, spec: &InstallSpec, cancel: &Cancellation) -> InstallResult<PathBuf>;
}

/// Downloaded archive held in a temporary file inside the install directory.
///
/// The file is removed when this value is dropped, whatever the outcome.
#[derive(Debug)]
pub struct DownloadArtifact {
    filename: String,
    file: NamedTempFile,
}

impl DownloadArtifact {
    pub fn create(install_dir: &Path, filename: &str) -> InstallResult<Self> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{filename}.tmp-"))
            .tempfile_in(install_dir)?;
        Ok(Self {
            filename: filename.to_string(),
            file,
        })
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> InstallResult<()> {
        let file = self.file.as_file_mut();
        file.write_all(bytes)?;
        file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

/// Where the artifact comes from once the index has been consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedArtifact {
    url: String,
    filename: String,
    checksum_url: Option<String>,
}

/// Registry/archive based installer.
pub struct Installer {
    transport: Option<Arc<dyn HttpTransport>>,
    retry: RetryPolicy,
    platform: Platform,
    preinstalled: Option<PathBuf>,
}

impl Default for Installer {
    fn default() -> Self {
        Self::new()
    }
}

impl Installer {
    /// Installer using a reqwest client built from each spec.
    pub fn new() -> Self {
        Self {
            transport: None,
            retry: RetryPolicy::default(),
            platform: Platform::current(),
            preinstalled: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Copy this binary instead of downloading when it exists.
    pub fn with_preinstalled(mut self, path: impl Into<PathBuf>) -> Self {
        self.preinstalled = Some(path.into());
        self
    }

    fn transport_for(&self, spec: &InstallSpec) -> InstallResult<Arc<dyn HttpTransport>> {
        match &self.transport {
            Some(transport) => Ok(transport.clone()),
            None => Ok(Arc::new(ReqwestTransport::from_spec(spec)?)),
        }
    }

    /// GET with retries. Non-2xx responses become errors; 5xx ones are retried.
    async fn fetch(
        &self,
        transport: &Arc<dyn HttpTransport>,
        spec: &InstallSpec,
        url: &str,
        cancel: &Cancellation,
    ) -> InstallResult<Vec<u8>> {
        let request = HttpRequest::get(url).authorization(spec.auth_token.clone());

        let response: HttpResponse = retry(&self.retry, cancel, url, |attempt| {
            let transport = transport.clone();
            let request = request.clone();
            async move {
                debug!("GET {} (attempt {})", request.url, attempt);
                let response = transport.get(&request).await?;
                if !response.is_success() {
                    return Err(InstallError::Http {
                        status: response.status,
                        url: request.url.clone(),
                    });
                }
                Ok(response)
            }
        })
        .await?;

        Ok(response.body)
    }

    async fn resolve(
        &self,
        transport: &Arc<dyn HttpTransport>,
        spec: &InstallSpec,
        cancel: &Cancellation,
    ) -> InstallResult<ResolvedArtifact> {
        if let Some(archive_url) = &spec.archive_url {
            return Ok(ResolvedArtifact {
                url: archive_url.clone(),
                filename: filename_from_url(archive_url)?,
                checksum_url: None,
            });
        }

        let (Some(base), Some(version)) = (spec.base_url.as_deref(), spec.version.as_deref()) else {
            return Err(InstallError::InvalidSpec(
                "version and base URL are required without an archive URL".into(),
            ));
        };

        let index_url = index::index_url(base, &spec.product)?;
        info!("Fetching release index from {}", index_url);
        let body = self.fetch(transport, spec, &index_url, cancel).await?;
        let release_index = ReleaseIndex::parse(&body)?;

        let release = release_index.version(&spec.product, version)?;
        let build = release
            .find_build(&self.platform)
            .ok_or_else(|| InstallError::NoCompatibleBuild {
                product: spec.product.clone(),
                version: version.to_string(),
                os: self.platform.os.clone(),
                arch: self.platform.arch.clone(),
            })?;

        let reference = if build.url.is_empty() {
            build.filename.as_str()
        } else {
            build.url.as_str()
        };
        let url = index::resolve_reference(base, &spec.product, version, reference)?;
        let checksum_url = release
            .shasums
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| index::resolve_reference(base, &spec.product, version, s))
            .transpose()?;

        Ok(ResolvedArtifact {
            url,
            filename: build.filename.clone(),
            checksum_url,
        })
    }

    fn install_preinstalled(&self, source: &Path, spec: &InstallSpec) -> InstallResult<PathBuf> {
        let dest = extract::safe_destination(&spec.install_dir, &executable_name(&spec.product))?;
        info!("Using preinstalled binary {:?}", source);
        fs::copy(source, &dest)?;
        extract::set_executable(&dest)?;
        Ok(dest)
    }
}

#[async_trait]
impl ToolInstaller for Installer {
    async fn install(&self, spec: &InstallSpec, cancel: &Cancellation) -> InstallResult<PathBuf> {
        spec.validate()?;
        spec.validate_urls()?;
        fs::create_dir_all(&spec.install_dir)?;

        if let Some(source) = self.preinstalled.as_deref().filter(|p| p.is_file()) {
            return self.install_preinstalled(source, spec);
        }

        let transport = self.transport_for(spec)?;
        let artifact = self.resolve(&transport, spec, cancel).await?;
        info!("Downloading {} from {}", artifact.filename, artifact.url);

        let mut download = DownloadArtifact::create(&spec.install_dir, &artifact.filename)?;
        let body = self.fetch(&transport, spec, &artifact.url, cancel).await?;
        download.write_all(&body)?;

        if let Some(checksum_url) = &artifact.checksum_url {
            let manifest = self.fetch(&transport, spec, checksum_url, cancel).await?;
            checksum::verify_file(
                download.path(),
                &String::from_utf8_lossy(&manifest),
                download.filename(),
            )?;
            debug!("Checksum verified for {}", artifact.filename);
        }

        let path = extract::extract_executable(
            download.path(),
            &spec.install_dir,
            &executable_name(&spec.product),
        )?;
        info!("Installed {} at {:?}", spec.product, path);
        Ok(path)
    }
}

/// Last non-empty path segment of a URL.
fn filename_from_url(raw: &str) -> InstallResult<String> {
    let url = Url::parse(raw).map_err(|e| InstallError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| InstallError::InvalidSpec(format!("archive URL {raw} has no filename")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://dl.example/tools/terraform_1.6.6_linux_amd64.zip?sig=x").unwrap(),
            "terraform_1.6.6_linux_amd64.zip"
        );
        assert!(filename_from_url("https://dl.example/").is_err());
    }

    #[test]
    fn test_download_artifact_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = DownloadArtifact::create(dir.path(), "t.zip").unwrap();
        artifact.write_all(b"data").unwrap();
        let path = artifact.path().to_path_buf();
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("t.zip.tmp-"));

        drop(artifact);
        assert!(!path.exists());
    }
}

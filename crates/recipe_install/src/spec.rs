//! Install request description and validation.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{InstallError, InstallResult};

/// Public HashiCorp releases endpoint.
pub const DEFAULT_RELEASES_URL: &str = "https://releases.hashicorp.com";

/// Per-request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// What to install and where to get it from.
///
/// Either `version` together with `base_url`, or `archive_url`, must be set.
#[derive(Clone)]
pub struct InstallSpec {
    /// Product name, also the executable name inside the archive
    pub product: String,
    /// Exact version to look up in the release index
    pub version: Option<String>,
    /// Registry base URL serving `{product}/index.json`
    pub base_url: Option<String>,
    /// Direct archive URL; bypasses the release index
    pub archive_url: Option<String>,
    /// Full `Authorization` header value sent with every request
    pub auth_token: Option<String>,
    /// Extra CA certificate (PEM) trusted for registry requests
    pub ca_cert_pem: Option<Vec<u8>>,
    /// Disable TLS certificate verification
    pub skip_verify: bool,
    /// Per-request timeout
    pub timeout: Duration,
    /// Directory that receives the executable and temporary downloads
    pub install_dir: PathBuf,
}

impl fmt::Debug for InstallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallSpec")
            .field("product", &self.product)
            .field("version", &self.version)
            .field("base_url", &self.base_url)
            .field("archive_url", &self.archive_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("ca_cert_pem", &self.ca_cert_pem.as_ref().map(Vec::len))
            .field("skip_verify", &self.skip_verify)
            .field("timeout", &self.timeout)
            .field("install_dir", &self.install_dir)
            .finish()
    }
}

impl InstallSpec {
    pub fn new(product: impl Into<String>, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            product: product.into(),
            version: None,
            base_url: None,
            archive_url: None,
            auth_token: None,
            ca_cert_pem: None,
            skip_verify: false,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            install_dir: install_dir.into(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn archive_url(mut self, url: impl Into<String>) -> Self {
        self.archive_url = Some(url.into());
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn ca_cert(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_cert_pem = Some(pem.into());
        self
    }

    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.skip_verify = skip;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check required fields.
    pub fn validate(&self) -> InstallResult<()> {
        if self.product.trim().is_empty() {
            return Err(InstallError::InvalidSpec("product is required".into()));
        }
        if self.install_dir.as_os_str().is_empty() {
            return Err(InstallError::InvalidSpec("install directory is required".into()));
        }
        if self.archive_url.is_none() {
            if self.version.as_deref().map_or(true, |v| v.trim().is_empty()) {
                return Err(InstallError::InvalidSpec(
                    "version is required unless an archive URL is given".into(),
                ));
            }
            if self.base_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                return Err(InstallError::InvalidSpec(
                    "either a registry base URL or an archive URL is required".into(),
                ));
            }
        }
        Ok(())
    }

    /// Check URL schemes: https always, http only when verification is off.
    /// An archive URL must point at a `.zip` file.
    pub fn validate_urls(&self) -> InstallResult<()> {
        if let Some(base) = &self.base_url {
            self.check_scheme(base)?;
        }
        if let Some(archive) = &self.archive_url {
            let parsed = self.check_scheme(archive)?;
            if !parsed.path().to_ascii_lowercase().ends_with(".zip") {
                return Err(InstallError::InvalidUrl {
                    url: archive.clone(),
                    reason: "archive URL must point to a .zip file".into(),
                });
            }
        }
        Ok(())
    }

    fn check_scheme(&self, raw: &str) -> InstallResult<Url> {
        let parsed = Url::parse(raw).map_err(|e| InstallError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "https" => Ok(parsed),
            "http" if self.skip_verify => Ok(parsed),
            "http" => Err(InstallError::InvalidUrl {
                url: raw.to_string(),
                reason: "http is only allowed when TLS verification is skipped".into(),
            }),
            other => Err(InstallError::InvalidUrl {
                url: raw.to_string(),
                reason: format!("unsupported scheme {other}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_spec() -> InstallSpec {
        InstallSpec::new("terraform", "/tmp/install")
            .version("1.6.6")
            .base_url("https://registry.example/mirror")
    }

    #[test]
    fn test_registry_spec_is_valid() {
        assert!(registry_spec().validate().is_ok());
        assert!(registry_spec().validate_urls().is_ok());
    }

    #[test]
    fn test_archive_spec_does_not_need_version() {
        let spec = InstallSpec::new("terraform", "/tmp/install")
            .archive_url("https://downloads.example/terraform_1.6.6_linux_amd64.zip");
        assert!(spec.validate().is_ok());
        assert!(spec.validate_urls().is_ok());
    }

    #[test]
    fn test_missing_fields_rejected() {
        let no_product = InstallSpec::new("", "/tmp/install").version("1").base_url("https://x");
        assert!(matches!(no_product.validate(), Err(InstallError::InvalidSpec(_))));

        let no_dir = InstallSpec::new("terraform", "").version("1").base_url("https://x");
        assert!(matches!(no_dir.validate(), Err(InstallError::InvalidSpec(_))));

        let no_version = InstallSpec::new("terraform", "/tmp").base_url("https://x");
        assert!(matches!(no_version.validate(), Err(InstallError::InvalidSpec(_))));

        let no_source = InstallSpec::new("terraform", "/tmp").version("1.6.6");
        assert!(matches!(no_source.validate(), Err(InstallError::InvalidSpec(_))));
    }

    #[test]
    fn test_http_requires_skip_verify() {
        let spec = InstallSpec::new("terraform", "/tmp")
            .version("1.6.6")
            .base_url("http://registry.internal");
        assert!(matches!(spec.validate_urls(), Err(InstallError::InvalidUrl { .. })));
        assert!(spec.skip_verify(true).validate_urls().is_ok());
    }

    #[test]
    fn test_unsupported_scheme_and_non_zip_archive() {
        let ftp = InstallSpec::new("terraform", "/tmp").archive_url("ftp://host/terraform.zip");
        assert!(matches!(ftp.validate_urls(), Err(InstallError::InvalidUrl { .. })));

        let tarball = InstallSpec::new("terraform", "/tmp").archive_url("https://host/terraform.tar.gz");
        assert!(matches!(tarball.validate_urls(), Err(InstallError::InvalidUrl { .. })));
    }

    #[test]
    fn test_debug_redacts_token() {
        let spec = registry_spec().auth_token("Bearer s3cr3t");
        let rendered = format!("{spec:?}");
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("<redacted>"));
    }
}

//! Tool install resolution from engine and environment configuration.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use recipe_iac::resolve_secret;
use recipe_install::InstallSpec;

use crate::config::EngineConfig;
use crate::error::CoreResult;
use crate::options::ExecutionOptions;

/// Install directory inside an execution's working directory.
pub const INSTALL_DIR: &str = ".install";

/// Build the install request for `options`.
///
/// The environment's recipe configuration may pin a version, point at a
/// private releases API or archive, add a CA certificate and supply the
/// `Authorization` value for the registry. Anything left unset falls back to
/// the engine configuration. An archive URL replaces the version lookup.
pub fn resolve_install_spec(
    config: &EngineConfig,
    options: &ExecutionOptions,
    install_dir: &Path,
) -> CoreResult<InstallSpec> {
    let mut spec = InstallSpec::new(&config.tool.product, install_dir)
        .timeout(config.tool.request_timeout());

    let settings = options.env_config.terraform_version();
    let archive_url = settings
        .and_then(|s| s.releases_archive_url.as_deref())
        .filter(|u| !u.is_empty());

    match archive_url {
        Some(url) => spec = spec.archive_url(url),
        None => {
            let version = settings
                .and_then(|s| s.version.as_deref())
                .filter(|v| !v.is_empty())
                .unwrap_or(config.tool.version.as_str());
            let base_url = settings
                .and_then(|s| s.releases_api_base_url.as_deref())
                .filter(|u| !u.is_empty())
                .unwrap_or(config.tool.releases_url.as_str());
            spec = spec.version(version).base_url(base_url);
        }
    }

    if let Some(tls) = settings.and_then(|s| s.tls.as_ref()) {
        if let Some(reference) = &tls.ca_certificate {
            spec = spec.ca_cert(resolve_secret(&options.secrets, reference)?.as_bytes().to_vec());
        }
        spec = spec.skip_verify(tls.skip_verify);
    }

    if let Some(reference) = options
        .env_config
        .recipe_config
        .terraform
        .authentication
        .as_ref()
        .and_then(|a| a.token.as_ref())
    {
        let token = resolve_secret(&options.secrets, reference)?;
        debug!("Using registry authorization ({} bytes)", token.len());
        spec = spec.auth_token(token);
    }

    Ok(spec)
}

/// Removes the install directory when dropped, whatever the outcome.
#[derive(Debug)]
pub struct InstallDirGuard {
    path: PathBuf,
}

impl InstallDirGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallDirGuard {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed install directory {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove install directory {:?}: {}", self.path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use recipe_iac::recipe::{AuthenticationSettings, TlsSettings, VersionSettings};
    use recipe_iac::{IacError, SecretData, SecretMaterial, SecretReference};

    use super::*;
    use crate::error::CoreError;

    fn reference(key: &str) -> SecretReference {
        SecretReference {
            source: "registry".into(),
            key: key.into(),
        }
    }

    fn secrets() -> SecretMaterial {
        let mut secrets = SecretMaterial::new();
        secrets.insert(
            "registry".into(),
            SecretData {
                kind: "generic".into(),
                data: [
                    ("token".to_string(), "Bearer abc".to_string()),
                    ("ca".to_string(), "-----BEGIN CERTIFICATE-----".to_string()),
                ]
                .into(),
            },
        );
        secrets
    }

    #[test]
    fn test_defaults_from_engine_config() {
        let config = EngineConfig::default();
        let spec =
            resolve_install_spec(&config, &ExecutionOptions::default(), Path::new("/w/.install"))
                .unwrap();

        assert_eq!(spec.product, "terraform");
        assert_eq!(spec.version.as_deref(), Some("1.6.6"));
        assert_eq!(spec.base_url.as_deref(), Some("https://releases.hashicorp.com"));
        assert!(spec.archive_url.is_none());
        assert!(spec.auth_token.is_none());
        assert_eq!(spec.install_dir, PathBuf::from("/w/.install"));
    }

    #[test]
    fn test_environment_overrides() {
        let mut options = ExecutionOptions::default().secrets(secrets());
        let terraform = &mut options.env_config.recipe_config.terraform;
        terraform.version = Some(VersionSettings {
            version: Some("1.7.1".into()),
            releases_api_base_url: Some("https://mirror.example/releases".into()),
            releases_archive_url: None,
            tls: Some(TlsSettings {
                ca_certificate: Some(reference("ca")),
                skip_verify: true,
            }),
        });
        terraform.authentication = Some(AuthenticationSettings {
            token: Some(reference("token")),
        });

        let spec = resolve_install_spec(&EngineConfig::default(), &options, Path::new("/i")).unwrap();
        assert_eq!(spec.version.as_deref(), Some("1.7.1"));
        assert_eq!(spec.base_url.as_deref(), Some("https://mirror.example/releases"));
        assert_eq!(spec.auth_token.as_deref(), Some("Bearer abc"));
        assert!(spec.ca_cert_pem.is_some());
        assert!(spec.skip_verify);
    }

    #[test]
    fn test_archive_url_replaces_version_lookup() {
        let mut options = ExecutionOptions::default();
        options.env_config.recipe_config.terraform.version = Some(VersionSettings {
            version: Some("1.7.1".into()),
            releases_archive_url: Some("https://mirror.example/terraform_1.7.1_linux_amd64.zip".into()),
            ..Default::default()
        });

        let spec = resolve_install_spec(&EngineConfig::default(), &options, Path::new("/i")).unwrap();
        assert!(spec.version.is_none());
        assert!(spec.base_url.is_none());
        assert_eq!(
            spec.archive_url.as_deref(),
            Some("https://mirror.example/terraform_1.7.1_linux_amd64.zip")
        );
    }

    #[test]
    fn test_missing_token_secret() {
        let mut options = ExecutionOptions::default();
        options.env_config.recipe_config.terraform.authentication = Some(AuthenticationSettings {
            token: Some(reference("token")),
        });
        let err = resolve_install_spec(&EngineConfig::default(), &options, Path::new("/i")).unwrap_err();
        assert!(matches!(err, CoreError::Iac(IacError::MissingSecretSource(_))));
    }

    #[test]
    fn test_guard_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let install_dir = dir.path().join(INSTALL_DIR);
        fs::create_dir_all(&install_dir).unwrap();
        fs::write(install_dir.join("terraform"), "bin").unwrap();

        {
            let guard = InstallDirGuard::new(&install_dir);
            assert_eq!(guard.path(), install_dir);
        }
        assert!(!install_dir.exists());

        // Dropping a guard for a missing directory is fine.
        drop(InstallDirGuard::new(dir.path().join("never-created")));
    }
}

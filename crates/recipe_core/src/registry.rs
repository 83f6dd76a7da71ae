//! Tool CLI configuration for private registries.
//!
//! A `.terraformrc` in the working directory points provider downloads at a
//! network mirror and carries per-host credentials for private module
//! registries. Module sources cloned over git are rewritten to the private
//! host through a `.gitconfig` in the same directory. The tool finds both
//! through its environment, so nothing outside the working directory changes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, info, warn};

use recipe_iac::recipe::TerraformSettings;
use recipe_iac::{resolve_secret, SecretMaterial};

use crate::env::write_private;
use crate::error::{CoreError, CoreResult};

pub const TERRAFORM_RC: &str = ".terraformrc";
pub const GIT_CONFIG: &str = ".gitconfig";

/// Variable the tool reads its CLI configuration path from.
pub const CLI_CONFIG_VAR: &str = "TF_CLI_CONFIG_FILE";

/// Files written for one execution plus the variables that point at them.
///
/// The files are removed on [`cleanup`](Self::cleanup) or when dropped.
#[derive(Debug, Default)]
pub struct RegistryConfiguration {
    config_path: PathBuf,
    env: BTreeMap<String, String>,
    files: Vec<PathBuf>,
}

impl RegistryConfiguration {
    /// Write the registry configuration into `dir`.
    ///
    /// Returns `None` when neither a provider mirror nor a module registry
    /// is configured.
    pub fn configure(
        settings: &TerraformSettings,
        secrets: &SecretMaterial,
        dir: &Path,
    ) -> CoreResult<Option<Self>> {
        if settings.provider_mirror.is_none() && settings.module_registries.is_empty() {
            debug!("No provider mirror or module registries configured");
            return Ok(None);
        }

        let mut rc = String::new();
        let mut env = BTreeMap::new();

        if let Some(mirror) = &settings.provider_mirror {
            let url = mirror.url.trim().trim_end_matches('/');
            if url.is_empty() {
                return Err(CoreError::InvalidConfig(
                    "provider mirror url is required".into(),
                ));
            }
            info!("Installing providers from network mirror {}/", url);
            rc.push_str(&format!(
                "provider_installation {{\n  network_mirror {{\n    url = {}\n  }}\n}}\n",
                quote(&format!("{url}/"))
            ));
        }

        let mut credential_hosts = BTreeSet::new();
        let mut git = GitConfig::default();
        for (name, registry) in &settings.module_registries {
            let host = registry_host(&registry.url);
            if host.is_empty() {
                warn!("Module registry {} has no url, skipping", name);
                continue;
            }
            let Some(reference) = &registry.authentication.token else {
                debug!("Module registry {} has no token", name);
                continue;
            };
            let token = resolve_secret(secrets, reference)?;
            debug!("Module registry {} token ({} bytes)", name, token.len());

            let additional = registry
                .authentication
                .additional_hosts
                .iter()
                .map(|h| h.trim())
                .filter(|h| !h.is_empty() && *h != host);
            for (index, credential_host) in std::iter::once(host).chain(additional).enumerate() {
                if credential_hosts.insert(credential_host.to_string()) {
                    rc.push_str(&format!(
                        "\ncredentials {} {{\n  token = {}\n}}\n",
                        quote(credential_host),
                        quote(token)
                    ));
                    env.insert(token_var(credential_host), token.to_string());
                }
                git.add(strip_port(credential_host), token, index == 0);
            }
        }

        let config_path = dir.join(TERRAFORM_RC);
        write_private(&config_path, &rc)?;
        env.insert(
            CLI_CONFIG_VAR.to_string(),
            config_path.to_string_lossy().into_owned(),
        );
        // Removes the rc file again if the git config cannot be written.
        let mut config = Self {
            files: vec![config_path.clone()],
            config_path,
            env,
        };

        if !git.is_empty() {
            let git_path = dir.join(GIT_CONFIG);
            write_private(&git_path, &git.render())?;
            config.files.push(git_path.clone());
            config.env.insert(
                "GIT_CONFIG_GLOBAL".to_string(),
                git_path.to_string_lossy().into_owned(),
            );
            config
                .env
                .insert("HOME".to_string(), dir.to_string_lossy().into_owned());
            config
                .env
                .insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());
            info!("Configured git authentication for {} host(s)", git.hosts.len());
        }

        info!(
            "Wrote tool CLI configuration {:?} ({} credential host(s))",
            config.config_path,
            credential_hosts.len()
        );
        Ok(Some(config))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Variables to add to the tool environment.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Remove the written files. Safe to call more than once.
    pub fn cleanup(&mut self) {
        for path in self.files.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {:?}: {}", path, e),
            }
        }
    }
}

impl Drop for RegistryConfiguration {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Per-host git settings: clone rewrites and the auth header.
#[derive(Debug, Default)]
struct GitConfig {
    hosts: Vec<(String, String, bool)>,
}

impl GitConfig {
    fn add(&mut self, host: &str, token: &str, rewrite: bool) {
        let host = host.trim().trim_end_matches('/');
        if host.is_empty() || self.hosts.iter().any(|(h, _, _)| h == host) {
            return;
        }
        self.hosts.push((host.to_string(), token.to_string(), rewrite));
    }

    fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for (host, token, rewrite) in &self.hosts {
            if *rewrite {
                out.push_str(&format!(
                    "[url \"https://{host}/\"]\n\tinsteadOf = https://github.com/\n\n"
                ));
            }
            let basic = STANDARD.encode(format!("oauth2:{token}"));
            out.push_str(&format!(
                "[http \"https://{host}\"]\n\textraHeader = Authorization: Basic {basic}\n\n"
            ));
        }
        out
    }
}

/// Host part of a registry url: scheme and path dropped, port kept.
pub fn registry_host(url: &str) -> &str {
    let url = url.trim();
    let url = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    url.split('/').next().unwrap_or_default()
}

/// `TF_TOKEN_<host>` with dots and colons turned into underscores.
pub fn token_var(host: &str) -> String {
    format!("TF_TOKEN_{}", host.replace(['.', ':'], "_"))
}

fn strip_port(host: &str) -> &str {
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

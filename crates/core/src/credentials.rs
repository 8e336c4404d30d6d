//! Credential resolution for profile remotes.
//!
//! SSH profiles yield a private key file (materialized under the secure
//! directory when the key is stored inline); token profiles yield a remote
//! URL with the username and token embedded.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::errors::CredentialError;
use crate::models::{AuthType, Profile, SshKeyMode};

/// Authentication material ready for use by git commands.
#[derive(Clone, PartialEq, Eq)]
pub enum ResolvedAuth {
    /// Remote URL left as configured, private key file for `ssh -i`.
    Ssh { remote_url: String, key_path: PathBuf },
    /// Remote URL with percent-encoded credentials spliced in.
    Token { remote_url: String },
}

impl ResolvedAuth {
    pub fn remote_url(&self) -> &str {
        match self {
            Self::Ssh { remote_url, .. } | Self::Token { remote_url } => remote_url,
        }
    }
}

impl std::fmt::Debug for ResolvedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ssh { remote_url, key_path } => f
                .debug_struct("Ssh")
                .field("remote_url", remote_url)
                .field("key_path", key_path)
                .finish(),
            Self::Token { .. } => f.debug_struct("Token").finish_non_exhaustive(),
        }
    }
}

/// Deterministic location of a profile's materialized private key.
pub fn key_file_path(secure_dir: &Path, profile_id: &str) -> PathBuf {
    secure_dir.join(format!("git-{}.pem", profile_id))
}

/// Resolve the authentication material for `profile`.
///
/// Only inline ssh keys touch the filesystem; repeated calls overwrite the
/// same file.
pub async fn resolve(profile: &Profile, secure_dir: &Path) -> Result<ResolvedAuth, CredentialError> {
    match profile.auth_type {
        AuthType::Ssh => {
            let key_path = match profile.ssh_key_mode {
                SshKeyMode::Contents => {
                    let contents = non_empty(profile.ssh_key_content.as_deref()).ok_or(
                        CredentialError::MissingField {
                            field: "ssh_key_content",
                            auth_type: "ssh",
                        },
                    )?;
                    let path = key_file_path(secure_dir, &profile.id);
                    write_key_file(&path, contents).await.map_err(|source| {
                        CredentialError::KeyFile {
                            path: path.display().to_string(),
                            source,
                        }
                    })?;
                    info!(profile = %profile.id, path = %path.display(), "materialized ssh key");
                    path
                }
                SshKeyMode::Path => {
                    let path = non_empty(profile.ssh_key_path.as_deref()).ok_or(
                        CredentialError::MissingField {
                            field: "ssh_key_path",
                            auth_type: "ssh",
                        },
                    )?;
                    PathBuf::from(path)
                }
            };
            Ok(ResolvedAuth::Ssh {
                remote_url: profile.repo_url.clone(),
                key_path,
            })
        }
        AuthType::HttpsPat => {
            let username = non_empty(profile.username.as_deref()).ok_or(
                CredentialError::MissingField {
                    field: "username",
                    auth_type: "https_pat",
                },
            )?;
            let token = non_empty(profile.token.as_deref()).ok_or(CredentialError::MissingField {
                field: "token",
                auth_type: "https_pat",
            })?;
            let remote_url = embed_credentials(&profile.repo_url, username, token)?;
            debug!(profile = %profile.id, "resolved token credentials");
            Ok(ResolvedAuth::Token { remote_url })
        }
    }
}

/// Splice `username:token@` after the scheme of `repo_url`.
///
/// URLs without a scheme are treated as `https`.
pub fn embed_credentials(repo_url: &str, username: &str, token: &str) -> Result<String, CredentialError> {
    let with_scheme = if repo_url.contains("://") {
        repo_url.to_string()
    } else {
        format!("https://{}", repo_url)
    };

    let invalid = |detail: &str| CredentialError::InvalidUrl {
        url: repo_url.to_string(),
        detail: detail.to_string(),
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| invalid(&e.to_string()))?;
    url.set_username(username)
        .map_err(|_| invalid("url cannot carry a username"))?;
    url.set_password(Some(token))
        .map_err(|_| invalid("url cannot carry a password"))?;
    Ok(url.to_string())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

async fn write_key_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(dir).await?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents.trim_end().as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;

    // Pre-existing files keep their old mode on open.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

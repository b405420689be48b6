//! Writes issued certificates to disk.
//!
//! For an artifact name `svc` and the default naming the exporter produces
//! `svc.key` (PKCS#1 private key), `svc.crt` (certificate), `svc.pem`
//! (certificate then key) and, for leaves, `svc-ca.crt` (certificate then
//! issuer certificate). Every file is written through a temporary file in the
//! destination directory and renamed into place.

use crate::error::{Error, Result};
use crate::key::KeyPair;
use crate::x509::Certificate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactNaming {
    pub key_ext: String,
    pub cert_ext: String,
    pub pem_ext: String,
    pub ca_suffix: String,
}

impl Default for ArtifactNaming {
    fn default() -> Self {
        Self {
            key_ext: "key".to_string(),
            cert_ext: "crt".to_string(),
            pem_ext: "pem".to_string(),
            ca_suffix: "ca".to_string(),
        }
    }
}

/// Paths of one exported artifact set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSet {
    pub key: PathBuf,
    pub certificate: PathBuf,
    pub combined: PathBuf,
    pub chain: Option<PathBuf>,
}

impl ArtifactSet {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        [&self.key, &self.certificate, &self.combined]
            .into_iter()
            .map(PathBuf::as_path)
            .chain(self.chain.as_deref())
    }
}

/// One file that could not be written.
#[derive(Debug)]
pub struct ArtifactFailure {
    pub path: PathBuf,
    pub source: io::Error,
}

impl ArtifactFailure {
    pub(crate) fn join(failures: &[ArtifactFailure]) -> String {
        failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for ArtifactFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.source)
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactExporter {
    directory: PathBuf,
    naming: ArtifactNaming,
}

impl ArtifactExporter {
    pub fn new(directory: impl Into<PathBuf>, naming: ArtifactNaming) -> Self {
        Self {
            directory: directory.into(),
            naming,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn naming(&self) -> &ArtifactNaming {
        &self.naming
    }

    pub fn paths(&self, base_name: &str, with_chain: bool) -> ArtifactSet {
        let naming = &self.naming;
        ArtifactSet {
            key: self.directory.join(format!("{}.{}", base_name, naming.key_ext)),
            certificate: self.directory.join(format!("{}.{}", base_name, naming.cert_ext)),
            combined: self.directory.join(format!("{}.{}", base_name, naming.pem_ext)),
            chain: with_chain.then(|| {
                self.directory
                    .join(format!("{}-{}.{}", base_name, naming.ca_suffix, naming.cert_ext))
            }),
        }
    }

    /// Writes the artifact set for `base_name`. The chain file is written
    /// only when `issuer` is given. Every file is attempted; failures are
    /// returned together as [`Error::ArtifactWrite`].
    pub fn export(
        &self,
        base_name: &str,
        key_pair: &KeyPair,
        certificate: &Certificate,
        issuer: Option<&Certificate>,
    ) -> Result<ArtifactSet> {
        validate_base_name(base_name)?;

        let key_pem = key_pair.private_key_pem()?;
        let cert_pem = certificate.to_pem()?;
        let combined = format!("{}{}", cert_pem, key_pem);
        let chain = issuer
            .map(|issuer| issuer.to_pem().map(|issuer_pem| format!("{}{}", cert_pem, issuer_pem)))
            .transpose()?;

        let artifacts = self.paths(base_name, chain.is_some());

        fs::create_dir_all(&self.directory).map_err(|source| {
            Error::ArtifactWrite(vec![ArtifactFailure {
                path: self.directory.clone(),
                source,
            }])
        })?;

        let mut writes = vec![
            (&artifacts.key, key_pem.as_str(), FileMode::Private),
            (&artifacts.certificate, cert_pem.as_str(), FileMode::Public),
            (&artifacts.combined, combined.as_str(), FileMode::Private),
        ];
        if let (Some(path), Some(contents)) = (&artifacts.chain, &chain) {
            writes.push((path, contents.as_str(), FileMode::Public));
        }

        let failures: Vec<ArtifactFailure> = writes
            .into_iter()
            .filter_map(|(path, contents, mode)| {
                write_atomic(&self.directory, path, contents, mode)
                    .map_err(|source| ArtifactFailure {
                        path: path.clone(),
                        source,
                    })
                    .err()
            })
            .collect();

        if !failures.is_empty() {
            return Err(Error::ArtifactWrite(failures));
        }

        info!(name = base_name, dir = %self.directory.display(), "wrote artifacts");
        Ok(artifacts)
    }
}

fn validate_base_name(base_name: &str) -> Result<()> {
    if base_name.is_empty() || base_name == "." || base_name == ".." {
        return Err(Error::InvalidInput(format!("invalid artifact name '{}'", base_name)));
    }
    if base_name.contains(['/', '\\']) {
        return Err(Error::InvalidInput(format!(
            "artifact name '{}' must not contain path separators",
            base_name
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum FileMode {
    Private,
    Public,
}

fn write_atomic(directory: &Path, path: &Path, contents: &str, mode: FileMode) -> io::Result<()> {
    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(contents.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let bits = match mode {
            FileMode::Private => 0o600,
            FileMode::Public => 0o644,
        };
        file.as_file().set_permissions(fs::Permissions::from_mode(bits))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), "wrote file");
    Ok(())
}

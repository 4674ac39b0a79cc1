//! On-disk PEM projections of a credential, used by the TLS client.
//!
//! Material lives under `<root>/<tax id>/certs/`, where `<root>` defaults to
//! `nfse-<user>` inside the OS temp directory. Several processes may
//! share that directory: file names are random and created with `create_new`,
//! and every release sweeps files older than the retention window no matter
//! who wrote them. No lock is taken, so a sweep can in theory remove a file
//! another process is still using once it is older than the window.
use rand::{distributions::Alphanumeric, Rng};
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    config::Config,
    credential::{Credential, CredentialError},
};

const CERTS_DIR: &str = "certs";
const INITIAL_NAME_LEN: usize = 10;
const NAME_LEN_STEP: usize = 5;

/// Errors that prevent credential material from being written.
#[derive(Debug, Error)]
pub enum MaterialError {
    #[error("could not determine CNPJ or CPF from the certificate")]
    MissingTaxId,
    #[error("failed to write credential material at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Paths of the three PEM artifacts written for one credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialMaterial {
    tax_id: String,
    dir: PathBuf,
    private_key: PathBuf,
    public_key: PathBuf,
    combined: PathBuf,
}

impl CredentialMaterial {
    pub fn tax_id(&self) -> &str {
        &self.tax_id
    }

    /// The `certs` directory holding the artifacts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn private_key_path(&self) -> &Path {
        &self.private_key
    }

    pub fn public_key_path(&self) -> &Path {
        &self.public_key
    }

    /// Private key followed by the certificate chain.
    pub fn combined_path(&self) -> &Path {
        &self.combined
    }

    fn paths(&self) -> [&Path; 3] {
        [&self.combined, &self.private_key, &self.public_key]
    }

    fn exists(&self) -> bool {
        self.paths().iter().all(|path| path.is_file())
    }
}

/// A file that could not be listed or removed during cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Outcome of a cleanup pass. Cleanup never fails; problems are reported here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: CleanupReport) {
        self.removed.extend(other.removed);
        self.failures.extend(other.failures);
    }

    fn fail(&mut self, path: &Path, err: impl ToString) {
        let message = err.to_string();
        warn!(path = %path.display(), error = %message, "credential material cleanup failed");
        self.failures.push(CleanupFailure {
            path: path.to_path_buf(),
            message,
        });
    }
}

/// Lazily materializes one credential's PEM files and cleans them up.
#[derive(Debug)]
pub struct MaterialStore {
    root: PathBuf,
    retention: Duration,
    passphrase: Option<String>,
    material: Option<CredentialMaterial>,
}

impl MaterialStore {
    pub fn new(config: &Config) -> Self {
        let root = config
            .material_root()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| std::env::temp_dir().join(format!("nfse-{}", user_segment())));
        Self {
            root,
            retention: config.retention(),
            passphrase: config.transport().key_passphrase.clone(),
            material: None,
        }
    }

    /// Store rooted at an explicit directory.
    pub fn with_root(root: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            root: root.into(),
            retention,
            passphrase: None,
            material: None,
        }
    }

    /// Encrypt written private keys with `passphrase`.
    pub fn with_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.passphrase = passphrase;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn material(&self) -> Option<&CredentialMaterial> {
        self.material.as_ref()
    }

    /// Return the material for `credential`, writing it on first use.
    ///
    /// # Errors
    /// [`MaterialError::MissingTaxId`] if the credential has neither CNPJ nor CPF,
    /// [`MaterialError::Io`] if the directory or a file cannot be written.
    pub fn ensure(&mut self, credential: &Credential) -> Result<&CredentialMaterial, MaterialError> {
        let tax_id = credential
            .tax_id()
            .ok_or(MaterialError::MissingTaxId)?
            .to_string();

        let reusable = self
            .material
            .as_ref()
            .is_some_and(|m| m.tax_id == tax_id && m.exists());
        if !reusable {
            if self.material.is_some() {
                self.release();
            }
            let material = self.write_material(credential, tax_id)?;
            self.material = Some(material);
        }
        self.material.as_ref().ok_or(MaterialError::MissingTaxId)
    }

    /// Delete this credential's files and sweep stale files from the shared directory.
    pub fn release(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let Some(material) = self.material.take() else {
            return report;
        };
        for path in material.paths() {
            match fs::remove_file(path) {
                Ok(()) => report.removed.push(path.to_path_buf()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => report.fail(path, e),
            }
        }
        report.merge(sweep_stale(&material.dir, self.retention, SystemTime::now()));
        report
    }

    fn write_material(
        &self,
        credential: &Credential,
        tax_id: String,
    ) -> Result<CredentialMaterial, MaterialError> {
        let dir = self.root.join(&tax_id).join(CERTS_DIR);
        fs::create_dir_all(&dir).map_err(|source| MaterialError::Io {
            path: dir.clone(),
            source,
        })?;
        let swept = sweep_stale(&dir, self.retention, SystemTime::now());
        if !swept.removed.is_empty() {
            debug!(count = swept.removed.len(), "removed stale credential material");
        }

        let passphrase = self.passphrase.as_deref();
        let private_key = write_new_pem(&dir, credential.private_key_pem(passphrase)?.as_bytes())?;
        let public_key = write_new_pem(&dir, credential.public_key_pem()?.as_bytes())?;
        let combined = write_new_pem(&dir, credential.combined_pem(passphrase)?.as_bytes())?;
        debug!(dir = %dir.display(), tax_id = %tax_id, "wrote credential material");

        Ok(CredentialMaterial {
            tax_id,
            dir,
            private_key,
            public_key,
            combined,
        })
    }
}

impl Drop for MaterialStore {
    fn drop(&mut self) {
        self.release();
    }
}

/// Random `<alphanumeric>.pem` path under `dir` that does not exist yet.
/// Starts at `size` characters and grows by five on every collision.
pub fn random_pem_name(dir: &Path, size: usize) -> PathBuf {
    random_pem_name_with(dir, size, &mut rand::thread_rng())
}

pub(crate) fn random_pem_name_with<R: Rng>(dir: &Path, size: usize, rng: &mut R) -> PathBuf {
    let mut size = size.max(1);
    loop {
        let stem: String = (0..size)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect();
        let candidate = dir.join(format!("{stem}.pem"));
        if !candidate.exists() {
            return candidate;
        }
        size += NAME_LEN_STEP;
    }
}

fn write_new_pem(dir: &Path, contents: &[u8]) -> Result<PathBuf, MaterialError> {
    let mut size = INITIAL_NAME_LEN;
    loop {
        let path = random_pem_name(dir, size);
        match create_private_file(&path) {
            Ok(mut file) => {
                file.write_all(contents)
                    .and_then(|()| file.sync_all())
                    .map_err(|source| MaterialError::Io {
                        path: path.clone(),
                        source,
                    })?;
                return Ok(path);
            }
            // another writer won the race for this name
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => size += NAME_LEN_STEP,
            Err(source) => return Err(MaterialError::Io { path, source }),
        }
    }
}

fn create_private_file(path: &Path) -> io::Result<fs::File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Remove every file below `dir` last modified before `now - retention`.
/// Never fails: listing and removal errors are collected in the report.
pub fn sweep_stale(dir: &Path, retention: Duration, now: SystemTime) -> CleanupReport {
    let mut report = CleanupReport::default();
    let limit = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                report.fail(&current, e);
                continue;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report.fail(&current, e);
                    continue;
                }
            };
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                // removed by a concurrent sweep
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    report.fail(&path, e);
                    continue;
                }
            };
            if metadata.is_dir() {
                pending.push(path);
                continue;
            }
            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    report.fail(&path, e);
                    continue;
                }
            };
            if modified < limit {
                match fs::remove_file(&path) {
                    Ok(()) => report.removed.push(path),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => report.fail(&path, e),
                }
            }
        }
    }
    report
}

// Shared by every process of the same OS user.
fn user_segment() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let sanitized: String = user
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if sanitized.is_empty() {
        "shared".to_string()
    } else {
        sanitized
    }
}

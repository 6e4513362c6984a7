//! Key material persistence: PEM files at configured paths.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::material::{Certificate, KeyPair};
use crate::{CaError, Result};

/// Reads and writes PEM-encoded keys and certificates.
///
/// Writes go to a sibling temp file which is synced and then renamed over
/// the target, so a configured path either holds a complete PEM or nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyMaterialStore;

impl KeyMaterialStore {
    /// Create a store.
    pub const fn new() -> Self {
        Self
    }

    /// Whether a file exists at `path`, without reading it.
    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Load a private key.
    pub fn read_key(&self, path: &Path) -> Result<KeyPair> {
        let text = fs::read_to_string(path).map_err(|e| CaError::io(path, e))?;
        KeyPair::from_pem(&text).map_err(|e| match e {
            CaError::InvalidKey(reason) => {
                CaError::InvalidKey(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    /// Load a certificate.
    pub fn read_certificate(&self, path: &Path) -> Result<Certificate> {
        let text = fs::read_to_string(path).map_err(|e| CaError::io(path, e))?;
        Certificate::from_pem(&text).map_err(|e| match e {
            CaError::InvalidCertificate(reason) => {
                CaError::InvalidCertificate(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    /// Persist a private key (mode 0600 on Unix).
    pub fn write_key(&self, path: &Path, key: &KeyPair) -> Result<()> {
        write_atomic(path, key.pem().as_bytes(), true)
    }

    /// Persist a certificate.
    pub fn write_certificate(&self, path: &Path, cert: &Certificate) -> Result<()> {
        write_atomic(path, cert.pem().as_bytes(), false)
    }
}

fn write_atomic(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CaError::io(parent, e))?;
    }

    // Leftover from an interrupted write; its mode can't be trusted.
    let tmp = temp_path(path);
    let _ = fs::remove_file(&tmp);
    let result = write_synced(&tmp, contents, private).and_then(|()| {
        fs::rename(&tmp, path).map_err(|e| CaError::io(path, e))
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result?;

    debug!(path = %path.display(), bytes = contents.len(), "wrote key material");
    Ok(())
}

fn write_synced(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(path).map_err(|e| CaError::io(path, e))?;
    file.write_all(contents).map_err(|e| CaError::io(path, e))?;
    file.sync_all().map_err(|e| CaError::io(path, e))?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CertificateEngine;
    use tempfile::TempDir;

    #[test]
    fn test_exists_does_not_require_readable_pem() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ca-key.pem");
        let store = KeyMaterialStore::new();

        assert!(!store.exists(&path));
        fs::write(&path, "not a key").unwrap();
        assert!(store.exists(&path));
        assert!(matches!(store.read_key(&path), Err(CaError::InvalidKey(_))));
    }

    #[test]
    fn test_write_key_creates_parent_and_restricts_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("server-key.pem");
        let store = KeyMaterialStore::new();
        let key = CertificateEngine::with_key_bits(2048)
            .generate_key_pair()
            .unwrap();

        store.write_key(&path, &key).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), key.pem());
        assert!(!temp_path(&path).exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let store = KeyMaterialStore::new();
        let err = store
            .read_certificate(&dir.path().join("missing.pem"))
            .unwrap_err();
        assert!(matches!(err, CaError::Io { .. }));
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let tmp = temp_path(Path::new("/data/ca-cert.pem"));
        assert_eq!(tmp, PathBuf::from("/data/ca-cert.pem.tmp"));
    }
}

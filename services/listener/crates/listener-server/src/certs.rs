//! Per-listener self-signed TLS material.
//!
//! Each secure listener owns `<root>/<sanitised name>/` holding
//! `server.crt` and `server.key`. Provisioning is idempotent: the directory
//! is reused and both files are rewritten in place.

use std::path::{Path, PathBuf};

use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair};

use crate::error::CertError;

pub const CERT_FILE: &str = "server.crt";
pub const KEY_FILE: &str = "server.key";

/// PEM certificate and key as written to disk.
#[derive(Clone)]
pub struct TlsMaterial {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Strip everything but ASCII letters and digits.
pub fn sanitize_name(name: &str) -> String {
    name.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Directory holding a listener's TLS files.
pub fn listener_dir(root: &Path, name: &str) -> Result<PathBuf, CertError> {
    let sanitized = sanitize_name(name);
    if sanitized.is_empty() {
        return Err(CertError::UnusableName(name.to_string()));
    }
    Ok(root.join(sanitized))
}

/// Generate and persist TLS material for a listener.
///
/// Failures are logged and reported as `None`; the caller decides whether
/// that aborts startup.
pub fn provision_tls(root: &Path, name: &str, hosts: &[String]) -> Option<TlsMaterial> {
    match try_provision_tls(root, name, hosts) {
        Ok(material) => {
            tracing::debug!(
                listener = %name,
                cert = %material.cert_path.display(),
                "generated TLS certificate",
            );
            Some(material)
        }
        Err(e) => {
            tracing::error!(listener = %name, error = %e, "failed to generate server TLS certificate");
            None
        }
    }
}

pub fn try_provision_tls(
    root: &Path,
    name: &str,
    hosts: &[String],
) -> Result<TlsMaterial, CertError> {
    let dir = listener_dir(root, name)?;
    tracing::debug!(path = %dir.display(), "listener path");
    std::fs::create_dir_all(&dir)?;

    let (cert, key) = generate_self_signed(hosts)?;

    let cert_path = dir.join(CERT_FILE);
    let key_path = dir.join(KEY_FILE);
    std::fs::write(&cert_path, &cert)?;
    write_private(&key_path, &key)?;

    Ok(TlsMaterial {
        cert,
        key,
        cert_path,
        key_path,
    })
}

fn generate_self_signed(hosts: &[String]) -> Result<(Vec<u8>, Vec<u8>), rcgen::Error> {
    let mut params = CertificateParams::new(hosts.to_vec())?;

    let mut dn = DistinguishedName::new();
    if let Some(host) = hosts.first() {
        dn.push(DnType::CommonName, DnValue::Utf8String(host.clone()));
    }
    params.distinguished_name = dn;

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    Ok((cert.pem().into_bytes(), key_pair.serialize_pem().into_bytes()))
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, contents)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hosts() -> Vec<String> {
        vec!["localhost".to_string(), "127.0.0.1".to_string()]
    }

    #[test]
    fn writes_pem_pair_under_sanitised_name() {
        let root = tempfile::tempdir().unwrap();
        let material = provision_tls(root.path(), "Web Listener #1", &hosts()).unwrap();

        assert_eq!(material.cert_path, root.path().join("WebListener1").join(CERT_FILE));
        assert_eq!(material.key_path, root.path().join("WebListener1").join(KEY_FILE));
        let cert = std::fs::read_to_string(&material.cert_path).unwrap();
        let key = std::fs::read_to_string(&material.key_path).unwrap();
        assert!(cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(key.contains("PRIVATE KEY"));
    }

    #[test]
    fn provisioning_twice_reuses_directory() {
        let root = tempfile::tempdir().unwrap();
        provision_tls(root.path(), "https", &hosts()).unwrap();
        let second = provision_tls(root.path(), "https", &hosts()).unwrap();

        let listeners: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(listeners.len(), 1);
        let files: Vec<_> = std::fs::read_dir(root.path().join("https")).unwrap().collect();
        assert_eq!(files.len(), 2);
        assert_eq!(std::fs::read(&second.cert_path).unwrap(), second.cert);
    }

    #[test]
    fn name_without_alphanumerics_fails_without_panicking() {
        let root = tempfile::tempdir().unwrap();
        assert!(provision_tls(root.path(), "---", &hosts()).is_none());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn unwritable_root_is_reported_as_failure() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        assert!(provision_tls(&file, "https", &hosts()).is_none());
    }

    #[test]
    fn debug_output_redacts_key() {
        let root = tempfile::tempdir().unwrap();
        let material = provision_tls(root.path(), "https", &hosts()).unwrap();
        assert!(!format!("{material:?}").contains("PRIVATE KEY"));
    }

    proptest! {
        #[test]
        fn prop_sanitised_names_are_alphanumeric(name in ".{0,40}") {
            let sanitized = sanitize_name(&name);
            prop_assert!(sanitized.chars().all(|c| c.is_ascii_alphanumeric()));
            prop_assert!(sanitized.len() <= name.len());
        }
    }
}

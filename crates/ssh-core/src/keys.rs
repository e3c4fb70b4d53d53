//! Key file helpers.
//!
//! sault keeps every key as an OpenSSH file. Keys it generates itself (host key, global client
//! key) are Ed25519 and are written with mode 0600.
use std::{
    fs, io::Write, path::Path
};

use russh::keys::{
    self, Algorithm, HashAlg, PrivateKey, PublicKey, ssh_key::{LineEnding, rand_core::OsRng}
};
use tracing::info;

use crate::error::{SshCoreError, SshResult};

/// Parse a private key from OpenSSH or PKCS#8 text.
pub fn load_private_key_from_str(data: &str, passphrase: Option<&str>) -> SshResult<PrivateKey> {
    if let Ok(key) = PrivateKey::from_openssh(data) {
        if !key.is_encrypted() {
            return Ok(key);
        }
        let passphrase = passphrase.ok_or(SshCoreError::PassphraseRequired)?;
        return key.decrypt(passphrase).map_err(SshCoreError::invalid_key);
    }
    match keys::decode_secret_key(data, passphrase) {
        Ok(key) => Ok(key),
        Err(keys::Error::KeyIsEncrypted) if passphrase.is_none() => Err(SshCoreError::PassphraseRequired),
        Err(e) => Err(SshCoreError::invalid_key(e)),
    }
}

pub fn load_private_key(path: &Path, passphrase: Option<&str>) -> SshResult<PrivateKey> {
    let data = fs::read_to_string(path).map_err(|e| SshCoreError::key_file(path, e))?;
    load_private_key_from_str(&data, passphrase)
}

/// Whether the key file at `path` needs a passphrase to be read.
pub fn is_encrypted(path: &Path) -> SshResult<bool> {
    match load_private_key(path, None) {
        Ok(_) => Ok(false),
        Err(SshCoreError::PassphraseRequired) => Ok(true),
        Err(e) => Err(e),
    }
}

pub fn generate_private_key() -> SshResult<PrivateKey> {
    PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(SshCoreError::invalid_key)
}

/// Write a private key in OpenSSH format with owner-only permissions.
pub fn write_private_key(path: &Path, key: &PrivateKey) -> SshResult<()> {
    let pem = key.to_openssh(LineEnding::LF).map_err(SshCoreError::invalid_key)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| SshCoreError::key_file(parent, e))?;
    }

    let mut options = fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(|e| SshCoreError::key_file(path, e))?;
    file.write_all(pem.as_bytes()).map_err(|e| SshCoreError::key_file(path, e))?;
    Ok(())
}

/// Load the key at `path`, generating and persisting a new Ed25519 key when it is missing.
pub fn load_or_generate_key(path: &Path) -> SshResult<PrivateKey> {
    if path.exists() {
        return load_private_key(path, None);
    }
    let key = generate_private_key()?;
    write_private_key(path, &key)?;
    info!(path = %path.display(), fingerprint = %fingerprint(key.public_key()), "generated new ed25519 key");
    Ok(key)
}

/// Parse an `authorized_keys` style line; the comment is optional.
pub fn parse_public_key(line: &str) -> SshResult<PublicKey> {
    PublicKey::from_openssh(line.trim()).map_err(SshCoreError::invalid_key)
}

/// `<algorithm> <base64>` without comment.
pub fn public_key_line(key: &PublicKey) -> SshResult<String> {
    let line = key.to_openssh().map_err(SshCoreError::invalid_key)?;
    Ok(line.split_whitespace().take(2).collect::<Vec<_>>().join(" "))
}

pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_is_persisted_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/host.key");

        let first = load_or_generate_key(&path).unwrap();
        let second = load_or_generate_key(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
        assert!(!is_encrypted(&path).unwrap());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn public_key_line_drops_comment() {
        let key = generate_private_key().unwrap();
        let line = public_key_line(key.public_key()).unwrap();
        assert!(line.starts_with("ssh-ed25519 "));

        let parsed = parse_public_key(&format!("{line} someone@somewhere\n")).unwrap();
        assert_eq!(&parsed, key.public_key());
        assert!(fingerprint(&parsed).starts_with("SHA256:"));
    }

    #[test]
    fn encrypted_key_needs_its_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_ed25519");
        let key = generate_private_key().unwrap();
        let encrypted = key.encrypt(&mut OsRng, "hunter2").unwrap();
        fs::write(&path, encrypted.to_openssh(LineEnding::LF).unwrap().as_bytes()).unwrap();

        assert!(is_encrypted(&path).unwrap());
        assert!(matches!(load_private_key(&path, None), Err(SshCoreError::PassphraseRequired)));
        assert!(load_private_key(&path, Some("wrong")).is_err());
        let loaded = load_private_key(&path, Some("hunter2")).unwrap();
        assert_eq!(loaded.public_key(), key.public_key());
    }

    #[test]
    fn garbage_is_not_a_key() {
        assert!(matches!(
            load_private_key_from_str("not a key", None),
            Err(SshCoreError::InvalidKey(_))
        ));
        assert!(parse_public_key("ssh-ed25519").is_err());
    }
}

//! The node's persistent Ed25519 identity.
//!
//! Stored as the hex-encoded 32-byte seed in `<data_dir>/node.key`. A file
//! that exists but does not parse is an error; it is never overwritten.

use std::path::Path;

use witness_crypto::{generate_keypair, keypair_from_seed};
use witness_types::KeyPair;
use zeroize::Zeroizing;

use crate::NodeError;

/// Read the key at `path`, or generate and persist a new one.
pub fn load_or_create_keypair(path: &Path) -> Result<KeyPair, NodeError> {
    if path.exists() {
        let keypair = read_keypair(path)?;
        tracing::info!(identity = %keypair.identity, path = %path.display(), "loaded node identity");
        return Ok(keypair);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let keypair = generate_keypair();
    let encoded = Zeroizing::new(hex::encode(keypair.private.0));
    std::fs::write(path, encoded.as_bytes())?;
    restrict_permissions(path)?;
    tracing::info!(identity = %keypair.identity, path = %path.display(), "generated node identity");
    Ok(keypair)
}

fn read_keypair(path: &Path) -> Result<KeyPair, NodeError> {
    let content = Zeroizing::new(std::fs::read_to_string(path)?);
    let bytes = Zeroizing::new(
        hex::decode(content.trim())
            .map_err(|e| NodeError::Identity(format!("{}: {e}", path.display())))?,
    );
    let seed: Zeroizing<[u8; 32]> = Zeroizing::new(bytes.as_slice().try_into().map_err(|_| {
        NodeError::Identity(format!(
            "{}: expected 32 key bytes, found {}",
            path.display(),
            bytes.len()
        ))
    })?);
    Ok(keypair_from_seed(&seed))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), NodeError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), NodeError> {
    Ok(())
}

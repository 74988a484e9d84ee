/// Stable fingerprint of the resolved run configuration
use sha2::{Digest, Sha256};

use crate::config::SyncConfig;
use crate::error::Result;

pub fn fingerprint(components: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for component in components {
        hasher.update(component);
    }
    format!("{:x}", hasher.finalize())
}

/// Short hash identifying the settings a run was made with
pub fn config_fingerprint(config: &SyncConfig) -> Result<String> {
    let json = serde_json::to_vec(config)?;
    let mut digest = fingerprint(&[&json]);
    digest.truncate(16);
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_fingerprint_tracks_settings() {
        let base = SyncConfig::default();
        let same = SyncConfig::default();
        let mut changed = SyncConfig::default();
        changed.workers = 12;

        let a = config_fingerprint(&base).unwrap();
        assert_eq!(a.len(), 16);
        assert_eq!(a, config_fingerprint(&same).unwrap());
        assert_ne!(a, config_fingerprint(&changed).unwrap());
    }
}

//! Identity hashes: location hash (ordering + sharding key) and content hash
//! (change detection).
//!
//! Both are SHA-256 rendered as 64 lower-case hex characters. Fixed width is
//! what makes text comparison of hashes agree with numeric comparison.

use crate::error::{Error, Result};
use crate::model::LocationHash;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Component, Path, PathBuf};

/// Hash a normalized location string.
pub fn location_hash(location: &str) -> LocationHash {
    LocationHash::from_digest(&Sha256::digest(location.as_bytes()))
}

/// Hash the full content of the file at `path`.
///
/// Streams the file through the digest. Any open or read failure is a
/// [`Error::Resource`] naming the path; callers processing a batch skip the
/// item instead of aborting.
pub fn content_hash(path: &Path) -> Result<String> {
    let resource = |source| Error::Resource {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(resource)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(resource)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Make `path` absolute and lexically clean (`.` dropped, `..` folded).
///
/// Symlinks are not resolved, so a vanished file still normalizes.
pub fn normalize_location(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|source| Error::Resource {
        path: path.to_path_buf(),
        source,
    })?;

    let mut clean = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the root is a no-op, matching `/..` == `/`.
                clean.pop();
            }
            other => clean.push(other.as_os_str()),
        }
    }
    Ok(clean)
}

/// Normalize `raw` and return it as the stored location string.
pub fn location_string(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("location is empty"));
    }
    let path = normalize_location(Path::new(trimmed))?;
    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| Error::validation(format!("location is not valid UTF-8: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn location_hash_is_fixed_width_lower_hex() {
        let h = location_hash("/src/main.rs");
        assert_eq!(h.as_str().len(), 64);
        assert!(h.as_str().chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        assert_eq!(h, location_hash("/src/main.rs"));
        assert_ne!(h, location_hash("/src/lib.rs"));
    }

    #[test]
    fn location_hash_matches_known_digest() {
        // sha256("abc")
        assert_eq!(
            location_hash("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn content_hash_digests_file_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world\n").unwrap();

        let got = content_hash(file.path()).unwrap();
        assert_eq!(
            got,
            "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447"
        );
        assert_eq!(got, content_hash(file.path()).unwrap());
    }

    #[test]
    fn content_hash_of_missing_file_is_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = content_hash(&dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));
    }

    #[test]
    fn normalize_folds_dot_segments() {
        let got = normalize_location(Path::new("/a/./b/../c.rs")).unwrap();
        assert_eq!(got, PathBuf::from("/a/c.rs"));
        assert_eq!(normalize_location(Path::new("/..")).unwrap(), PathBuf::from("/"));
    }

    #[test]
    fn relative_locations_become_absolute() {
        let got = normalize_location(Path::new("src/lib.rs")).unwrap();
        assert!(got.is_absolute());
        assert!(got.ends_with("src/lib.rs"));
    }

    #[test]
    fn empty_location_is_rejected() {
        assert!(matches!(location_string("   "), Err(Error::Validation(_))));
    }
}

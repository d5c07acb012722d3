//! ROM directory scanning and content hashing.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::models::RomFile;

/// Walk a ROM directory (recursively) and hash every file whose extension
/// matches the system's list. Unreadable files are skipped with a warning
/// rather than failing the scan.
pub fn scan_directory(dir: &Path, extensions: &[String]) -> anyhow::Result<Vec<RomFile>> {
    if !dir.is_dir() {
        anyhow::bail!("ROM directory {} does not exist", dir.display());
    }

    let mut roms = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            if !matches_extension(&path, extensions) {
                continue;
            }
            match rom_from_path(&path) {
                Ok(rom) => roms.push(rom),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
    }

    // Deterministic order regardless of directory iteration.
    roms.sort_by(|a, b| a.filename.cmp(&b.filename));
    debug!("Scanned {}: {} ROM(s)", dir.display(), roms.len());
    Ok(roms)
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn rom_from_path(path: &Path) -> std::io::Result<RomFile> {
    let metadata = path.metadata()?;
    Ok(RomFile {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        size: metadata.len(),
        sha256: hash_file(path)?,
    })
}

/// SHA-256 of a file's content, hex-encoded, streamed in 64 KiB chunks.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scan_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("game.sfc"), b"rom data").unwrap();
        std::fs::write(dir.path().join("game.SFC"), b"rom data 2").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"not a rom").unwrap();

        let roms = scan_directory(dir.path(), &exts(&["sfc"])).unwrap();
        assert_eq!(roms.len(), 2);
        assert!(roms.iter().all(|r| r.size > 0));
    }

    #[test]
    fn test_scan_recurses_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("b.md"), b"b").unwrap();
        std::fs::write(dir.path().join("a.md"), b"a").unwrap();

        let roms = scan_directory(dir.path(), &exts(&["md"])).unwrap();
        let names: Vec<_> = roms.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["a.md", "b.md"]);
    }

    #[test]
    fn test_missing_directory_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(scan_directory(&missing, &exts(&["sfc"])).is_err());
    }

    #[test]
    fn test_hash_file_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.sfc");
        std::fs::write(&path, b"hello").unwrap();

        let hash = hash_file(&path).unwrap();
        // SHA-256 of "hello".
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}

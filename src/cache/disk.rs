//! Disk tier: one file per key under a namespaced root directory.
//!
//! All functions here are blocking and meant to run on the blocking pool.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Outcome of one sweep over the disk tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
  /// Files removed for exceeding the maximum age.
  pub expired: usize,
  /// Files removed to get back under the size budget.
  pub evicted: usize,
  /// Allocated bytes still on disk afterwards.
  pub remaining_bytes: u64,
  /// Keys whose files were deleted.
  pub removed: Vec<String>,
}

/// Keys become file names, so they must not escape the root.
fn validate_key(key: &str) -> io::Result<()> {
  if key.is_empty() || key.starts_with('.') || key.contains(|c: char| c == '/' || c == '\\') {
    return Err(io::Error::new(
      io::ErrorKind::InvalidInput,
      format!("cache key is not a safe file name: {:?}", key),
    ));
  }
  Ok(())
}

fn is_temp_name(name: &str) -> bool {
  name.starts_with('.')
}

/// Write `bytes` for `key` via a hidden temp file and a rename, so readers
/// never observe a partial file.
pub fn write(root: &Path, key: &str, bytes: &[u8]) -> io::Result<()> {
  validate_key(key)?;
  fs::create_dir_all(root)?;

  let temp_path = root.join(format!(
    ".{}.{}.{}.tmp",
    key,
    std::process::id(),
    TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
  ));

  let result = write_and_rename(&temp_path, &root.join(key), bytes);
  if result.is_err() {
    let _ = fs::remove_file(&temp_path);
  }
  result
}

fn write_and_rename(temp_path: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
  let mut file = fs::File::create(temp_path)?;
  file.write_all(bytes)?;
  file.sync_all()?;
  fs::rename(temp_path, path)
}

/// Read the bytes stored for `key` and their modification time.
///
/// A missing file is `Ok(None)`, not an error.
pub fn read(root: &Path, key: &str) -> io::Result<Option<(Vec<u8>, SystemTime)>> {
  validate_key(key)?;
  let path = root.join(key);
  let bytes = match fs::read(&path) {
    Ok(bytes) => bytes,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(e),
  };
  let modified = fs::metadata(&path)?.modified()?;
  Ok(Some((bytes, modified)))
}

pub fn remove(root: &Path, key: &str) -> io::Result<()> {
  validate_key(key)?;
  match fs::remove_file(root.join(key)) {
    Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
    _ => Ok(()),
  }
}

/// Delete the whole directory tree.
pub fn clear(root: &Path) -> io::Result<()> {
  match fs::remove_dir_all(root) {
    Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
    _ => Ok(()),
  }
}

/// Bytes the file occupies on disk, falling back to its length where the
/// platform does not report blocks.
pub fn allocated_size(metadata: &fs::Metadata) -> u64 {
  #[cfg(unix)]
  {
    use std::os::unix::fs::MetadataExt;
    let allocated = metadata.blocks() * 512;
    if allocated > 0 {
      return allocated;
    }
  }
  metadata.len()
}

struct Candidate {
  path: PathBuf,
  name: String,
  modified: SystemTime,
  size: u64,
}

/// Age and size maintenance pass.
///
/// Files older than `max_age` are deleted first. If what remains is larger
/// than `max_size`, files are deleted oldest first until the total is at most
/// `max_size * shrink_ratio`. A `max_size` of zero disables the size check.
pub fn sweep(
  root: &Path,
  now: SystemTime,
  max_age: Duration,
  max_size: u64,
  shrink_ratio: f64,
) -> io::Result<SweepReport> {
  let mut report = SweepReport::default();

  let entries = match fs::read_dir(root) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
    Err(e) => return Err(e),
  };

  let mut kept = Vec::new();
  for entry in entries {
    let entry = entry?;
    let metadata = match entry.metadata() {
      Ok(metadata) if metadata.is_file() => metadata,
      Ok(_) => continue,
      Err(e) => {
        warn!(path = %entry.path().display(), error = %e, "skipping unreadable cache entry");
        continue;
      }
    };
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    kept.push(Candidate {
      path: entry.path(),
      name: entry.file_name().to_string_lossy().into_owned(),
      modified,
      size: allocated_size(&metadata),
    });
  }

  let mut remaining = Vec::with_capacity(kept.len());
  for candidate in kept {
    // Modification times in the future count as fresh
    let age = now.duration_since(candidate.modified).unwrap_or_default();
    if age > max_age {
      if delete(&candidate)? {
        report.expired += 1;
        note_removed(&mut report, candidate.name);
      }
    } else {
      remaining.push(candidate);
    }
  }

  let mut total: u64 = remaining.iter().map(|c| c.size).sum();
  if max_size > 0 && total > max_size {
    let target = (max_size as f64 * shrink_ratio.clamp(0.0, 1.0)) as u64;
    remaining.sort_by_key(|c| c.modified);
    let mut oldest_first = remaining.into_iter();
    while total > target {
      let Some(candidate) = oldest_first.next() else {
        break;
      };
      if delete(&candidate)? {
        total = total.saturating_sub(candidate.size);
        report.evicted += 1;
        note_removed(&mut report, candidate.name);
      }
    }
  }

  report.remaining_bytes = total;
  debug!(
    expired = report.expired,
    evicted = report.evicted,
    remaining_bytes = report.remaining_bytes,
    "disk sweep finished"
  );
  Ok(report)
}

/// Returns false if the file was already gone.
fn delete(candidate: &Candidate) -> io::Result<bool> {
  match fs::remove_file(&candidate.path) {
    Ok(()) => Ok(true),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
    Err(e) => Err(e),
  }
}

fn note_removed(report: &mut SweepReport, name: String) {
  if !is_temp_name(&name) {
    report.removed.push(name);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn set_mtime(root: &Path, key: &str, time: SystemTime) {
    fs::File::options()
      .write(true)
      .open(root.join(key))
      .unwrap()
      .set_modified(time)
      .unwrap();
  }

  #[test]
  fn test_write_then_read() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "abc", b"payload").unwrap();
    let (bytes, _) = read(dir.path(), "abc").unwrap().unwrap();
    assert_eq!(bytes, b"payload");
  }

  #[test]
  fn test_missing_key_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(read(dir.path(), "nope").unwrap().is_none());
    assert!(read(&dir.path().join("missing-root"), "nope").unwrap().is_none());
    remove(dir.path(), "nope").unwrap();
  }

  #[test]
  fn test_write_leaves_no_temp_files() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "abc", b"one").unwrap();
    write(dir.path(), "abc", b"two").unwrap();
    let names: Vec<_> = fs::read_dir(dir.path())
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, vec![String::from("abc")]);
    assert_eq!(read(dir.path(), "abc").unwrap().unwrap().0, b"two");
  }

  #[test]
  fn test_unsafe_keys_are_rejected() {
    let dir = TempDir::new().unwrap();
    for key in ["", "../escape", ".hidden", "a/b"] {
      let err = write(dir.path(), key, b"x").unwrap_err();
      assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
  }

  #[test]
  fn test_sweep_removes_expired() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "old", b"1").unwrap();
    write(dir.path(), "new", b"2").unwrap();
    let now = SystemTime::now();
    set_mtime(dir.path(), "old", now - Duration::from_secs(3600));

    let report = sweep(dir.path(), now, Duration::from_secs(60), 0, 0.5).unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.evicted, 0);
    assert_eq!(report.removed, vec![String::from("old")]);
    assert!(read(dir.path(), "old").unwrap().is_none());
    assert!(read(dir.path(), "new").unwrap().is_some());
  }

  #[test]
  fn test_sweep_evicts_oldest_down_to_ratio() {
    let dir = TempDir::new().unwrap();
    let now = SystemTime::now();
    let keys = ["k0", "k1", "k2", "k3"];
    for (i, key) in keys.iter().enumerate() {
      write(dir.path(), key, &vec![b'x'; 8192]).unwrap();
      set_mtime(dir.path(), key, now - Duration::from_secs(100 - i as u64));
    }
    let sizes: Vec<u64> = keys
      .iter()
      .map(|k| allocated_size(&fs::metadata(dir.path().join(k)).unwrap()))
      .collect();
    let total: u64 = sizes.iter().sum();
    let max_size = total - 1;

    let report = sweep(dir.path(), now, Duration::from_secs(3600), max_size, 0.5).unwrap();
    assert_eq!(report.expired, 0);
    assert!(report.evicted >= 1);
    assert!(report.remaining_bytes <= max_size / 2);
    assert!(read(dir.path(), "k0").unwrap().is_none());
    assert!(read(dir.path(), "k3").unwrap().is_some());
  }

  #[test]
  fn test_sweep_of_missing_root_is_empty() {
    let dir = TempDir::new().unwrap();
    let report = sweep(
      &dir.path().join("absent"),
      SystemTime::now(),
      Duration::from_secs(1),
      1,
      0.5,
    )
    .unwrap();
    assert_eq!(report, SweepReport::default());
  }
}

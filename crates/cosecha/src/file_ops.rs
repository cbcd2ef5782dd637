//! Download finalization and safe file replacement.
//!
//! A download is ready when it exists, is non-empty, and its size at one poll
//! equals its size at the previous poll. Browser partial files
//! (`.crdownload` and friends) are never treated as finished downloads.
//!
//! Post-processing writes to a temporary sibling and renames it over the
//! original, so readers never see a half-written artifact.

use crate::result::{CosechaError, CosechaResult};
use crate::retry::{run_with_retries, RetryPolicy};
use crate::wait::{Poller, WaitOptions};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Extensions browsers use for in-progress downloads
pub const PARTIAL_EXTENSIONS: &[&str] = &["crdownload", "part", "download", "tmp"];

/// Default stabilization budget (15 minutes)
pub const DEFAULT_STABLE_TIMEOUT: Duration = Duration::from_secs(900);

/// Default interval between size readings
pub const DEFAULT_STABLE_POLL: Duration = Duration::from_secs(15);

/// Download lifecycle as seen from size readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// File absent or empty
    Pending,
    /// Size changed since the previous reading
    Growing,
    /// Non-zero size unchanged across two readings
    Stable,
}

/// A file being written, with its observed size history
#[derive(Debug, Clone)]
pub struct DownloadHandle {
    path: PathBuf,
    sizes: Vec<Option<u64>>,
}

impl DownloadHandle {
    /// Start tracking `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sizes: Vec::new(),
        }
    }

    /// Tracked path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size readings so far; `None` means the file did not exist
    #[must_use]
    pub fn sizes(&self) -> &[Option<u64>] {
        &self.sizes
    }

    /// Record a size reading and return the resulting state
    pub fn observe(&mut self, size: Option<u64>) -> DownloadState {
        self.sizes.push(size);
        self.state()
    }


    /// State implied by the last two readings
    #[must_use]
    pub fn state(&self) -> DownloadState {
        match self.sizes.as_slice() {
            [.., Some(prev), Some(last)] if *last > 0 && prev == last => DownloadState::Stable,
            [.., Some(last)] if *last > 0 => DownloadState::Growing,
            _ => DownloadState::Pending,
        }
    }
}

/// A download confirmed complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableFile {
    /// Where the file is
    pub path: PathBuf,
    /// Final size in bytes
    pub size: u64,
}

/// Current size of `path`, `None` when it cannot be read
pub async fn size_on_disk(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// Whether a file name looks like a browser's in-progress download
#[must_use]
pub fn is_partial(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| PARTIAL_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Wait until `path` exists with a non-zero size that holds across one poll
pub async fn await_stable_file(
    poller: &Poller,
    path: &Path,
    options: &WaitOptions,
) -> CosechaResult<StableFile> {
    let handle = Mutex::new(DownloadHandle::new(path));
    let handle_ref = &handle;
    let what = format!("{} to stabilize", path.display());
    poller
        .wait_until(&what, options, move || async move {
            let size = size_on_disk(path).await;
            let mut h = handle_ref.lock().unwrap_or_else(PoisonError::into_inner);
            let state = h.observe(size);
            tracing::debug!(path = %h.path().display(), size = ?h.sizes().last(), ?state, "download size");
            Ok(state == DownloadState::Stable)
        })
        .await
        .into_result()?;

    let handle = handle.into_inner().unwrap_or_else(PoisonError::into_inner);
    let size = handle.sizes().last().copied().flatten().unwrap_or_default();
    tracing::info!(path = %path.display(), size, "download stable");
    Ok(StableFile {
        path: handle.path,
        size,
    })
}

/// Finished (non-partial) regular files currently in `dir`
pub async fn finished_files(dir: &Path) -> CosechaResult<HashSet<PathBuf>> {
    let mut files = HashSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_partial(&path) {
            continue;
        }
        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            files.insert(path);
        }
    }
    Ok(files)
}

/// Wait for a finished file in `dir` that was not in `before`
pub async fn await_new_download(
    poller: &Poller,
    dir: &Path,
    before: &HashSet<PathBuf>,
    options: &WaitOptions,
) -> CosechaResult<PathBuf> {
    let found: Mutex<Option<PathBuf>> = Mutex::new(None);
    let found_ref = &found;
    let what = format!("a new download in {}", dir.display());
    poller
        .wait_until(&what, options, move || async move {
            let mut fresh: Vec<PathBuf> =
                finished_files(dir).await?.difference(before).cloned().collect();
            fresh.sort();
            let hit = fresh.into_iter().next();
            let ready = hit.is_some();
            *found_ref.lock().unwrap_or_else(PoisonError::into_inner) = hit;
            Ok(ready)
        })
        .await
        .into_result()?;
    found
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .ok_or_else(|| CosechaError::page("download vanished"))
}

/// Remove a pre-existing artifact; returns whether one was there
pub async fn remove_stale(path: &Path) -> CosechaResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::info!(path = %path.display(), "removed previous artifact");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Move `from` to `to`, copying when a rename is not possible
pub async fn move_file(from: &Path, to: &Path) -> CosechaResult<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(from, to).await.is_err() {
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}

/// Temporary sibling used while rewriting `path` (`report.xlsx` -> `report.tmp.xlsx`)
#[must_use]
pub fn temp_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map_or_else(|| "artifact".into(), |s| s.to_string_lossy());
    let name = match path.extension() {
        Some(ext) => format!("{stem}.tmp.{}", ext.to_string_lossy()),
        None => format!("{stem}.tmp"),
    };
    path.with_file_name(name)
}

/// Rewrite `path` through `write`, which receives a temporary path to fill.
///
/// The original is replaced only after `write` succeeds; on failure the
/// temporary file is removed and the original is left as it was.
pub fn replace_atomically<F>(path: &Path, write: F) -> CosechaResult<()>
where
    F: FnOnce(&Path) -> CosechaResult<()>,
{
    let tmp = temp_sibling(path);
    if let Err(e) = write(&tmp) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        CosechaError::Normalization {
            path: path.display().to_string(),
            message: format!("rename failed: {e}"),
        }
    })
}

// =============================================================================
// NORMALIZATION
// =============================================================================

/// Rewrites a downloaded artifact into a cleaner form
pub trait ArtifactNormalizer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Read `source` and write its normalized form to `dest`
    fn normalize(&self, source: &Path, dest: &Path) -> CosechaResult<()>;
}

/// How a normalization pass ended
#[derive(Debug)]
pub enum NormalizeOutcome {
    /// The artifact was rewritten
    Normalized {
        /// Attempt that succeeded
        attempts: u32,
    },
    /// Every attempt failed; the original artifact is untouched
    LeftUntouched {
        /// Final error
        error: CosechaError,
    },
}

impl NormalizeOutcome {
    /// Whether the artifact was rewritten
    #[must_use]
    pub const fn is_normalized(&self) -> bool {
        matches!(self, Self::Normalized { .. })
    }
}

/// One rewrite of `path` on the blocking pool
async fn normalize_once(
    normalizer: Arc<dyn ArtifactNormalizer>,
    path: PathBuf,
) -> CosechaResult<()> {
    let label = path.display().to_string();
    tokio::task::spawn_blocking(move || {
        replace_atomically(&path, |tmp| normalizer.normalize(&path, tmp))
    })
    .await
    .map_err(|e| CosechaError::Normalization {
        path: label,
        message: format!("normalizer task failed: {e}"),
    })?
}

/// Best-effort in-place normalization with retries.
///
/// Never fails: an artifact that cannot be normalized is kept as downloaded.
/// The rewrite itself runs on tokio's blocking pool.
pub async fn normalize_in_place(
    normalizer: Arc<dyn ArtifactNormalizer>,
    path: &Path,
    policy: &RetryPolicy,
) -> NormalizeOutcome {
    let label = format!("{} {}", normalizer.name(), path.display());
    let normalizer_ref = &normalizer;
    let result = run_with_retries(policy, &label, move |_| async move {
        normalize_once(Arc::clone(normalizer_ref), path.to_path_buf()).await
    })
    .await;
    match result {
        Ok(done) => {
            tracing::info!(path = %path.display(), normalizer = normalizer.name(), "artifact normalized");
            NormalizeOutcome::Normalized {
                attempts: done.attempts,
            }
        }
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "normalization failed, keeping original");
            NormalizeOutcome::LeftUntouched { error }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    mod handle_tests {
        use super::*;

        #[test]
        fn test_size_sequence_stabilizes_on_third_poll() {
            let mut h = DownloadHandle::new("r.xlsx");
            assert_eq!(h.observe(Some(0)), DownloadState::Pending);
            assert_eq!(h.observe(Some(120)), DownloadState::Growing);
            assert_eq!(h.observe(Some(120)), DownloadState::Stable);
            assert_eq!(h.sizes().len(), 3);
        }

        #[test]
        fn test_zero_sizes_never_stable() {
            let mut h = DownloadHandle::new("r.xlsx");
            h.observe(Some(0));
            assert_eq!(h.observe(Some(0)), DownloadState::Pending);
        }

        #[test]
        fn test_missing_then_present() {
            let mut h = DownloadHandle::new("r.xlsx");
            assert_eq!(h.observe(None), DownloadState::Pending);
            assert_eq!(h.observe(Some(10)), DownloadState::Growing);
            assert_eq!(h.observe(Some(20)), DownloadState::Growing);
            assert_eq!(h.observe(Some(20)), DownloadState::Stable);
            assert_eq!(h.observe(None), DownloadState::Pending);
        }

        #[test]
        fn test_partial_extensions() {
            assert!(is_partial(Path::new("a.xlsx.crdownload")));
            assert!(is_partial(Path::new("Unconfirmed 1.CRDOWNLOAD")));
            assert!(!is_partial(Path::new("a.xlsx")));
            assert!(!is_partial(Path::new("noext")));
        }

        #[test]
        fn test_temp_sibling_names() {
            assert_eq!(
                temp_sibling(Path::new("/out/corte.xlsx")),
                PathBuf::from("/out/corte.tmp.xlsx")
            );
            assert_eq!(temp_sibling(Path::new("/out/raw")), PathBuf::from("/out/raw.tmp"));
        }
    }

    mod stabilize_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_growing_file_stabilizes() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("venta.xlsx");
            std::fs::write(&path, b"").unwrap();
            let writer_path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                std::fs::write(&writer_path, vec![7u8; 120]).unwrap();
            });

            let opts = WaitOptions::from_durations(Duration::from_secs(900), Duration::from_secs(15));
            let start = Instant::now();
            let stable = await_stable_file(&Poller::new(), &path, &opts).await.unwrap();
            assert_eq!(stable.size, 120);
            assert_eq!(stable.path, path);
            assert_eq!(start.elapsed(), Duration::from_secs(30));
        }

        #[tokio::test(start_paused = true)]
        async fn test_missing_file_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let opts = WaitOptions::from_durations(Duration::from_secs(60), Duration::from_secs(15));
            let err = await_stable_file(&Poller::new(), &dir.path().join("nope.xlsx"), &opts)
                .await
                .unwrap_err();
            assert!(err.is_timed_out());
        }

        #[tokio::test(start_paused = true)]
        async fn test_new_download_ignores_partials_and_old_files() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("old.xlsx"), b"old").unwrap();
            let before = finished_files(dir.path()).await.unwrap();
            std::fs::write(dir.path().join("new.xlsx.crdownload"), b"part").unwrap();

            let d = dir.path().to_path_buf();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                std::fs::write(d.join("new.xlsx"), b"done").unwrap();
            });

            let opts = WaitOptions::from_durations(Duration::from_secs(30), Duration::from_secs(1));
            let found = await_new_download(&Poller::new(), dir.path(), &before, &opts)
                .await
                .unwrap();
            assert_eq!(found, dir.path().join("new.xlsx"));
        }
    }

    mod replace_tests {
        use super::*;

        #[tokio::test]
        async fn test_remove_stale() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("x.xlsx");
            assert!(!remove_stale(&path).await.unwrap());
            std::fs::write(&path, b"1").unwrap();
            assert!(remove_stale(&path).await.unwrap());
            assert!(!path.exists());
        }

        #[tokio::test]
        async fn test_finished_files_skips_partials_and_dirs() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("a.xlsx"), b"1").unwrap();
            std::fs::write(dir.path().join("b.xlsx.crdownload"), b"1").unwrap();
            std::fs::create_dir(dir.path().join("sub")).unwrap();
            let files = finished_files(dir.path()).await.unwrap();
            assert_eq!(files.len(), 1);
            assert!(files.contains(&dir.path().join("a.xlsx")));
        }

        #[tokio::test]
        async fn test_finished_files_missing_dir_is_io_error() {
            let dir = tempfile::tempdir().unwrap();
            assert!(finished_files(&dir.path().join("absent")).await.is_err());
        }

        #[test]
        fn test_replace_atomically_success() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("x.xlsx");
            std::fs::write(&path, b"styled").unwrap();
            replace_atomically(&path, |tmp| Ok(std::fs::write(tmp, b"plain")?)).unwrap();
            assert_eq!(std::fs::read(&path).unwrap(), b"plain");
            assert!(!temp_sibling(&path).exists());
        }

        #[test]
        fn test_replace_atomically_failure_keeps_original() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("x.xlsx");
            std::fs::write(&path, b"styled").unwrap();
            let err = replace_atomically(&path, |tmp| {
                std::fs::write(tmp, b"half")?;
                Err(CosechaError::parse("bad workbook"))
            })
            .unwrap_err();
            assert!(err.to_string().contains("bad workbook"));
            assert_eq!(std::fs::read(&path).unwrap(), b"styled");
            assert!(!temp_sibling(&path).exists());
        }

        #[tokio::test]
        async fn test_move_file_creates_parent() {
            let dir = tempfile::tempdir().unwrap();
            let from = dir.path().join("a.xlsx");
            let to = dir.path().join("out/b.xlsx");
            std::fs::write(&from, b"1").unwrap();
            move_file(&from, &to).await.unwrap();
            assert!(to.exists());
            assert!(!from.exists());
        }
    }

    mod normalize_tests {
        use super::*;

        struct Flaky {
            fail_first: u32,
            calls: AtomicU32,
        }

        impl ArtifactNormalizer for Flaky {
            fn name(&self) -> &str {
                "flaky"
            }

            fn normalize(&self, source: &Path, dest: &Path) -> CosechaResult<()> {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.fail_first {
                    return Err(CosechaError::parse("file is locked"));
                }
                let data = std::fs::read_to_string(source)?;
                std::fs::write(dest, data.to_uppercase())?;
                Ok(())
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_recovers_after_locked_reads() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("c.xlsx");
            std::fs::write(&path, "abc").unwrap();
            let n = Arc::new(Flaky {
                fail_first: 2,
                calls: AtomicU32::new(0),
            });
            let policy = RetryPolicy::new(3, Duration::from_secs(10));
            let outcome = normalize_in_place(n, &path, &policy).await;
            assert!(matches!(outcome, NormalizeOutcome::Normalized { attempts: 3 }));
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "ABC");
        }

        #[tokio::test(start_paused = true)]
        async fn test_gives_up_and_keeps_original() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("c.xlsx");
            std::fs::write(&path, "abc").unwrap();
            let n = Arc::new(Flaky {
                fail_first: u32::MAX,
                calls: AtomicU32::new(0),
            });
            let policy = RetryPolicy::new(3, Duration::from_secs(10));
            let outcome = normalize_in_place(n.clone(), &path, &policy).await;
            assert!(!outcome.is_normalized());
            assert_eq!(n.calls.load(Ordering::SeqCst), 3);
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "abc");
        }

        struct ThreadRecorder {
            threads: Mutex<Vec<std::thread::ThreadId>>,
        }

        impl ArtifactNormalizer for ThreadRecorder {
            fn name(&self) -> &str {
                "thread"
            }

            fn normalize(&self, source: &Path, dest: &Path) -> CosechaResult<()> {
                self.threads.lock().unwrap().push(std::thread::current().id());
                std::fs::copy(source, dest)?;
                Ok(())
            }
        }

        #[tokio::test]
        async fn test_normalizer_runs_off_the_runtime_thread() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("c.xlsx");
            std::fs::write(&path, "abc").unwrap();
            let n = Arc::new(ThreadRecorder {
                threads: Mutex::new(Vec::new()),
            });
            let policy = RetryPolicy::new(1, Duration::ZERO);
            let outcome = normalize_in_place(n.clone(), &path, &policy).await;
            assert!(outcome.is_normalized());
            let threads = n.threads.lock().unwrap();
            assert_eq!(threads.len(), 1);
            assert_ne!(threads[0], std::thread::current().id());
        }
    }
}

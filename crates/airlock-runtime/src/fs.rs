//! Mission filesystem backends.
//!
//! Every forwarded syscall runs against a [`MissionFs`]: either the
//! plain host filesystem, or the host filtered through an OGL overlay
//! repository that can veto names (`Nonexistent`), record removals, and
//! cache negative lookups.
//!
//! All methods speak `Errno` on failure; the command center converts
//! that to the `-errno` integers the wire protocol carries.

use std::ffi::CString;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;

use airlock_ogl::{Entry, Repo};

/// Outcome of a backend call, errno-typed like the syscalls it mirrors.
pub type FsResult<T> = std::result::Result<T, Errno>;

/// The per-syscall surface the command center programs against.
pub trait MissionFs {
    /// `open(2)`.
    fn open(&mut self, path: &Path, flags: i32, mode: u32) -> FsResult<OwnedFd>;
    /// `openat(2)`; `dirfd` is the supervisor's copy of the scout's fd.
    fn openat(
        &mut self,
        dirfd: Option<BorrowedFd<'_>>,
        path: &Path,
        flags: i32,
        mode: u32,
    ) -> FsResult<OwnedFd>;
    /// `access(2)`.
    fn access(&mut self, path: &Path, mode: i32) -> FsResult<()>;
    /// `stat(2)`.
    fn stat(&mut self, path: &Path) -> FsResult<libc::stat>;
    /// `lstat(2)`.
    fn lstat(&mut self, path: &Path) -> FsResult<libc::stat>;
    /// `fstat(2)` on a received descriptor.
    fn fstat(&mut self, fd: BorrowedFd<'_>) -> FsResult<libc::stat>;
    /// `readlink(2)`, bounded by the caller's buffer size.
    fn readlink(&mut self, path: &Path, bufsize: usize) -> FsResult<Vec<u8>>;
    /// `unlink(2)`.
    fn unlink(&mut self, path: &Path) -> FsResult<()>;
}

fn cpath(path: &Path) -> FsResult<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::EINVAL)
}

/// Straight passthrough to the host filesystem.
#[derive(Debug, Default)]
pub struct HostFs;

impl MissionFs for HostFs {
    fn open(&mut self, path: &Path, flags: i32, mode: u32) -> FsResult<OwnedFd> {
        let c = cpath(path)?;
        // SAFETY: c is a valid nul-terminated path.
        let fd = Errno::result(unsafe { libc::open(c.as_ptr(), flags, mode) })?;
        // SAFETY: fd was just returned by open and is owned here.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn openat(
        &mut self,
        dirfd: Option<BorrowedFd<'_>>,
        path: &Path,
        flags: i32,
        mode: u32,
    ) -> FsResult<OwnedFd> {
        let c = cpath(path)?;
        let raw_dir = dirfd.map_or(libc::AT_FDCWD, |fd| fd.as_raw_fd());
        // SAFETY: c is a valid nul-terminated path; raw_dir is live for
        // the duration of the call.
        let fd = Errno::result(unsafe { libc::openat(raw_dir, c.as_ptr(), flags, mode) })?;
        // SAFETY: fd was just returned by openat and is owned here.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn access(&mut self, path: &Path, mode: i32) -> FsResult<()> {
        let c = cpath(path)?;
        // SAFETY: c is a valid nul-terminated path.
        Errno::result(unsafe { libc::access(c.as_ptr(), mode) }).map(drop)
    }

    fn stat(&mut self, path: &Path) -> FsResult<libc::stat> {
        let c = cpath(path)?;
        let mut st = MaybeUninit::uninit();
        // SAFETY: st is a valid out-pointer for one stat struct.
        let r = unsafe { libc::stat(c.as_ptr(), st.as_mut_ptr()) };
        Errno::result(r).map(|_| unsafe { st.assume_init() })
    }

    fn lstat(&mut self, path: &Path) -> FsResult<libc::stat> {
        let c = cpath(path)?;
        let mut st = MaybeUninit::uninit();
        // SAFETY: st is a valid out-pointer for one stat struct.
        let r = unsafe { libc::lstat(c.as_ptr(), st.as_mut_ptr()) };
        Errno::result(r).map(|_| unsafe { st.assume_init() })
    }

    fn fstat(&mut self, fd: BorrowedFd<'_>) -> FsResult<libc::stat> {
        let mut st = MaybeUninit::uninit();
        // SAFETY: st is a valid out-pointer for one stat struct.
        let r = unsafe { libc::fstat(fd.as_raw_fd(), st.as_mut_ptr()) };
        Errno::result(r).map(|_| unsafe { st.assume_init() })
    }

    fn readlink(&mut self, path: &Path, bufsize: usize) -> FsResult<Vec<u8>> {
        if bufsize == 0 {
            // Wire contract: a zero-sized buffer reads nothing and
            // reports 0, where POSIX readlink(2) would give EINVAL.
            return Ok(Vec::new());
        }
        let c = cpath(path)?;
        let mut buf = vec![0u8; bufsize];
        // SAFETY: buf is bufsize writable bytes.
        let n = Errno::result(unsafe {
            libc::readlink(c.as_ptr(), buf.as_mut_ptr().cast(), bufsize)
        })?;
        buf.truncate(usize::try_from(n).unwrap_or(0));
        Ok(buf)
    }

    fn unlink(&mut self, path: &Path) -> FsResult<()> {
        let c = cpath(path)?;
        // SAFETY: c is a valid nul-terminated path.
        Errno::result(unsafe { libc::unlink(c.as_ptr()) }).map(drop)
    }
}

/// Host filesystem filtered through an OGL overlay repository.
///
/// The repository can veto a name outright (`Nonexistent`/`Removed`
/// entries answer `ENOENT` without touching the host), successful
/// unlinks are recorded as removals, and host-side `ENOENT` results are
/// cached as nonexistent markers so repeated probes of the same missing
/// name stay in memory.
pub struct OverlayFs {
    repo: Repo,
    host: HostFs,
}

impl OverlayFs {
    /// Wraps the host filesystem with `repo` as the overlay.
    #[must_use]
    pub fn new(repo: Repo) -> Self {
        Self {
            repo,
            host: HostFs,
        }
    }

    /// Hands the repository back (e.g. to commit the session's view).
    #[must_use]
    pub fn into_repo(self) -> Repo {
        self.repo
    }

    fn in_repo(&self, path: &Path) -> bool {
        path.starts_with(self.repo.root_fs_path())
    }

    /// Whether the overlay vetoes this path.
    fn vetoed(&mut self, path: &Path) -> bool {
        if !self.in_repo(path) {
            return false;
        }
        match self.repo.find(path) {
            Ok(Some(h)) => matches!(
                self.repo.entry(h),
                Entry::Nonexistent | Entry::Removed
            ),
            _ => false,
        }
    }

    fn cache_negative(&mut self, path: &Path) {
        if self.in_repo(path) {
            // Best effort; a collision just means someone recorded the
            // name first.
            if self.repo.mark_nonexistent(path).is_ok() {
                tracing::trace!(path = %path.display(), "cached negative lookup");
            }
        }
    }

    fn filter<T>(&mut self, path: &Path, result: FsResult<T>) -> FsResult<T> {
        if let Err(Errno::ENOENT) = result {
            self.cache_negative(path);
        }
        result
    }
}

impl MissionFs for OverlayFs {
    fn open(&mut self, path: &Path, flags: i32, mode: u32) -> FsResult<OwnedFd> {
        if self.vetoed(path) {
            return Err(Errno::ENOENT);
        }
        let r = self.host.open(path, flags, mode);
        self.filter(path, r)
    }

    fn openat(
        &mut self,
        dirfd: Option<BorrowedFd<'_>>,
        path: &Path,
        flags: i32,
        mode: u32,
    ) -> FsResult<OwnedFd> {
        // Only absolute paths can be checked against the overlay; a
        // dirfd-relative name resolves in the host's namespace.
        if path.is_absolute() && self.vetoed(path) {
            return Err(Errno::ENOENT);
        }
        self.host.openat(dirfd, path, flags, mode)
    }

    fn access(&mut self, path: &Path, mode: i32) -> FsResult<()> {
        if self.vetoed(path) {
            return Err(Errno::ENOENT);
        }
        let r = self.host.access(path, mode);
        self.filter(path, r)
    }

    fn stat(&mut self, path: &Path) -> FsResult<libc::stat> {
        if self.vetoed(path) {
            return Err(Errno::ENOENT);
        }
        let r = self.host.stat(path);
        self.filter(path, r)
    }

    fn lstat(&mut self, path: &Path) -> FsResult<libc::stat> {
        if self.vetoed(path) {
            return Err(Errno::ENOENT);
        }
        let r = self.host.lstat(path);
        self.filter(path, r)
    }

    fn fstat(&mut self, fd: BorrowedFd<'_>) -> FsResult<libc::stat> {
        self.host.fstat(fd)
    }

    fn readlink(&mut self, path: &Path, bufsize: usize) -> FsResult<Vec<u8>> {
        if self.vetoed(path) {
            return Err(Errno::ENOENT);
        }
        let r = self.host.readlink(path, bufsize);
        self.filter(path, r)
    }

    fn unlink(&mut self, path: &Path) -> FsResult<()> {
        if self.vetoed(path) {
            return Err(Errno::ENOENT);
        }
        self.host.unlink(path)?;
        if self.in_repo(path) {
            // Record the removal; the name is now known-absent.
            let _ = self.repo.remove(path);
            let _ = self.repo.mark_nonexistent(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn host_open_read_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let p = dir.path().join("f");
        std::fs::write(&p, b"host bytes").expect("write");

        let mut fs = HostFs;
        let fd = fs.open(&p, libc::O_RDONLY, 0).expect("open");
        let mut buf = [0u8; 32];
        // SAFETY: buf is writable for its whole length.
        let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        assert_eq!(&buf[..n as usize], b"host bytes");
    }

    #[test]
    fn host_missing_paths_report_enoent() {
        let mut fs = HostFs;
        let missing = Path::new("/definitely/missing/path");
        assert_eq!(fs.access(missing, libc::F_OK), Err(Errno::ENOENT));
        assert_eq!(fs.stat(missing).unwrap_err(), Errno::ENOENT);
        assert_eq!(fs.open(missing, libc::O_RDONLY, 0).unwrap_err(), Errno::ENOENT);
    }

    #[test]
    fn host_readlink_zero_buf_reads_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let link = dir.path().join("l");
        std::os::unix::fs::symlink("target", &link).expect("symlink");

        let mut fs = HostFs;
        assert_eq!(fs.readlink(&link, 0).expect("readlink"), Vec::<u8>::new());
        assert_eq!(fs.readlink(&link, 64).expect("readlink"), b"target");
    }

    #[test]
    fn host_fstat_matches_stat() {
        let dir = tempfile::tempdir().expect("tempdir");
        let p = dir.path().join("f");
        std::fs::write(&p, b"x").expect("write");

        let mut fs = HostFs;
        let st = fs.stat(&p).expect("stat");
        let fd = fs.open(&p, libc::O_RDONLY, 0).expect("open");
        let fst = fs.fstat(fd.as_fd()).expect("fstat");
        assert_eq!(st.st_ino, fst.st_ino);
        assert_eq!(st.st_size, 1);
    }

    use std::os::fd::AsFd;

    fn overlay_fixture() -> (tempfile::TempDir, PathBuf, OverlayFs) {
        let dir = tempfile::tempdir().expect("tempdir");
        let tree = dir.path().join("tree");
        std::fs::create_dir(&tree).expect("mkdir");
        let repo_path = dir.path().join("repo");
        Repo::init(&repo_path).expect("init");
        let repo = Repo::open(&tree, &repo_path).expect("open");
        (dir, tree, OverlayFs::new(repo))
    }

    #[test]
    fn overlay_vetoes_nonexistent_entries() {
        let (_dir, tree, mut fs) = overlay_fixture();
        let p = tree.join("banned");
        std::fs::write(&p, b"present on host").expect("write");
        fs.repo.mark_nonexistent(&p).expect("mark");

        assert_eq!(fs.open(&p, libc::O_RDONLY, 0).unwrap_err(), Errno::ENOENT);
        assert_eq!(fs.stat(&p).unwrap_err(), Errno::ENOENT);
    }

    #[test]
    fn overlay_unlink_records_removal() {
        let (_dir, tree, mut fs) = overlay_fixture();
        let p = tree.join("victim");
        std::fs::write(&p, b"bytes").expect("write");
        fs.repo.add_file(&p).expect("add");

        fs.unlink(&p).expect("unlink");
        assert!(!p.exists());
        // Recreating the host file does not resurrect it in the view.
        std::fs::write(&p, b"again").expect("write");
        assert_eq!(fs.open(&p, libc::O_RDONLY, 0).unwrap_err(), Errno::ENOENT);
    }

    #[test]
    fn overlay_caches_negative_lookups() {
        let (_dir, tree, mut fs) = overlay_fixture();
        let p = tree.join("ghost");
        assert_eq!(fs.stat(&p).unwrap_err(), Errno::ENOENT);
        let h = fs.repo.find(&p).expect("find").expect("cached entry");
        assert!(matches!(fs.repo.entry(h), Entry::Nonexistent));
    }

    #[test]
    fn overlay_passes_paths_outside_its_root_to_the_host() {
        let (_dir, _tree, mut fs) = overlay_fixture();
        assert!(fs.access(Path::new("/"), libc::F_OK).is_ok());
    }
}

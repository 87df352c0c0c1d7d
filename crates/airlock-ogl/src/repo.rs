//! Repository operations: init, open, lookup, mutation, commit.

use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::entry::{DirData, Entry, FileData, Handle, LinkData};
use crate::error::{OglError, Result};
use crate::hash::{hash64_buf, hash64_file, hex16};
use crate::object::{
    self, DirEntryRec, ENT_DIR, ENT_FILE, ENT_LOCAL, ENT_NONEXISTENT, ENT_SYMLINK, GROUP_MASK,
    USER_MASK,
};

const MAX_SYMLINK_TARGET: usize = 256;

/// A content-addressed view of one directory tree.
///
/// The repository owns an arena of [`Entry`] values; directories refer
/// to children by [`Handle`]. One `Repo` instance per logical view, no
/// cross-process sharing.
pub struct Repo {
    root_fs_path: PathBuf,
    repo_path: PathBuf,
    pub(crate) arena: Vec<Entry>,
    root: Handle,
}

impl Repo {
    /// Creates a new repository directory holding an empty root.
    ///
    /// Writes `objects/` and a `root-ref` naming the canonical empty
    /// directory object.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories or files cannot be created.
    pub fn init(repo: &Path) -> Result<()> {
        std::fs::create_dir(repo).map_err(|e| OglError::io(repo, e))?;
        let objects = repo.join("objects");
        std::fs::create_dir(&objects).map_err(|e| OglError::io(&objects, e))?;

        let obj = object::empty_dir_object();
        let hash = hash64_buf(&obj);
        let obj_path = objects.join(hex16(hash));
        std::fs::write(&obj_path, &obj).map_err(|e| OglError::io(&obj_path, e))?;
        write_root_ref(repo, hash)?;
        tracing::debug!(repo = %repo.display(), root = %hex16(hash), "initialized repository");
        Ok(())
    }

    /// Opens a repository and binds it to a backing filesystem root.
    ///
    /// The root directory object is loaded eagerly; everything below it
    /// loads on demand.
    ///
    /// # Errors
    ///
    /// Returns an error if `root-ref` is missing or malformed, or the
    /// root object cannot be read.
    pub fn open(root_fs_path: &Path, repo_path: &Path) -> Result<Self> {
        let ref_path = repo_path.join("root-ref");
        let mut buf = String::new();
        let _ = std::fs::File::open(&ref_path)
            .and_then(|mut f| f.read_to_string(&mut buf))
            .map_err(|e| OglError::io(&ref_path, e))?;
        let line = buf.strip_suffix('\n').ok_or_else(|| OglError::BadRootRef {
            repo: repo_path.to_path_buf(),
        })?;
        if line.len() != 16 {
            return Err(OglError::BadRootRef {
                repo: repo_path.to_path_buf(),
            });
        }
        let hash = u64::from_str_radix(line, 16).map_err(|_| OglError::BadRootRef {
            repo: repo_path.to_path_buf(),
        })?;

        let mut root_dir = DirData::new(None, root_fs_path.to_path_buf());
        root_dir.hash = hash;
        let mut repo = Self {
            root_fs_path: root_fs_path.to_path_buf(),
            repo_path: repo_path.to_path_buf(),
            arena: vec![Entry::Dir(root_dir)],
            root: Handle(0),
        };
        repo.load_dir(repo.root)?;
        Ok(repo)
    }

    /// Backing filesystem root this view describes.
    #[must_use]
    pub fn root_fs_path(&self) -> &Path {
        &self.root_fs_path
    }

    /// Handle of the root directory.
    #[must_use]
    pub const fn root(&self) -> Handle {
        self.root
    }

    /// Hash currently recorded for the root directory.
    #[must_use]
    pub fn root_hash(&self) -> u64 {
        self.dir(self.root).hash
    }

    /// Borrows an arena entry.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale (programmer error).
    #[must_use]
    pub fn entry(&self, h: Handle) -> &Entry {
        &self.arena[h.0]
    }

    pub(crate) fn entry_mut(&mut self, h: Handle) -> &mut Entry {
        &mut self.arena[h.0]
    }

    pub(crate) fn alloc(&mut self, e: Entry) -> Handle {
        self.arena.push(e);
        Handle(self.arena.len() - 1)
    }

    pub(crate) fn dir(&self, h: Handle) -> &DirData {
        match &self.arena[h.0] {
            Entry::Dir(d) => d,
            other => unreachable!("handle does not name a directory: {other:?}"),
        }
    }

    pub(crate) fn dir_mut(&mut self, h: Handle) -> &mut DirData {
        match &mut self.arena[h.0] {
            Entry::Dir(d) => d,
            other => unreachable!("handle does not name a directory: {other:?}"),
        }
    }

    /// Marks `h` and every ancestor modified.
    pub(crate) fn mark_modified(&mut self, h: Handle) {
        let mut cur = Some(h);
        while let Some(c) = cur {
            let d = self.dir_mut(c);
            d.modified = true;
            cur = d.parent;
        }
    }

    /// Loads a directory's entries from storage if needed.
    pub(crate) fn ensure_loaded(&mut self, h: Handle) -> Result<()> {
        let d = self.dir(h);
        if d.loaded || d.modified {
            return Ok(());
        }
        self.load_dir(h)
    }

    fn load_dir(&mut self, h: Handle) -> Result<()> {
        let (hash, base) = {
            let d = self.dir(h);
            (d.hash, d.path.clone())
        };
        let bytes = self.load_obj(hash)?;
        let recs = object::decode_dir(&bytes);
        for rec in recs {
            let child = match rec.type_nibble() {
                ENT_NONEXISTENT => Entry::Nonexistent,
                ENT_LOCAL => Entry::Local,
                ENT_FILE => Entry::File(FileData {
                    hash: rec.hash,
                    mode: rec.perms(),
                    own_user: rec.mode & USER_MASK != 0,
                    own_group: rec.mode & GROUP_MASK != 0,
                    valid_hash: true,
                }),
                ENT_DIR => {
                    let mut d = DirData::new(Some(h), base.join(&rec.name));
                    d.hash = rec.hash;
                    d.mode = rec.perms();
                    d.own_user = rec.mode & USER_MASK != 0;
                    d.own_group = rec.mode & GROUP_MASK != 0;
                    Entry::Dir(d)
                }
                ENT_SYMLINK => Entry::Symlink(LinkData {
                    hash: rec.hash,
                    target: String::new(),
                    mode: rec.perms(),
                    own_user: rec.mode & USER_MASK != 0,
                    own_group: rec.mode & GROUP_MASK != 0,
                    modified: false,
                    loaded: false,
                }),
                other => unreachable!("unknown dentry type {other} in object {}", hex16(hash)),
            };
            let ch = self.alloc(child);
            let _ = self.dir_mut(h).entries.insert(rec.name, ch);
        }
        let d = self.dir_mut(h);
        d.loaded = true;
        d.modified = false;
        Ok(())
    }

    /// Loads a symlink's target from storage if needed.
    pub(crate) fn ensure_symlink_loaded(&mut self, h: Handle) -> Result<()> {
        let hash = match &self.arena[h.0] {
            Entry::Symlink(l) if !l.loaded && !l.modified => l.hash,
            _ => return Ok(()),
        };
        let bytes = self.load_obj(hash)?;
        let target = object::decode_symlink(&bytes);
        if let Entry::Symlink(l) = self.entry_mut(h) {
            l.target = target;
            l.loaded = true;
        }
        Ok(())
    }

    fn relative<'p>(&self, path: &'p Path) -> &'p Path {
        assert!(
            path.starts_with(&self.root_fs_path),
            "{} is not under the repository root {}",
            path.display(),
            self.root_fs_path.display()
        );
        path.strip_prefix(&self.root_fs_path)
            .unwrap_or_else(|_| unreachable!())
    }

    /// Walks from the root to `path`, loading directories on demand.
    ///
    /// Returns `None` when any component is absent or an intermediate
    /// component is not a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory object fails to load.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a descendant of the repository root.
    pub fn find(&mut self, path: &Path) -> Result<Option<Handle>> {
        let rel = self.relative(path).to_path_buf();
        let mut cur = self.root;
        for comp in rel.iter() {
            let Some(name) = comp.to_str() else {
                return Ok(None);
            };
            if !matches!(self.entry(cur), Entry::Dir(_)) {
                return Ok(None);
            }
            self.ensure_loaded(cur)?;
            match self.dir(cur).entries.get(name) {
                Some(&child) => cur = child,
                None => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    /// Like [`Repo::find`], but only succeeds on directories.
    ///
    /// # Errors
    ///
    /// Propagates [`Repo::find`] failures.
    pub fn find_dir(&mut self, path: &Path) -> Result<Option<Handle>> {
        Ok(self
            .find(path)?
            .filter(|&h| matches!(self.entry(h), Entry::Dir(_))))
    }

    /// Resolves the parent directory of `path` and the final name.
    fn parent_dir(&mut self, path: &Path) -> Result<(Handle, String)> {
        let parent = path.parent().ok_or_else(|| OglError::NotFound {
            path: path.to_path_buf(),
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OglError::NotFound {
                path: path.to_path_buf(),
            })?;
        let dir = self
            .find_dir(parent)?
            .ok_or_else(|| OglError::NotADirectory {
                path: parent.to_path_buf(),
            })?;
        self.ensure_loaded(dir)?;
        Ok((dir, name.to_owned()))
    }

    fn insert_new(&mut self, path: &Path, entry: Entry) -> Result<Handle> {
        let (dir, name) = self.parent_dir(path)?;
        if self.dir(dir).entries.contains_key(&name) {
            return Err(OglError::Exists {
                path: path.to_path_buf(),
            });
        }
        let h = self.alloc(entry);
        let _ = self.dir_mut(dir).entries.insert(name, h);
        self.mark_modified(dir);
        Ok(h)
    }

    /// Starts tracking a regular file.
    ///
    /// The hash stays invalid until commit; the parent must exist and
    /// the name must be free.
    ///
    /// # Errors
    ///
    /// Returns [`OglError::Exists`] on a name collision and
    /// [`OglError::NotADirectory`]/[`OglError::NotFound`] when the
    /// parent cannot be resolved.
    pub fn add_file(&mut self, path: &Path) -> Result<()> {
        let _ = self.insert_new(path, Entry::File(FileData::default()))?;
        Ok(())
    }

    /// Starts tracking a directory.
    ///
    /// A freshly added directory is loaded and modified so the next
    /// commit dumps it.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Repo::add_file`].
    pub fn add_dir(&mut self, path: &Path) -> Result<()> {
        let parent_h = {
            let (dir, _) = self.parent_dir(path)?;
            dir
        };
        let mut d = DirData::new(Some(parent_h), path.to_path_buf());
        d.loaded = true;
        d.modified = true;
        let h = self.insert_new(path, Entry::Dir(d))?;
        self.mark_modified(h);
        Ok(())
    }

    /// Starts tracking a symlink.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Repo::add_file`].
    pub fn add_symlink(&mut self, path: &Path) -> Result<()> {
        let _ = self.insert_new(path, Entry::Symlink(LinkData::new()))?;
        Ok(())
    }

    /// Records that `path` must always be served from the host.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Repo::add_file`].
    pub fn mark_local(&mut self, path: &Path) -> Result<()> {
        let _ = self.insert_new(path, Entry::Local)?;
        Ok(())
    }

    /// Records that `path` is known to be absent.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Repo::add_file`].
    pub fn mark_nonexistent(&mut self, path: &Path) -> Result<()> {
        let _ = self.insert_new(path, Entry::Nonexistent)?;
        Ok(())
    }

    /// Removes the entry at `path`, including whole subtrees.
    ///
    /// # Errors
    ///
    /// Returns [`OglError::NotFound`] if the name is absent.
    pub fn remove(&mut self, path: &Path) -> Result<()> {
        let (dir, name) = self.parent_dir(path)?;
        if self.dir_mut(dir).entries.remove(&name).is_none() {
            return Err(OglError::NotFound {
                path: path.to_path_buf(),
            });
        }
        self.mark_modified(dir);
        Ok(())
    }

    /// Commits the current view: computes missing file hashes, dumps
    /// modified symlinks, dumps modified directories children-first,
    /// then rewrites `root-ref`.
    ///
    /// # Errors
    ///
    /// Any failure aborts the commit with `root-ref` untouched; objects
    /// already written stay behind harmlessly (the store is
    /// content-addressed).
    pub fn commit(&mut self) -> Result<()> {
        if !self.dir(self.root).modified {
            return Ok(());
        }

        enum Pending {
            Nothing,
            HashFile,
            DescendDir,
            DumpSymlink,
        }

        let mut stack = vec![self.root];
        let mut dirs = Vec::new();
        while let Some(h) = stack.pop() {
            assert!(self.dir(h).loaded, "modified directory must be loaded");
            dirs.push(h);
            let base = self.dir(h).path.clone();
            let children: Vec<(String, Handle)> = self
                .dir(h)
                .entries
                .iter()
                .map(|(n, &c)| (n.clone(), c))
                .collect();
            for (name, ch) in children {
                let pending = match &self.arena[ch.0] {
                    Entry::File(f) if !f.valid_hash => Pending::HashFile,
                    Entry::Dir(d) if d.modified => Pending::DescendDir,
                    Entry::Symlink(l) if l.modified => Pending::DumpSymlink,
                    _ => Pending::Nothing,
                };
                match pending {
                    Pending::HashFile => self.compute_file_hash(ch, &base.join(&name))?,
                    Pending::DescendDir => stack.push(ch),
                    Pending::DumpSymlink => self.dump_symlink(ch, &base.join(&name))?,
                    Pending::Nothing => {}
                }
            }
        }

        for h in dirs.iter().rev() {
            self.dump_dir(*h)?;
        }
        let root_hash = self.dir(self.root).hash;
        write_root_ref(&self.repo_path, root_hash)?;
        tracing::debug!(root = %hex16(root_hash), dirs = dirs.len(), "committed");
        Ok(())
    }

    fn compute_file_hash(&mut self, h: Handle, fs_path: &Path) -> Result<()> {
        let hash = hash64_file(fs_path)?;
        let meta = std::fs::symlink_metadata(fs_path).map_err(|e| OglError::io(fs_path, e))?;
        // SAFETY: getuid/getgid cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        if let Entry::File(f) = self.entry_mut(h) {
            f.hash = hash;
            f.valid_hash = true;
            f.mode = (meta.mode() & 0o777) as u16;
            f.own_user = meta.uid() == uid;
            f.own_group = meta.gid() == gid;
        }
        Ok(())
    }

    fn dump_symlink(&mut self, h: Handle, fs_path: &Path) -> Result<()> {
        let target_path = std::fs::read_link(fs_path).map_err(|e| OglError::io(fs_path, e))?;
        let target = target_path
            .to_str()
            .ok_or_else(|| OglError::TargetTooLong {
                path: fs_path.to_path_buf(),
            })?
            .to_owned();
        if target.len() + 1 > MAX_SYMLINK_TARGET {
            return Err(OglError::TargetTooLong {
                path: fs_path.to_path_buf(),
            });
        }
        let bytes = object::encode_symlink(&target);
        let hash = hash64_buf(&bytes);
        self.store_obj(hash, &bytes)?;

        let meta = std::fs::symlink_metadata(fs_path).map_err(|e| OglError::io(fs_path, e))?;
        // SAFETY: getuid/getgid cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        if let Entry::Symlink(l) = self.entry_mut(h) {
            l.hash = hash;
            l.target = target;
            l.modified = false;
            l.loaded = true;
            l.mode = (meta.mode() & 0o777) as u16;
            l.own_user = meta.uid() == uid;
            l.own_group = meta.gid() == gid;
        }
        Ok(())
    }

    fn dump_dir(&mut self, h: Handle) -> Result<()> {
        assert!(self.dir(h).loaded);
        let mut recs = Vec::with_capacity(self.dir(h).entries.len());
        for (name, &ch) in &self.dir(h).entries {
            let ent = &self.arena[ch.0];
            let mut mode = ent.type_nibble() << 12;
            let hash = ent.hash().unwrap_or(0);
            match ent {
                Entry::File(f) => {
                    mode |= f.mode;
                    mode |= if f.own_user { USER_MASK } else { 0 };
                    mode |= if f.own_group { GROUP_MASK } else { 0 };
                }
                Entry::Dir(d) => {
                    mode |= d.mode;
                    mode |= if d.own_user { USER_MASK } else { 0 };
                    mode |= if d.own_group { GROUP_MASK } else { 0 };
                }
                Entry::Symlink(l) => {
                    mode |= l.mode;
                    mode |= if l.own_user { USER_MASK } else { 0 };
                    mode |= if l.own_group { GROUP_MASK } else { 0 };
                }
                _ => {}
            }
            recs.push(DirEntryRec {
                name: name.clone(),
                mode,
                hash,
            });
        }

        let dir_path = self.dir(h).path.clone();
        let bytes = object::encode_dir(&recs, &dir_path)?;
        let hash = hash64_buf(&bytes);
        self.store_obj(hash, &bytes)?;

        let meta =
            std::fs::symlink_metadata(&dir_path).map_err(|e| OglError::io(&dir_path, e))?;
        // SAFETY: getuid/getgid cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        let d = self.dir_mut(h);
        d.hash = hash;
        d.mode = (meta.mode() & 0o777) as u16;
        d.own_user = meta.uid() == uid;
        d.own_group = meta.gid() == gid;
        d.modified = false;
        d.loaded = true;
        Ok(())
    }

    /// Writes an object file if it is not already present.
    ///
    /// Idempotent: content-addressing guarantees an existing file holds
    /// the same bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the object file cannot be written.
    pub fn store_obj(&self, hash: u64, bytes: &[u8]) -> Result<()> {
        let path = self.repo_path.join("objects").join(hex16(hash));
        if path.exists() {
            return Ok(());
        }
        std::fs::write(&path, bytes).map_err(|e| OglError::io(&path, e))
    }

    /// Reads an object file.
    ///
    /// # Errors
    ///
    /// Returns an error if the object file cannot be read.
    pub fn load_obj(&self, hash: u64) -> Result<Vec<u8>> {
        let path = self.repo_path.join("objects").join(hex16(hash));
        std::fs::read(&path).map_err(|e| OglError::io(&path, e))
    }

    /// Whether the object store holds `hash`.
    #[must_use]
    pub fn has_obj(&self, hash: u64) -> bool {
        self.repo_path.join("objects").join(hex16(hash)).exists()
    }
}

fn write_root_ref(repo: &Path, hash: u64) -> Result<()> {
    let path = repo.join("root-ref");
    let mut f = std::fs::File::create(&path).map_err(|e| OglError::io(&path, e))?;
    writeln!(f, "{}", hex16(hash)).map_err(|e| OglError::io(&path, e))
}

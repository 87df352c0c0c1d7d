//! In-memory tree entries.
//!
//! The original design called for a class hierarchy with parent
//! back-pointers; here the repository owns a flat arena of [`Entry`]
//! values and directories refer to children (and their parent) by
//! [`Handle`]. Lookups are O(1) and the cycle never touches ownership.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Index of an entry in the repository arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub(crate) usize);

/// A name slot inside a directory.
///
/// `Nonexistent` records a name known to be absent from the backing
/// filesystem so repeated probes can be answered without a host lookup.
/// `Local` marks a name that must always be served from the host.
#[derive(Debug, Clone)]
pub enum Entry {
    /// Name verified absent from the tree.
    Nonexistent,
    /// Name removed from the tree in this view.
    Removed,
    /// Name served from the local filesystem, never stored.
    Local,
    /// Regular file; bytes live on the host, only the hash is tracked.
    File(FileData),
    /// Directory node.
    Dir(DirData),
    /// Symbolic link.
    Symlink(LinkData),
}

impl Entry {
    /// Storage type nibble for this entry (see `object.rs`).
    #[must_use]
    pub const fn type_nibble(&self) -> u16 {
        match self {
            Self::Nonexistent | Self::Removed => crate::object::ENT_NONEXISTENT,
            Self::File(_) => crate::object::ENT_FILE,
            Self::Dir(_) => crate::object::ENT_DIR,
            Self::Symlink(_) => crate::object::ENT_SYMLINK,
            Self::Local => crate::object::ENT_LOCAL,
        }
    }

    /// Content hash when this entry kind carries one.
    #[must_use]
    pub const fn hash(&self) -> Option<u64> {
        match self {
            Self::File(f) => Some(f.hash),
            Self::Dir(d) => Some(d.hash),
            Self::Symlink(l) => Some(l.hash),
            _ => None,
        }
    }

    /// Borrows the directory payload, if this is a directory.
    #[must_use]
    pub const fn as_dir(&self) -> Option<&DirData> {
        match self {
            Self::Dir(d) => Some(d),
            _ => None,
        }
    }

    /// Borrows the file payload, if this is a file.
    #[must_use]
    pub const fn as_file(&self) -> Option<&FileData> {
        match self {
            Self::File(f) => Some(f),
            _ => None,
        }
    }

    /// Borrows the symlink payload, if this is a symlink.
    #[must_use]
    pub const fn as_symlink(&self) -> Option<&LinkData> {
        match self {
            Self::Symlink(l) => Some(l),
            _ => None,
        }
    }
}

/// Payload of a tracked regular file.
///
/// `valid_hash` starts false; the hash is computed from the backing file
/// during commit, together with the ownership-match flags.
#[derive(Debug, Clone, Default)]
pub struct FileData {
    /// 64-bit content hash (meaningful only when `valid_hash`).
    pub hash: u64,
    /// Low nine permission bits from the backing file.
    pub mode: u16,
    /// Committer's uid matched the file's owner at commit time.
    pub own_user: bool,
    /// Committer's gid matched the file's group at commit time.
    pub own_group: bool,
    /// Whether `hash` reflects the current backing bytes.
    pub valid_hash: bool,
}

/// Payload of a directory node.
///
/// State machine: `modified == false && loaded == false` means the
/// content must be loaded from storage before use; any other combination
/// is fully usable. When `loaded && !modified`, `hash` is canonical for
/// the in-memory content. Whenever a directory is modified, every
/// ancestor is marked modified too.
#[derive(Debug, Clone)]
pub struct DirData {
    /// Hash of the serialized directory object.
    pub hash: u64,
    /// Low nine permission bits, collected at dump time.
    pub mode: u16,
    /// uid match flag, collected at dump time.
    pub own_user: bool,
    /// gid match flag, collected at dump time.
    pub own_group: bool,
    /// In-memory content diverges from `hash`.
    pub modified: bool,
    /// Entries are present in memory.
    pub loaded: bool,
    /// Parent directory, `None` for the root.
    pub parent: Option<Handle>,
    /// Absolute path of this directory on the backing filesystem.
    pub path: PathBuf,
    /// Child name → arena handle, byte-lexicographically ordered.
    pub entries: BTreeMap<String, Handle>,
}

impl DirData {
    pub(crate) fn new(parent: Option<Handle>, path: PathBuf) -> Self {
        Self {
            hash: 0,
            mode: 0,
            own_user: false,
            own_group: false,
            modified: false,
            loaded: false,
            parent,
            path,
            entries: BTreeMap::new(),
        }
    }
}

/// Payload of a symbolic link.
///
/// A freshly added symlink starts modified and unloaded; dumping or
/// loading it leaves it loaded and unmodified.
#[derive(Debug, Clone)]
pub struct LinkData {
    /// Hash of the serialized symlink object.
    pub hash: u64,
    /// Link target (read from the filesystem at dump time, or from the
    /// object at load time). Empty until either happens.
    pub target: String,
    /// Low nine permission bits, collected at dump time.
    pub mode: u16,
    /// uid match flag.
    pub own_user: bool,
    /// gid match flag.
    pub own_group: bool,
    /// Needs dumping on the next commit.
    pub modified: bool,
    /// Target string is present in memory.
    pub loaded: bool,
}

impl LinkData {
    pub(crate) fn new() -> Self {
        Self {
            hash: 0,
            target: String::new(),
            mode: 0,
            own_user: false,
            own_group: false,
            modified: true,
            loaded: false,
        }
    }
}

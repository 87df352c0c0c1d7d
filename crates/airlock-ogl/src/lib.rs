//! OGL: a content-addressed filesystem overlay repository.
//!
//! A repository records a view of a directory tree the way Git records a
//! commit: directories and symlinks are serialized into small binary
//! objects named by the first eight bytes of their SHA-256 digest, and a
//! single `root-ref` file points at the current root directory object.
//! Regular files are *not* stored: only their content hash is, computed
//! lazily at commit time while the bytes stay on the host filesystem.
//!
//! On-disk layout:
//!
//! ```text
//! <repo>/
//!   root-ref            "<16 hex>\n"
//!   objects/<16 hex>    one file per object, content-addressed
//! ```
//!
//! The supervisor uses a repository as the backing store for answering
//! filesystem syscalls on behalf of sandboxed processes; `merge` allows
//! the views of two sandbox runs to be reconciled against their common
//! ancestor.

mod entry;
mod error;
mod hash;
mod merge;
mod object;
mod repo;

pub use entry::{DirData, Entry, FileData, Handle, LinkData};
pub use error::{OglError, Result};
pub use hash::{hash64_buf, hash64_file, hex16};
pub use merge::merge;
pub use object::{
    DirEntryRec, ENT_DIR, ENT_FILE, ENT_LOCAL, ENT_NONEXISTENT, ENT_SYMLINK, GROUP_MASK,
    OBJ_DIR, OBJ_SUPER_DIR, OBJ_SYMLINK, OBJECT_MAGIC, PLACEHOLDER_MASK, USER_MASK,
};
pub use repo::Repo;

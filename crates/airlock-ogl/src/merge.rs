//! Three-way merge of repository views.
//!
//! `merge(src, dst, common)` replays the changes between `common` and
//! `src` onto `dst`. The walk is two-phase: a full conflict check first,
//! then the apply pass, so a conflicting merge leaves `dst` logically
//! untouched.
//!
//! Conflict rules per directory diff `(op, name)` of `src` against
//! `common`:
//!
//! - `Add`: conflict iff `dst` already contains `name`.
//! - `Remove`: conflict iff `name` is absent from `dst`, or `dst`'s
//!   entry differs from `common`'s (type or hash).
//! - `Modify`: conflict iff absent in `dst`, type mismatch between
//!   `dst` and `common`, or hash mismatch between `dst` and `common`,
//!   except when both `src[name]` and `dst[name]` are directories, in
//!   which case the merge descends instead.

use std::path::PathBuf;

use crate::entry::{DirData, Entry, Handle, LinkData};
use crate::error::{OglError, Result};
use crate::repo::Repo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffOp {
    Add,
    Remove,
    Modify,
}

#[derive(Debug)]
struct DiffItem {
    op: DiffOp,
    name: String,
}

/// Diffs directory `a` (in `a_repo`) against directory `b` (in `b_repo`).
fn diff_dirs(
    a_repo: &mut Repo,
    a: Handle,
    b_repo: &mut Repo,
    b: Handle,
) -> Result<Vec<DiffItem>> {
    a_repo.ensure_loaded(a)?;
    b_repo.ensure_loaded(b)?;

    let mut items = Vec::new();
    let a_names: Vec<String> = a_repo.dir(a).entries.keys().cloned().collect();
    let b_names: Vec<String> = b_repo.dir(b).entries.keys().cloned().collect();

    for name in &a_names {
        if !b_repo.dir(b).entries.contains_key(name) {
            items.push(DiffItem {
                op: DiffOp::Add,
                name: name.clone(),
            });
        }
    }
    for name in &b_names {
        if !a_repo.dir(a).entries.contains_key(name) {
            items.push(DiffItem {
                op: DiffOp::Remove,
                name: name.clone(),
            });
        }
    }
    for name in &a_names {
        let (Some(&ah), Some(&bh)) = (
            a_repo.dir(a).entries.get(name),
            b_repo.dir(b).entries.get(name),
        ) else {
            continue;
        };
        let ae = a_repo.entry(ah);
        let be = b_repo.entry(bh);
        let differs = if ae.type_nibble() == be.type_nibble() {
            // Placeholder kinds carry no content to compare.
            match (ae.hash(), be.hash()) {
                (Some(x), Some(y)) => x != y,
                _ => false,
            }
        } else {
            true
        };
        if differs {
            items.push(DiffItem {
                op: DiffOp::Modify,
                name: name.clone(),
            });
        }
    }
    Ok(items)
}

fn entries_match(x: &Entry, y: &Entry) -> bool {
    x.type_nibble() == y.type_nibble() && x.hash() == y.hash()
}

/// Copies a raw object between stores when the source store has it.
///
/// Returns whether the object was present.
fn copy_object(src: &Repo, dst: &Repo, hash: u64) -> Result<bool> {
    if !src.has_obj(hash) {
        return Ok(false);
    }
    let bytes = src.load_obj(hash)?;
    dst.store_obj(hash, &bytes)?;
    Ok(true)
}

/// Clones one non-directory entry from `src` into `dst`'s arena.
fn clone_flat(src: &mut Repo, src_h: Handle, dst: &mut Repo) -> Result<Entry> {
    Ok(match src.entry(src_h) {
        Entry::Nonexistent | Entry::Removed => Entry::Nonexistent,
        Entry::Local => Entry::Local,
        Entry::File(f) => Entry::File(f.clone()),
        Entry::Symlink(_) => {
            src.ensure_symlink_loaded(src_h)?;
            let l = match src.entry(src_h) {
                Entry::Symlink(l) => l.clone(),
                _ => unreachable!(),
            };
            // Carry the object across so dst's store stays closed under
            // its references; fall back to a re-dump when src never
            // stored it.
            let stored = copy_object(src, dst, l.hash)?;
            Entry::Symlink(LinkData {
                modified: l.modified || !stored,
                ..l
            })
        }
        Entry::Dir(_) => unreachable!("directories are cloned by clone_subtree"),
    })
}

/// Deep-copies a directory subtree across repositories.
///
/// The copies are marked modified so the destination's next commit dumps
/// them into its own object store.
fn clone_subtree(
    src: &mut Repo,
    src_h: Handle,
    dst: &mut Repo,
    dst_parent: Handle,
    path: PathBuf,
) -> Result<Handle> {
    src.ensure_loaded(src_h)?;
    let (hash, mode, own_user, own_group) = {
        let d = src.dir(src_h);
        (d.hash, d.mode, d.own_user, d.own_group)
    };
    let mut data = DirData::new(Some(dst_parent), path.clone());
    data.hash = hash;
    data.mode = mode;
    data.own_user = own_user;
    data.own_group = own_group;
    data.loaded = true;
    data.modified = true;
    let dst_h = dst.alloc(Entry::Dir(data));

    let children: Vec<(String, Handle)> = src
        .dir(src_h)
        .entries
        .iter()
        .map(|(n, &c)| (n.clone(), c))
        .collect();
    for (name, ch) in children {
        let cloned = if matches!(src.entry(ch), Entry::Dir(_)) {
            let sub = clone_subtree(src, ch, dst, dst_h, path.join(&name))?;
            let _ = dst.dir_mut(dst_h).entries.insert(name, sub);
            continue;
        } else {
            clone_flat(src, ch, dst)?
        };
        let h = dst.alloc(cloned);
        let _ = dst.dir_mut(dst_h).entries.insert(name, h);
    }
    Ok(dst_h)
}

/// Replays the changes between `common` and `src` onto `dst`.
///
/// All three repositories must describe the same backing root.
///
/// # Errors
///
/// Returns [`OglError::MergeConflict`] (with `dst` logically unchanged)
/// when a change collides with one made in `dst`, or an I/O error if an
/// object fails to load.
///
/// # Panics
///
/// Panics if the repositories describe different backing roots.
pub fn merge(src: &mut Repo, dst: &mut Repo, common: &mut Repo) -> Result<()> {
    assert_eq!(src.root_fs_path(), dst.root_fs_path());
    assert_eq!(src.root_fs_path(), common.root_fs_path());
    check(src, dst, common)?;
    apply(src, dst, common)
}

fn check(src: &mut Repo, dst: &mut Repo, common: &mut Repo) -> Result<()> {
    let mut queue = vec![src.root_fs_path().to_path_buf()];
    while let Some(dir_path) = queue.pop() {
        let s = src.find_dir(&dir_path)?.unwrap_or_else(|| {
            unreachable!("walk reached a non-directory in src: {}", dir_path.display())
        });
        let c = common.find_dir(&dir_path)?.unwrap_or_else(|| {
            unreachable!("walk reached a non-directory in common: {}", dir_path.display())
        });
        let conflict = |name: &str| OglError::MergeConflict {
            dir: dir_path.clone(),
            name: name.to_owned(),
        };

        for item in diff_dirs(src, s, common, c)? {
            let Some(d) = dst.find_dir(&dir_path)? else {
                return Err(conflict(&item.name));
            };
            dst.ensure_loaded(d)?;
            let dst_child = dst.dir(d).entries.get(&item.name).copied();
            match item.op {
                DiffOp::Add => {
                    if dst_child.is_some() {
                        return Err(conflict(&item.name));
                    }
                }
                DiffOp::Remove | DiffOp::Modify => {
                    let Some(dh) = dst_child else {
                        return Err(conflict(&item.name));
                    };
                    let ch = common.dir(c).entries[&item.name];
                    let both_dirs_in_src_and_dst = item.op == DiffOp::Modify
                        && matches!(dst.entry(dh), Entry::Dir(_))
                        && matches!(
                            src.entry(src.dir(s).entries[&item.name]),
                            Entry::Dir(_)
                        );
                    if both_dirs_in_src_and_dst {
                        // Both sides kept it a directory: descend.
                        queue.push(dir_path.join(&item.name));
                        continue;
                    }
                    if !entries_match(dst.entry(dh), common.entry(ch)) {
                        return Err(conflict(&item.name));
                    }
                }
            }
        }
    }
    Ok(())
}

fn apply(src: &mut Repo, dst: &mut Repo, common: &mut Repo) -> Result<()> {
    let mut queue = vec![src.root_fs_path().to_path_buf()];
    while let Some(dir_path) = queue.pop() {
        let s = src.find_dir(&dir_path)?.unwrap_or_else(|| {
            unreachable!("walk reached a non-directory in src: {}", dir_path.display())
        });
        let c = common.find_dir(&dir_path)?.unwrap_or_else(|| {
            unreachable!("walk reached a non-directory in common: {}", dir_path.display())
        });
        for item in diff_dirs(src, s, common, c)? {
            let d = dst
                .find_dir(&dir_path)?
                .unwrap_or_else(|| unreachable!("checked in the conflict pass"));
            dst.ensure_loaded(d)?;
            match item.op {
                DiffOp::Remove => {
                    let _ = dst.dir_mut(d).entries.remove(&item.name);
                    dst.mark_modified(d);
                }
                DiffOp::Add | DiffOp::Modify => {
                    let sh = src.dir(s).entries[&item.name];
                    let src_is_dir = matches!(src.entry(sh), Entry::Dir(_));
                    if item.op == DiffOp::Modify {
                        let dst_is_dir = dst
                            .dir(d)
                            .entries
                            .get(&item.name)
                            .is_some_and(|&dh| matches!(dst.entry(dh), Entry::Dir(_)));
                        if src_is_dir && dst_is_dir {
                            queue.push(dir_path.join(&item.name));
                            continue;
                        }
                        let _ = dst.dir_mut(d).entries.remove(&item.name);
                    }
                    let new = if src_is_dir {
                        clone_subtree(src, sh, dst, d, dir_path.join(&item.name))?
                    } else {
                        let cloned = clone_flat(src, sh, dst)?;
                        dst.alloc(cloned)
                    };
                    let _ = dst.dir_mut(d).entries.insert(item.name, new);
                    dst.mark_modified(d);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;

    struct Fixture {
        _root: tempfile::TempDir,
        tree: PathBuf,
        repos: Vec<PathBuf>,
    }

    /// One backing tree, three identical repositories committed over it.
    fn three_way(tree_setup: impl Fn(&Path)) -> Fixture {
        let root = tempfile::tempdir().expect("tempdir");
        let tree = root.path().join("tree");
        std::fs::create_dir(&tree).expect("mkdir tree");
        tree_setup(&tree);

        let mut repos = Vec::new();
        for name in ["src", "dst", "common"] {
            let rp = root.path().join(name);
            Repo::init(&rp).expect("init");
            repos.push(rp);
        }
        Fixture {
            _root: root,
            tree,
            repos,
        }
    }

    fn open_all(fx: &Fixture) -> (Repo, Repo, Repo) {
        let mut out = Vec::new();
        for rp in &fx.repos {
            out.push(Repo::open(&fx.tree, rp).expect("open"));
        }
        let common = out.pop().expect("common");
        let dst = out.pop().expect("dst");
        let src = out.pop().expect("src");
        (src, dst, common)
    }

    /// Seeds every repo with the same committed baseline.
    fn seed_baseline(fx: &Fixture, names: &[&str]) {
        for rp in &fx.repos {
            let mut repo = Repo::open(&fx.tree, rp).expect("open");
            for n in names {
                repo.add_file(&fx.tree.join(n)).expect("add");
            }
            repo.commit().expect("commit");
        }
    }

    #[test]
    fn merge_identity_is_a_no_op() {
        let fx = three_way(|tree| {
            std::fs::write(tree.join("x"), b"x-bytes").expect("write");
        });
        seed_baseline(&fx, &["x"]);
        let (mut src, mut dst, mut common) = open_all(&fx);
        let before = dst.root_hash();
        merge(&mut src, &mut dst, &mut common).expect("merge");
        dst.commit().expect("commit");
        assert_eq!(dst.root_hash(), before);
    }

    #[test]
    fn disjoint_additions_merge_cleanly() {
        let fx = three_way(|tree| {
            std::fs::write(tree.join("x"), b"x").expect("write");
            std::fs::write(tree.join("y"), b"y").expect("write");
            std::fs::write(tree.join("z"), b"z").expect("write");
            std::fs::write(tree.join("w"), b"w").expect("write");
        });
        seed_baseline(&fx, &["x", "y"]);

        let (mut src, mut dst, mut common) = open_all(&fx);
        src.add_file(&fx.tree.join("z")).expect("add z");
        src.commit().expect("commit src");
        dst.add_file(&fx.tree.join("w")).expect("add w");

        merge(&mut src, &mut dst, &mut common).expect("merge");
        assert!(dst.find(&fx.tree.join("z")).expect("find").is_some());
        assert!(dst.find(&fx.tree.join("w")).expect("find").is_some());
        dst.commit().expect("commit dst");
    }

    #[test]
    fn conflicting_modifications_are_rejected() {
        let fx = three_way(|tree| {
            std::fs::write(tree.join("x"), b"original").expect("write");
        });
        seed_baseline(&fx, &["x"]);

        let (mut src, mut dst, mut common) = open_all(&fx);
        // Both sides rewrite /x to different contents.
        let sx = src.find(&fx.tree.join("x")).expect("find").expect("x");
        if let Entry::File(f) = src.entry_mut(sx) {
            f.hash = 0x1111;
        }
        src.mark_modified(src.root());
        let dx = dst.find(&fx.tree.join("x")).expect("find").expect("x");
        if let Entry::File(f) = dst.entry_mut(dx) {
            f.hash = 0x2222;
        }
        let before = dst.entry(dx).hash();

        assert!(matches!(
            merge(&mut src, &mut dst, &mut common),
            Err(OglError::MergeConflict { .. })
        ));
        assert_eq!(dst.entry(dx).hash(), before, "dst must be unchanged");
    }

    #[test]
    fn add_collision_is_a_conflict() {
        let fx = three_way(|tree| {
            std::fs::write(tree.join("n"), b"n").expect("write");
        });
        seed_baseline(&fx, &[]);
        let (mut src, mut dst, mut common) = open_all(&fx);
        src.add_file(&fx.tree.join("n")).expect("add src");
        src.commit().expect("commit src");
        dst.add_file(&fx.tree.join("n")).expect("add dst");
        assert!(matches!(
            merge(&mut src, &mut dst, &mut common),
            Err(OglError::MergeConflict { .. })
        ));
    }

    #[test]
    fn removal_of_untouched_entry_merges() {
        let fx = three_way(|tree| {
            std::fs::write(tree.join("x"), b"x").expect("write");
            std::fs::write(tree.join("y"), b"y").expect("write");
        });
        seed_baseline(&fx, &["x", "y"]);
        let (mut src, mut dst, mut common) = open_all(&fx);
        src.remove(&fx.tree.join("y")).expect("remove");
        merge(&mut src, &mut dst, &mut common).expect("merge");
        assert!(dst.find(&fx.tree.join("y")).expect("find").is_none());
    }

    #[test]
    fn removal_of_entry_modified_in_dst_conflicts() {
        let fx = three_way(|tree| {
            std::fs::write(tree.join("x"), b"x").expect("write");
        });
        seed_baseline(&fx, &["x"]);
        let (mut src, mut dst, mut common) = open_all(&fx);
        src.remove(&fx.tree.join("x")).expect("remove");
        let dx = dst.find(&fx.tree.join("x")).expect("find").expect("x");
        if let Entry::File(f) = dst.entry_mut(dx) {
            f.hash = 0x3333;
        }
        assert!(matches!(
            merge(&mut src, &mut dst, &mut common),
            Err(OglError::MergeConflict { .. })
        ));
    }

    #[test]
    fn directory_vs_directory_modifications_descend() {
        let fx = three_way(|tree| {
            std::fs::create_dir(tree.join("d")).expect("mkdir");
            std::fs::write(tree.join("d/a"), b"a").expect("write");
            std::fs::write(tree.join("d/b"), b"b").expect("write");
        });
        for rp in &fx.repos {
            let mut repo = Repo::open(&fx.tree, rp).expect("open");
            repo.add_dir(&fx.tree.join("d")).expect("add d");
            repo.commit().expect("commit");
        }

        let (mut src, mut dst, mut common) = open_all(&fx);
        src.add_file(&fx.tree.join("d/a")).expect("add d/a");
        src.commit().expect("commit src");
        dst.add_file(&fx.tree.join("d/b")).expect("add d/b");

        merge(&mut src, &mut dst, &mut common).expect("merge");
        assert!(dst.find(&fx.tree.join("d/a")).expect("find").is_some());
        assert!(dst.find(&fx.tree.join("d/b")).expect("find").is_some());
    }

    #[test]
    fn added_subtree_is_deep_copied_and_commits_into_dst_store() {
        let fx = three_way(|tree| {
            std::fs::create_dir(tree.join("sub")).expect("mkdir");
            std::fs::write(tree.join("sub/f"), b"f").expect("write");
        });
        seed_baseline(&fx, &[]);
        let (mut src, mut dst, mut common) = open_all(&fx);
        src.add_dir(&fx.tree.join("sub")).expect("add dir");
        src.add_file(&fx.tree.join("sub/f")).expect("add file");
        src.commit().expect("commit src");

        merge(&mut src, &mut dst, &mut common).expect("merge");
        dst.commit().expect("commit dst");

        let mut reopened = Repo::open(&fx.tree, &fx.repos[1]).expect("reopen dst");
        let f = reopened
            .find(&fx.tree.join("sub/f"))
            .expect("find")
            .expect("entry");
        assert!(reopened.entry(f).as_file().is_some());
    }
}

//! Filesystem commands installed in the default registry.
//!
//! Every handler resolves paths against the calling peer's [`WorkDir`], never
//! the process working directory, so peers cannot move each other around.
//! Failures become short notices written back to the peer.

use bytes::{Bytes, BytesMut};
use std::fs;
use std::io;
use path_clean::PathClean;
use std::path::Path;
use tracing::{debug, warn};

use crate::protocol::Response;
use crate::registry::{CommandError, CommandResult, WorkDir};

fn path_line(path: &Path) -> Bytes {
    Response::line(&path.to_string_lossy())
}

/// `:ls [dir]`: sorted entry names, directories suffixed with `/`
pub fn ls(wd: &mut WorkDir, args: &[String]) -> CommandResult {
    let target = match args.first() {
        Some(dir) => wd.join(dir),
        None => wd.path().to_path_buf(),
    };

    let entries = match fs::read_dir(&target) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %target.display(), error = %e, ":ls failed");
            return Ok(Response::notice(Response::DIR_NOT_FOUND));
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            name
        })
        .collect();
    names.sort();

    let mut out = BytesMut::new();
    for name in names {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b"\n");
    }
    Ok(out.freeze())
}

/// `:cd <dir>`: move the peer to `dir` and report where it landed.
///
/// The new path is normalized lexically, so `..` drops the last component
/// and symlinks stay in the reported path instead of being resolved.
pub fn cd(wd: &mut WorkDir, args: &[String]) -> CommandResult {
    let Some(dir) = args.first() else {
        return Ok(Response::notice(Response::DIR_NOT_SPECIFIED));
    };

    let path = wd.join(dir).clean();
    if !path.is_dir() {
        warn!(dir = %dir, path = %path.display(), ":cd target is not a directory");
        return Ok(Response::notice(Response::DIR_NOT_FOUND));
    }

    debug!(path = %path.display(), "Changed directory");
    let line = path_line(&path);
    wd.set(path);
    Ok(line)
}

/// `:cwd`: the peer's current directory
pub fn cwd(wd: &mut WorkDir, _args: &[String]) -> CommandResult {
    Ok(path_line(wd.path()))
}

/// `:mkdir <dir>`: create a directory, move the peer into it and report
/// the new working directory
pub fn mkdir(wd: &mut WorkDir, args: &[String]) -> CommandResult {
    let Some(dir) = args.first() else {
        return Ok(Response::notice(Response::DIR_NOT_SPECIFIED));
    };

    let target = wd.join(dir).clean();
    if let Err(e) = fs::create_dir(&target) {
        warn!(path = %target.display(), error = %e, ":mkdir failed");
        return Ok(Response::notice(Response::DIR_CREATE_FAILED));
    }

    debug!(path = %target.display(), "Created directory");
    let line = path_line(&target);
    wd.set(target);
    Ok(line)
}

/// `:rmdir <dir>`: remove a directory tree, report the current directory
pub fn rmdir(wd: &mut WorkDir, args: &[String]) -> CommandResult {
    let Some(dir) = args.first() else {
        return Ok(Response::notice(Response::DIR_NOT_SPECIFIED));
    };

    let target = wd.join(dir);
    if !target.is_dir() {
        return Ok(Response::notice(Response::DIR_NOT_FOUND));
    }
    if let Err(e) = fs::remove_dir_all(&target) {
        warn!(path = %target.display(), error = %e, ":rmdir failed");
        return Ok(Response::notice(Response::DIR_NOT_FOUND));
    }
    Ok(path_line(wd.path()))
}

/// `:touch <file>`: create or truncate a file
pub fn touch(wd: &mut WorkDir, args: &[String]) -> CommandResult {
    let Some(file) = args.first() else {
        return Ok(Response::notice(Response::FILE_NOT_SPECIFIED));
    };

    let target = wd.join(file);
    match fs::File::create(&target) {
        Ok(_) => Ok(Response::notice(Response::OK)),
        Err(e) => {
            warn!(path = %target.display(), error = %e, ":touch failed");
            Ok(Response::notice(Response::FILE_CREATE_FAILED))
        }
    }
}

/// `:cat <file>`: file contents followed by a newline
pub fn cat(wd: &mut WorkDir, args: &[String]) -> CommandResult {
    let Some(file) = args.first() else {
        return Ok(Response::notice(Response::FILE_NOT_SPECIFIED));
    };

    let target = wd.join(file);
    match fs::read(&target) {
        Ok(mut contents) => {
            contents.push(b'\n');
            Ok(Bytes::from(contents))
        }
        Err(e) => {
            warn!(path = %target.display(), error = %e, ":cat failed");
            Ok(Response::notice(Response::FILE_NOT_FOUND))
        }
    }
}

/// Flags understood by `:rm`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RmFlags {
    recursive: bool,
    force: bool,
}

impl RmFlags {
    /// Fold one flag token in. Returns `false` for unknown flags.
    fn apply(&mut self, flag: &str) -> bool {
        match flag {
            "-f" | "--force" => self.force = true,
            "-r" | "-R" | "--recursive" => self.recursive = true,
            "-rf" | "-Rf" | "-fr" | "-fR" => {
                self.recursive = true;
                self.force = true;
            }
            _ => return false,
        }
        true
    }
}

/// `:rm [-f] [-r] <path>...`: a small subset of rm(1)
pub fn rm(wd: &mut WorkDir, args: &[String]) -> CommandResult {
    let mut flags = RmFlags::default();
    let mut paths = Vec::new();

    for arg in args.iter().filter(|a| !a.is_empty()) {
        if arg.starts_with('-') {
            if !flags.apply(arg) {
                warn!(?args, ":rm invalid arguments");
                return Ok(Response::notice(Response::INVALID_ARGUMENTS));
            }
        } else {
            paths.push(arg.as_str());
        }
    }

    if paths.is_empty() {
        return Ok(Response::notice(Response::FILE_NOT_SPECIFIED));
    }

    let mut failures = BytesMut::new();
    for path in paths {
        let target = wd.join(path);
        if let Err(e) = remove_path(&target, flags.recursive) {
            if flags.force && e.kind() == io::ErrorKind::NotFound {
                continue;
            }
            warn!(path = %target.display(), error = %e, ":rm failed");
            failures.extend_from_slice(format!("cannot remove {path}\n").as_bytes());
        }
    }

    if failures.is_empty() {
        Ok(Response::notice(Response::OK))
    } else {
        Ok(failures.freeze())
    }
}

fn remove_path(target: &Path, recursive: bool) -> io::Result<()> {
    let meta = fs::symlink_metadata(target)?;
    if meta.is_dir() {
        if recursive {
            fs::remove_dir_all(target)
        } else {
            fs::remove_dir(target)
        }
    } else {
        fs::remove_file(target)
    }
}

/// `:tree`: directory tree listing, not available
pub fn tree(_wd: &mut WorkDir, _args: &[String]) -> CommandResult {
    Err(CommandError::Unimplemented("tree"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn setup() -> (TempDir, WorkDir) {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        (dir, WorkDir::new(root))
    }

    fn text(result: CommandResult) -> String {
        String::from_utf8(result.unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_missing_arguments_give_notices() {
        let (_dir, mut wd) = setup();
        let handlers: [(&str, fn(&mut WorkDir, &[String]) -> CommandResult); 6] = [
            ("cd", cd),
            ("mkdir", mkdir),
            ("rmdir", rmdir),
            ("touch", touch),
            ("cat", cat),
            ("rm", rm),
        ];

        for (name, handler) in handlers {
            let out = text(handler(&mut wd, &[]));
            assert!(!out.is_empty(), "{name} returned an empty response");
            assert!(out.ends_with("not specified\n"), "{name}: {out:?}");
        }
    }

    #[test]
    fn test_cd_then_cwd_round_trip() {
        let (_dir, mut wd) = setup();
        let sub = wd.join("music");
        fs::create_dir(&sub).unwrap();

        let moved = text(cd(&mut wd, &args(&[sub.to_str().unwrap()])));
        assert_eq!(moved, format!("{}\n", sub.display()));
        assert_eq!(text(cwd(&mut wd, &[])), format!("{}\n", sub.display()));
    }

    #[test]
    fn test_cd_relative_and_parent() {
        let (_dir, mut wd) = setup();
        let root = wd.path().to_path_buf();
        fs::create_dir(wd.join("a")).unwrap();

        cd(&mut wd, &args(&["a"])).unwrap();
        assert_eq!(wd.path(), root.join("a"));
        cd(&mut wd, &args(&[".."])).unwrap();
        assert_eq!(wd.path(), root);
    }

    #[test]
    fn test_cd_missing_directory() {
        let (_dir, mut wd) = setup();
        let before = wd.clone();
        assert_eq!(text(cd(&mut wd, &args(&["nope"]))), "directory doesn't exist\n");
        assert_eq!(wd, before);

        fs::write(wd.join("file.txt"), b"x").unwrap();
        assert_eq!(text(cd(&mut wd, &args(&["file.txt"]))), "directory doesn't exist\n");
        assert_eq!(wd, before);
    }

    #[test]
    fn test_mkdir_enters_new_directory() {
        let (_dir, mut wd) = setup();
        let root = wd.path().to_path_buf();

        let out = text(mkdir(&mut wd, &args(&["newdir"])));
        assert_eq!(out, format!("{}\n", root.join("newdir").display()));
        assert!(Path::new(out.trim_end()).is_absolute());
        assert!(root.join("newdir").is_dir());
        assert_eq!(text(cwd(&mut wd, &[])), out);
    }

    #[test]
    fn test_mkdir_existing_keeps_directory() {
        let (_dir, mut wd) = setup();
        let before = wd.clone();
        fs::create_dir(wd.join("taken")).unwrap();

        assert_eq!(
            text(mkdir(&mut wd, &args(&["taken"]))),
            "failed to create directory\n"
        );
        assert_eq!(wd, before);
    }

    #[cfg(unix)]
    #[test]
    fn test_cd_keeps_symlink_in_path() {
        let (_dir, mut wd) = setup();
        let root = wd.path().to_path_buf();
        fs::create_dir(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();

        let moved = text(cd(&mut wd, &args(&["link"])));
        assert_eq!(moved, format!("{}\n", root.join("link").display()));
        assert_eq!(text(cwd(&mut wd, &[])), moved);

        cd(&mut wd, &args(&[".."])).unwrap();
        assert_eq!(wd.path(), root);
    }

    #[test]
    fn test_rmdir() {
        let (_dir, mut wd) = setup();
        fs::create_dir_all(wd.join("old/nested")).unwrap();
        fs::write(wd.join("old/nested/f"), b"x").unwrap();

        let out = text(rmdir(&mut wd, &args(&["old"])));
        assert_eq!(out, format!("{}\n", wd.path().display()));
        assert!(!wd.join("old").exists());

        assert_eq!(text(rmdir(&mut wd, &args(&["old"]))), "directory doesn't exist\n");
    }

    #[test]
    fn test_touch_and_cat() {
        let (_dir, mut wd) = setup();
        assert_eq!(text(touch(&mut wd, &args(&["empty.txt"]))), "ok\n");
        assert!(wd.join("empty.txt").is_file());
        assert_eq!(text(cat(&mut wd, &args(&["empty.txt"]))), "\n");

        fs::write(wd.join("poem.txt"), b"roses are red").unwrap();
        assert_eq!(text(cat(&mut wd, &args(&["poem.txt"]))), "roses are red\n");
    }

    #[test]
    fn test_cat_missing_file() {
        let (_dir, mut wd) = setup();
        assert_eq!(text(cat(&mut wd, &args(&["missing.txt"]))), "file doesn't exist\n");
    }

    #[test]
    fn test_ls() {
        let (_dir, mut wd) = setup();
        fs::write(wd.join("b.txt"), b"").unwrap();
        fs::write(wd.join("a.txt"), b"").unwrap();
        fs::create_dir(wd.join("docs")).unwrap();

        assert_eq!(text(ls(&mut wd, &[])), "a.txt\nb.txt\ndocs/\n");
        assert_eq!(text(ls(&mut wd, &args(&["docs"]))), "");
        assert_eq!(text(ls(&mut wd, &args(&["nope"]))), "directory doesn't exist\n");
    }

    #[test]
    fn test_rm_file_and_tree() {
        let (_dir, mut wd) = setup();
        fs::write(wd.join("a.txt"), b"").unwrap();
        fs::create_dir_all(wd.join("dir/inner")).unwrap();

        assert_eq!(text(rm(&mut wd, &args(&["a.txt"]))), "ok\n");
        assert!(!wd.join("a.txt").exists());

        assert_eq!(text(rm(&mut wd, &args(&["dir"]))), "cannot remove dir\n");
        assert!(wd.join("dir").exists());

        assert_eq!(text(rm(&mut wd, &args(&["-r", "dir"]))), "ok\n");
        assert!(!wd.join("dir").exists());
    }

    #[test]
    fn test_rm_force_ignores_missing() {
        let (_dir, mut wd) = setup();
        assert_eq!(text(rm(&mut wd, &args(&["ghost"]))), "cannot remove ghost\n");
        assert_eq!(text(rm(&mut wd, &args(&["-f", "ghost"]))), "ok\n");
        assert_eq!(text(rm(&mut wd, &args(&["-rf", "ghost"]))), "ok\n");
    }

    #[test]
    fn test_rm_invalid_flag() {
        let (_dir, mut wd) = setup();
        assert_eq!(text(rm(&mut wd, &args(&["-x", "a"]))), "invalid arguments\n");
        assert_eq!(text(rm(&mut wd, &args(&["-f"]))), "file is not specified\n");
    }

    #[test]
    fn test_tree_is_unimplemented() {
        let (_dir, mut wd) = setup();
        assert_eq!(tree(&mut wd, &[]), Err(CommandError::Unimplemented("tree")));
    }
}

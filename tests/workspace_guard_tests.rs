use cadre::error::GuardrailError;
use cadre::safety::workspace::WorkspaceGuard;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// ─── Helper ───────────────────────────────────────────────────────────

fn setup_workspace() -> TempDir {
    tempfile::tempdir().expect("failed to create temp dir")
}

fn assert_blocked(result: Result<std::path::PathBuf, GuardrailError>) {
    match result {
        Err(GuardrailError::WriteOutsideWorkspace { .. }) => {}
        other => panic!("expected WriteOutsideWorkspace, got {other:?}"),
    }
}

// ─── ALLOWED writes ──────────────────────────────────────────────────

#[test]
fn resolves_file_directly_in_workspace() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    let target = tmp.path().join("file.txt");
    fs::write(&target, "data").unwrap();

    let resolved = guard.resolve_write(&target).unwrap();
    assert_eq!(resolved, fs::canonicalize(&target).unwrap());
}

#[test]
fn resolves_file_in_subdirectory() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    let subdir = tmp.path().join("sub").join("dir");
    fs::create_dir_all(&subdir).unwrap();
    let target = subdir.join("file.txt");
    fs::write(&target, "data").unwrap();

    assert!(guard.resolve_write(&target).is_ok());
}

#[test]
fn resolves_new_file_when_parent_exists() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    let target = tmp.path().join("new_file.txt");
    assert!(!target.exists());

    let resolved = guard.resolve_write(&target).unwrap();
    assert_eq!(resolved, guard.canonical_root().join("new_file.txt"));
}

#[test]
fn resolves_new_file_in_not_yet_created_subdirectory() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    // Neither the directory nor the file exists; the pending suffix stays
    // inside the workspace, so the write may create both.
    let target = tmp.path().join("no_such_parent").join("file.txt");
    assert!(!target.parent().unwrap().exists());

    let resolved = guard.resolve_write(&target).unwrap();
    assert!(resolved.starts_with(guard.canonical_root()));
}

#[test]
fn resolves_relative_path_against_workspace_root() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    let resolved = guard.resolve_write(Path::new("notes/draft.md")).unwrap();
    assert_eq!(resolved, guard.canonical_root().join("notes/draft.md"));
}

// ─── BLOCKED writes ─────────────────────────────────────────────────

#[test]
fn blocks_write_to_file_outside_workspace() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    let outside = std::env::temp_dir().join("outside_workspace_test.txt");
    fs::write(&outside, "data").unwrap();
    let result = guard.resolve_write(&outside);
    // Clean up
    let _ = fs::remove_file(&outside);

    assert_blocked(result);
}

#[test]
fn blocks_path_traversal_via_dotdot() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    // ../../../etc/passwd -- resolves outside the workspace
    let target = tmp
        .path()
        .join("..")
        .join("..")
        .join("..")
        .join("etc")
        .join("passwd");

    assert_blocked(guard.resolve_write(&target));
}

#[test]
fn blocks_relative_traversal_out_of_workspace() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    assert_blocked(guard.resolve_write(Path::new("../escape.txt")));
}

#[test]
fn blocks_dotdot_in_pending_suffix() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    // "missing" does not exist, so nothing on disk constrains the "..";
    // the guard rejects it even though it would resolve back inside.
    let target = tmp.path().join("missing").join("..").join("escape.txt");
    assert_blocked(guard.resolve_write(&target));
}

#[test]
fn blocks_absolute_path_outside_workspace() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    assert_blocked(guard.resolve_write(Path::new("/etc/hosts")));
}

#[test]
fn blocks_write_to_home_directory() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    if let Some(home) = dirs_home() {
        let target = home.join(".bashrc");
        assert_blocked(guard.resolve_write(&target));
    }
}

// ─── SYMLINK cases ──────────────────────────────────────────────────

#[cfg(unix)]
#[test]
fn blocks_symlink_pointing_outside_workspace() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    // Create a target outside the workspace
    let outside_dir = tempfile::tempdir().expect("failed to create outside dir");
    let outside_file = outside_dir.path().join("target.txt");
    fs::write(&outside_file, "outside data").unwrap();

    // Symlink inside the workspace pointing to the outside file
    let symlink_path = tmp.path().join("sneaky_link");
    std::os::unix::fs::symlink(&outside_file, &symlink_path).unwrap();

    assert_blocked(guard.resolve_write(&symlink_path));
}

#[cfg(unix)]
#[test]
fn allows_symlink_pointing_inside_workspace() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    let real_file = tmp.path().join("real.txt");
    fs::write(&real_file, "real data").unwrap();

    let symlink_path = tmp.path().join("internal_link");
    std::os::unix::fs::symlink(&real_file, &symlink_path).unwrap();

    let resolved = guard.resolve_write(&symlink_path).unwrap();
    assert_eq!(resolved, fs::canonicalize(&real_file).unwrap());
}

// ─── ANCHORING ──────────────────────────────────────────────────────

#[test]
fn anchored_joins_relative_paths_to_the_root() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    assert_eq!(
        guard.anchored("notes.md"),
        guard.canonical_root().join("notes.md")
    );
}

#[test]
fn anchored_leaves_absolute_paths_alone() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    assert_eq!(guard.anchored("/etc/hosts"), Path::new("/etc/hosts"));
}

// ─── EDGE cases ─────────────────────────────────────────────────────

#[test]
fn workspace_root_itself_is_writable() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    assert!(guard.resolve_write(tmp.path()).is_ok());
}

#[test]
fn missing_workspace_is_created_on_construction() {
    let tmp = setup_workspace();
    let new_root = tmp.path().join("not").join("yet").join("here");

    let guard = WorkspaceGuard::new(&new_root).unwrap();

    assert!(new_root.is_dir(), "construction should create the directory");
    assert_eq!(guard.canonical_root(), fs::canonicalize(&new_root).unwrap());
}

#[test]
fn canonical_root_is_absolute_and_resolved() {
    let tmp = setup_workspace();
    let guard = WorkspaceGuard::new(tmp.path()).unwrap();

    assert!(guard.canonical_root().is_absolute());
    assert_eq!(guard.canonical_root(), fs::canonicalize(tmp.path()).unwrap());
}

// ─── Utility ────────────────────────────────────────────────────────

fn dirs_home() -> Option<std::path::PathBuf> {
    std::env::var("HOME").ok().map(std::path::PathBuf::from)
}

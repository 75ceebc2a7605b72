//! Change-set source over a mocked VCS, with real files in a temporary
//! working directory.

use std::path::PathBuf;

use serial_test::serial;

use codeclip::contract::{FileSource, MockVcs};
use codeclip::exclusion::ExclusionMatcher;
use codeclip::source::{ChangeSetSource, Source};

const BASE_COMMIT: &str = "1111111111111111111111111111111111111111";

fn vcs_with(changed: &[&str], untracked: &[&str], diff: &str) -> MockVcs {
    let changed: Vec<String> = changed.iter().map(|s| s.to_string()).collect();
    let untracked: Vec<String> = untracked.iter().map(|s| s.to_string()).collect();
    let diff = diff.to_string();

    let mut vcs = MockVcs::new();
    vcs.expect_merge_base()
        .returning(|_| Ok(BASE_COMMIT.to_string()));
    vcs.expect_changed_paths()
        .returning(move |_| Ok(changed.clone()));
    vcs.expect_untracked_files()
        .returning(move || Ok(untracked.clone()));
    vcs.expect_last_commit_timestamp()
        .returning(|_| Ok(Some(1_700_000_000)));
    vcs.expect_has_uncommitted_change().returning(|_| Ok(true));
    vcs.expect_diff_with_context()
        .returning(move |_, _, _| Ok(diff.clone()));
    vcs
}

fn changeset(vcs: MockVcs, raw: bool, repeat_file: Option<PathBuf>) -> Source {
    Source::ChangeSet(ChangeSetSource::with_vcs(
        Box::new(vcs),
        "main".to_string(),
        15,
        raw,
        repeat_file,
        ExclusionMatcher::new(&[]).unwrap(),
    ))
}

#[tokio::test]
#[serial]
async fn changed_file_gets_full_content_and_diff_framing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    let diff = "diff --git a/a.rs b/a.rs\n@@ -1 +1 @@\n-fn a() { }\n+fn a() {}\n";
    let source = changeset(vcs_with(&["a.rs"], &[], diff), false, None);

    let body = source.content("a.rs").await.unwrap().unwrap();
    assert!(body.starts_with("fn a() {}\n"), "got: {body}");
    assert!(body.contains("==> diff vs main (context: 15) <=="));
    assert!(body.contains("+fn a() {}"));
}

#[tokio::test]
#[serial]
async fn path_outside_the_set_gets_a_skip_note_and_its_diff() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    let diff = "diff --git a/other.rs b/other.rs\n@@ -1 +1 @@\n-x\n+y\n";
    let source = changeset(vcs_with(&["a.rs"], &[], diff), false, None);

    let body = source.content("other.rs").await.unwrap().unwrap();
    assert!(body.contains("[full content skipped"), "got: {body}");
    assert!(!body.contains("fn a"));
    assert!(body.contains("+y"));
}

#[tokio::test]
#[serial]
async fn raw_mode_emits_only_file_contents() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    let mut vcs = MockVcs::new();
    vcs.expect_merge_base()
        .returning(|_| Ok(BASE_COMMIT.to_string()));
    vcs.expect_changed_paths()
        .returning(|_| Ok(vec!["a.rs".to_string()]));
    vcs.expect_untracked_files().returning(|| Ok(Vec::new()));
    vcs.expect_last_commit_timestamp()
        .returning(|_| Ok(Some(1_700_000_000)));
    vcs.expect_has_uncommitted_change().returning(|_| Ok(true));
    vcs.expect_diff_with_context().never();

    let source = changeset(vcs, true, None);
    assert!(!source.supplies_own_framing());
    assert_eq!(
        source.content("a.rs").await.unwrap().as_deref(),
        Some("fn a() {}\n")
    );
}

#[tokio::test]
#[serial]
async fn new_file_diff_is_truncated_in_the_emitted_content() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("new.rs"), "fn main() {}\n").unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    let diff = "diff --git a/new.rs b/new.rs\n\
                new file mode 100644\n\
                --- /dev/null\n\
                +++ b/new.rs\n\
                @@ -0,0 +1 @@\n\
                +fn main() {}\n";
    let source = changeset(vcs_with(&[], &["new.rs"], diff), false, None);

    let body = source.content("new.rs").await.unwrap().unwrap();
    assert!(body.contains("fn main() {}\n"));
    assert!(body.contains("new file mode 100644"));
    // The added lines appear once, as file content, never again in the diff.
    assert!(!body.contains("+fn main() {}"), "got: {body}");
}

#[tokio::test]
#[serial]
async fn repeat_file_supplies_the_selection_instead_of_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let saved = dir.path().join("previous.txt");
    std::fs::write(&saved, "[\"a.rs\",\"b.rs\"]\nold buffer body\n").unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    let mut vcs = MockVcs::new();
    vcs.expect_merge_base()
        .returning(|_| Ok(BASE_COMMIT.to_string()));
    vcs.expect_changed_paths().never();
    vcs.expect_untracked_files().never();
    vcs.expect_last_commit_timestamp()
        .returning(|_| Ok(Some(1_700_000_000)));
    vcs.expect_has_uncommitted_change().returning(|_| Ok(true));

    let source = changeset(vcs, false, Some(saved));
    let tree = source.tree().await.unwrap();
    assert_eq!(tree[0], "./");
    assert_eq!(tree.len(), 3);
    assert!(tree.contains(&"a.rs".to_string()));
    assert!(tree.contains(&"b.rs".to_string()));
}

#[tokio::test]
#[serial]
async fn picker_lines_carry_timestamps_and_new_markers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.md"), "hello\n").unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    let mut vcs = MockVcs::new();
    vcs.expect_merge_base()
        .returning(|_| Ok(BASE_COMMIT.to_string()));
    vcs.expect_changed_paths().returning(|_| Ok(Vec::new()));
    vcs.expect_untracked_files()
        .returning(|| Ok(vec!["notes.md".to_string()]));
    vcs.expect_last_commit_timestamp().returning(|_| Ok(None));
    vcs.expect_has_uncommitted_change().returning(|_| Ok(false));

    let source = changeset(vcs, false, None);
    let lines = source.picker_lines().await.unwrap();
    assert_eq!(lines[0], "./");
    assert!(lines[1].starts_with("(C:never"), "got: {}", lines[1]);
    assert!(lines[1].ends_with("notes.md [new]"), "got: {}", lines[1]);
    assert_eq!(source.path_from_line(&lines[1]), "notes.md");
}

#[tokio::test]
async fn binary_looking_paths_yield_nothing_without_touching_the_vcs() {
    let source = changeset(MockVcs::new(), false, None);
    assert!(source.content("report.pdf").await.unwrap().is_none());
}

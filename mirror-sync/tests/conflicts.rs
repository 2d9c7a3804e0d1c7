mod common;

use std::fs;
use std::path::{Path, PathBuf};

use git2::{Repository, RepositoryState};
use tempfile::TempDir;

use common::{clone_remote, commit_and_push, file_at, read, ref_id, write, Harness};
use mirror_sync::resolver::RESOLUTION_MESSAGE;
use mirror_sync::{CycleOutcome, PullOutcome, ProjectDir, VcsBackend, LOCAL_COPY_MARKER};

/// Bootstrap a project holding `files`, then return it with a second clone
/// of its remote.
fn tracked_with_clone(h: &Harness, files: &[(&str, &str)]) -> (ProjectDir, TempDir, PathBuf) {
    let project = h.project("notes", files);
    h.engine.reconcile(&project, "Update notes").expect("bootstrap");
    let other = TempDir::new().expect("clone dir");
    let clone = clone_remote(&h.remote_of(&project), &other.path().join("notes"));
    (project, other, clone)
}

fn assert_settled(h: &Harness, project: &ProjectDir) {
    let repo = Repository::open(&project.path).unwrap();
    assert_eq!(repo.state(), RepositoryState::Clean);
    assert!(!repo.index().unwrap().has_conflicts());
    let vcs = mirror_sync::Git2Backend::new(None, common::identity());
    assert!(!vcs.is_dirty(&project.path).unwrap(), "working tree left dirty");
    assert_eq!(
        ref_id(&h.remote_of(project), "refs/heads/main"),
        ref_id(&project.path, "refs/heads/main"),
        "resolution was not pushed"
    );
}

fn single_copy(outcome: &CycleOutcome) -> PathBuf {
    match outcome {
        CycleOutcome::Updated {
            pull: PullOutcome::Merged,
            conflicts,
        } => {
            assert_eq!(conflicts.len(), 1, "conflicts: {conflicts:?}");
            conflicts[0].local_copy_path.clone().expect("local copy")
        }
        other => panic!("expected a merged update, got {other:?}"),
    }
}

#[test]
fn remote_wins_and_local_copy_is_committed() {
    let h = Harness::new();
    let (project, _other, clone) = tracked_with_clone(&h, &[("shared.txt", "base\n")]);

    write(&clone.join("shared.txt"), "remote\n");
    commit_and_push(&clone, "remote edit");
    write(&project.path.join("shared.txt"), "local\n");

    let outcome = h.engine.reconcile(&project, "Update notes").expect("update");
    let copy = single_copy(&outcome);
    let copy_name = copy.to_string_lossy().into_owned();
    assert!(copy_name.starts_with("shared_local_"), "copy: {copy_name}");
    assert!(copy_name.ends_with(".txt"));

    assert_eq!(read(&project.path.join("shared.txt")), "remote\n");
    assert_eq!(read(&project.path.join(&copy)), "local\n");

    let remote = h.remote_of(&project);
    assert_eq!(file_at(&remote, "refs/heads/main", "shared.txt").as_deref(), Some("remote\n"));
    assert_eq!(file_at(&remote, "refs/heads/main", &copy_name).as_deref(), Some("local\n"));

    let repo = Repository::open(&project.path).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(head.parent_count(), 2);
    assert_eq!(head.message(), Some(RESOLUTION_MESSAGE));
    assert_settled(&h, &project);
}

#[test]
fn nested_conflict_copy_stays_in_the_same_directory() {
    let h = Harness::new();
    let (project, _other, clone) = tracked_with_clone(&h, &[("docs/report.md", "v1\n")]);

    write(&clone.join("docs/report.md"), "remote v2\n");
    commit_and_push(&clone, "remote edit");
    write(&project.path.join("docs/report.md"), "local v2\n");

    let outcome = h.engine.reconcile(&project, "Update notes").expect("update");
    let copy = single_copy(&outcome);
    assert_eq!(copy.parent(), Some(Path::new("docs")));
    assert!(copy
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with(&format!("report{LOCAL_COPY_MARKER}")));
    assert_eq!(read(&project.path.join("docs/report.md")), "remote v2\n");
    assert_eq!(read(&project.path.join(&copy)), "local v2\n");
    assert_settled(&h, &project);
}

#[test]
fn remote_deletion_is_accepted_and_local_content_kept() {
    let h = Harness::new();
    let (project, _other, clone) = tracked_with_clone(&h, &[("shared.txt", "base\n")]);

    fs::remove_file(clone.join("shared.txt")).unwrap();
    commit_and_push(&clone, "remote delete");
    write(&project.path.join("shared.txt"), "local edit\n");

    let outcome = h.engine.reconcile(&project, "Update notes").expect("update");
    let copy = single_copy(&outcome);
    assert!(!project.path.join("shared.txt").exists());
    assert_eq!(read(&project.path.join(&copy)), "local edit\n");
    assert_eq!(file_at(&h.remote_of(&project), "refs/heads/main", "shared.txt"), None);
    assert_settled(&h, &project);
}

#[test]
fn local_deletion_takes_the_remote_version() {
    let h = Harness::new();
    let (project, _other, clone) = tracked_with_clone(&h, &[("shared.txt", "base\n")]);

    write(&clone.join("shared.txt"), "remote edit\n");
    commit_and_push(&clone, "remote edit");
    fs::remove_file(project.path.join("shared.txt")).unwrap();

    let outcome = h.engine.reconcile(&project, "Update notes").expect("update");
    match outcome {
        CycleOutcome::Updated { conflicts, .. } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].local_copy_path, None);
        }
        other => panic!("expected update, got {other:?}"),
    }
    assert_eq!(read(&project.path.join("shared.txt")), "remote edit\n");
    assert_settled(&h, &project);
}

#[test]
fn diverged_histories_without_overlap_merge_cleanly() {
    let h = Harness::new();
    let (project, _other, clone) = tracked_with_clone(&h, &[("shared.txt", "base\n")]);

    write(&clone.join("theirs.txt"), "from elsewhere\n");
    commit_and_push(&clone, "remote add");
    write(&project.path.join("mine.txt"), "from here\n");

    let outcome = h.engine.reconcile(&project, "Update notes").expect("update");
    assert_eq!(
        outcome,
        CycleOutcome::Updated {
            pull: PullOutcome::Merged,
            conflicts: vec![]
        }
    );
    assert_eq!(read(&project.path.join("theirs.txt")), "from elsewhere\n");
    let names = common::names_at(&h.remote_of(&project), "refs/heads/main");
    assert!(names.contains(&"mine.txt".to_string()));
    assert!(names.contains(&"theirs.txt".to_string()));
    assert!(!names.iter().any(|n| n.contains(LOCAL_COPY_MARKER)));
    assert_settled(&h, &project);
}

#[test]
fn remote_only_change_is_pulled_on_next_local_edit() {
    let h = Harness::new();
    let (project, _other, clone) = tracked_with_clone(&h, &[("shared.txt", "base\n")]);

    write(&clone.join("theirs.txt"), "remote\n");
    commit_and_push(&clone, "remote add");

    // Clean local tree: nothing happens, remote change is not fetched.
    assert_eq!(
        h.engine.reconcile(&project, "Update notes").unwrap(),
        CycleOutcome::Unchanged
    );
    assert!(!project.path.join("theirs.txt").exists());

    write(&project.path.join("mine.txt"), "local\n");
    h.engine.reconcile(&project, "Update notes").expect("update");
    assert_eq!(read(&project.path.join("theirs.txt")), "remote\n");
    assert_settled(&h, &project);
}

#[test]
fn merge_left_unfinished_is_aborted_and_the_pull_retried() {
    let h = Harness::new();
    let (project, _other, clone) = tracked_with_clone(&h, &[("shared.txt", "base\n")]);

    write(&clone.join("shared.txt"), "remote\n");
    commit_and_push(&clone, "remote edit");

    // A local commit, then a merge of the remote that was never concluded.
    write(&project.path.join("shared.txt"), "local\n");
    let vcs = mirror_sync::Git2Backend::new(None, common::identity());
    vcs.stage_all(&project.path).unwrap();
    vcs.commit(
        &project.path,
        &mirror_sync::vcs::CommitRequest::at("local edit", common::identity(), chrono::Utc::now()),
    )
    .unwrap();
    {
        let repo = Repository::open(&project.path).unwrap();
        let mut origin = repo.find_remote("origin").unwrap();
        origin
            .fetch(&["+refs/heads/main:refs/remotes/origin/main"], None, None)
            .unwrap();
        let fetched = repo.find_reference("refs/remotes/origin/main").unwrap();
        let incoming = repo.reference_to_annotated_commit(&fetched).unwrap();
        repo.merge(&[&incoming], None, None).unwrap();
        assert_eq!(repo.state(), RepositoryState::Merge);
        assert!(repo.index().unwrap().has_conflicts());
    }

    let outcome = h.engine.reconcile(&project, "Update notes").expect("update");
    assert!(
        matches!(outcome, CycleOutcome::Updated { .. }),
        "got {outcome:?}"
    );
    assert_eq!(read(&project.path.join("shared.txt")), "remote\n");
    assert_eq!(
        file_at(&h.remote_of(&project), "refs/heads/main", "shared.txt").as_deref(),
        Some("remote\n")
    );
    assert_settled(&h, &project);
}

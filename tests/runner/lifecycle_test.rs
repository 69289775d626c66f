//! Task lifecycle and workspace cleanup tests.

use sealrun::digest::sha256_hex;
use sealrun::runner::{RunnerError, Task, VerificationClaim, ALGORITHM_FILE};

const ALGORITHM: &[u8] = b"#!/bin/sh\ncat \"$1\"\n";

fn claim_for(algorithm: &[u8], inputs: &[&[u8]]) -> VerificationClaim {
    VerificationClaim::new(
        sha256_hex(algorithm),
        inputs.iter().map(|i| sha256_hex(i)).collect(),
    )
}

#[tokio::test]
async fn create_allocates_workspace_under_root() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let task = Task::create(tmp.path()).await.expect("create");

    assert!(task.dir().is_dir());
    assert_eq!(task.dir(), tmp.path().join(task.id()));

    task.destroy().await.expect("destroy");
}

#[tokio::test]
async fn tasks_never_share_a_workspace() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let a = Task::create(tmp.path()).await.expect("a");
    let b = Task::create(tmp.path()).await.expect("b");
    assert_ne!(a.id(), b.id());
    assert_ne!(a.dir(), b.dir());
}

#[tokio::test]
async fn upload_materializes_files_in_order() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let inputs: [&[u8]; 3] = [b"first", b"second", b"third"];
    let task = Task::create(tmp.path())
        .await
        .expect("create")
        .upload(ALGORITHM, &inputs)
        .await
        .expect("upload");

    assert_eq!(task.algorithm_digest(), sha256_hex(ALGORITHM));
    assert_eq!(
        task.input_digests(),
        &[
            sha256_hex(b"first"),
            sha256_hex(b"second"),
            sha256_hex(b"third")
        ]
    );
    assert_eq!(
        std::fs::read(task.dir().join(ALGORITHM_FILE)).expect("algorithm"),
        ALGORITHM
    );
    for (index, input) in inputs.iter().enumerate() {
        let written = std::fs::read(task.dir().join(index.to_string())).expect("input");
        assert_eq!(&written, input);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn algorithm_is_owner_executable_and_inputs_are_private() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().expect("tempdir");
    let task = Task::create(tmp.path())
        .await
        .expect("create")
        .upload(ALGORITHM, &[b"data"])
        .await
        .expect("upload");

    let mode = |name: &str| {
        std::fs::metadata(task.dir().join(name))
            .expect("metadata")
            .permissions()
            .mode()
            & 0o777
    };
    assert_eq!(mode(ALGORITHM_FILE) & 0o100, 0o100);
    assert_eq!(mode(ALGORITHM_FILE) & 0o077, 0);
    assert_eq!(mode("0") & 0o177, 0);
}

#[tokio::test]
async fn empty_algorithm_is_rejected_and_cleaned_up() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let task = Task::create(tmp.path()).await.expect("create");
    let dir = task.dir().to_path_buf();

    let result = task.upload(b"", &[b"data"]).await;
    assert!(matches!(result, Err(RunnerError::EmptyAlgorithm)));
    assert!(!dir.exists());
}

#[tokio::test]
async fn empty_inputs_are_rejected_and_cleaned_up() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let task = Task::create(tmp.path()).await.expect("create");
    let dir = task.dir().to_path_buf();

    let inputs: Vec<Vec<u8>> = Vec::new();
    let result = task.upload(ALGORITHM, &inputs).await;
    assert!(matches!(result, Err(RunnerError::EmptyInputs)));
    assert!(!dir.exists());
}

#[tokio::test]
async fn destroy_from_every_state_removes_workspace() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let claim = claim_for(ALGORITHM, &[b"data"]);

    let created = Task::create(tmp.path()).await.expect("create");
    let dir = created.dir().to_path_buf();
    created.destroy().await.expect("destroy created");
    assert!(!dir.exists());

    let populated = Task::create(tmp.path())
        .await
        .expect("create")
        .upload(ALGORITHM, &[b"data"])
        .await
        .expect("upload");
    let dir = populated.dir().to_path_buf();
    populated.destroy().await.expect("destroy populated");
    assert!(!dir.exists());

    let verified = Task::create(tmp.path())
        .await
        .expect("create")
        .upload(ALGORITHM, &[b"data"])
        .await
        .expect("upload")
        .verify(&claim)
        .expect("verify");
    let dir = verified.dir().to_path_buf();
    verified.destroy().await.expect("destroy verified");
    assert!(!dir.exists());

    // Nothing but the root is left behind.
    assert_eq!(std::fs::read_dir(tmp.path()).expect("read_dir").count(), 0);
}

#[tokio::test]
async fn destroy_tolerates_externally_removed_workspace() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let task = Task::create(tmp.path()).await.expect("create");
    std::fs::remove_dir_all(task.dir()).expect("external removal");
    task.destroy().await.expect("destroy");
}

#[tokio::test]
async fn panic_while_holding_task_removes_workspace() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let task = Task::create(tmp.path()).await.expect("create");
    let dir = task.dir().to_path_buf();

    let handle = tokio::spawn(async move {
        let _populated = task.upload(ALGORITHM, &[b"data"]).await;
        panic!("worker crashed mid-task");
    });
    assert!(handle.await.is_err());
    assert!(!dir.exists());
}

use chrono::{TimeZone, Utc};
use parabak_core::backup::{BackupOptions, create_backup_at};
use parabak_core::duplicates::find_duplicates;
use parabak_core::hasher::hash_file;
use parabak_core::progress::NoProgress;
use parabak_core::restore::{
    RestoreDestination, RestoreOptions, SnapshotSource, restore, sanitize_path,
};
use parabak_core::snapshot::SnapshotTimestamp;
use parabak_core::targets::{TargetSet, resolve_checklist};
use parabak_core::verify::{VerifyMode, verify};
use parabak_core::{ContentHash, Error, Repository};
use std::path::{Path, PathBuf};

fn ts(sec: u32) -> SnapshotTimestamp {
    SnapshotTimestamp::from_datetime(Utc.with_ymd_and_hms(2025, 1, 15, 20, 30, sec).unwrap())
}

fn write(dir: &Path, name: &str, data: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, data).unwrap();
    path
}

async fn checklist_targets(dir: &Path, roots: &[&Path]) -> TargetSet {
    let text: String = roots
        .iter()
        .map(|r| format!("{}\n", r.display()))
        .collect();
    let checklist = dir.join("checklist.txt");
    std::fs::write(&checklist, text).unwrap();
    resolve_checklist(&checklist).await.unwrap()
}

#[tokio::test]
async fn identical_files_back_up_to_one_blob_and_verify() {
    let work = tempfile::tempdir().unwrap();
    let src = work.path().join("src");
    write(&src, "x.txt", "hello");
    write(&src, "y.txt", "hello");
    let repo = Repository::init(work.path().join("repo")).await.unwrap();
    let targets = checklist_targets(work.path(), &[&src]).await;

    let report =
        create_backup_at(&repo, &targets, ts(0), &BackupOptions::default(), &mut NoProgress)
            .await
            .unwrap();
    assert!(report.is_complete());

    let blobs: Vec<_> = std::fs::read_dir(repo.store().dir()).unwrap().collect();
    assert_eq!(blobs.len(), 1);

    let text = std::fs::read_to_string(&report.snapshot.path).unwrap();
    let hashes: Vec<&str> = text.lines().map(|l| l.rsplit(" /// ").next().unwrap()).collect();
    assert_eq!(hashes.len(), 2);
    assert_eq!(hashes[0], hashes[1]);
    assert_eq!(hashes[0], ContentHash::from_data(b"hello").to_hex());

    let verified = verify(&repo, &targets, VerifyMode::Thorough, &mut NoProgress)
        .await
        .unwrap();
    assert_eq!(verified.found, 2);
    assert_eq!(verified.not_found, 0);
    assert_eq!(verified.found_fraction(), 1.0);
    assert_eq!(verified.mismatches(), 0);
    assert!(verified.is_clean());
}

#[tokio::test]
async fn interrupted_backup_is_superseded_by_the_next_run() {
    let work = tempfile::tempdir().unwrap();
    let src = work.path().join("src");
    for i in 0..5 {
        write(&src, &format!("file-{i}.bin"), &format!("contents {i}"));
    }
    let repo = Repository::init(work.path().join("repo")).await.unwrap();
    let targets = checklist_targets(work.path(), &[&src]).await;
    assert_eq!(targets.len(), 5);

    // A run that recorded two files and died while copying the third.
    let mut partial = repo.snapshots().begin_snapshot(ts(0)).await.unwrap();
    let mut known = repo.store().known_hashes().await.unwrap();
    for target in &targets.files[..2] {
        let hash = hash_file(&target.path).await.unwrap();
        repo.store()
            .commit(&mut known, &target.path, &hash, &ts(0).session_token())
            .await
            .unwrap();
        partial.append(&target.path, &hash).await.unwrap();
    }
    let third = hash_file(&targets.files[2].path).await.unwrap();
    let leftover = repo.store().temp_path(&third, &ts(0).session_token());
    std::fs::write(&leftover, "cont").unwrap();
    drop(partial);

    assert!(matches!(
        repo.snapshots().load_latest().await,
        Err(Error::NoSnapshotsFound { unsealed: 1, .. })
    ));
    let known = repo.store().known_hashes().await.unwrap();
    assert_eq!(known.len(), 2);
    assert!(!known.contains(&third));

    let report =
        create_backup_at(&repo, &targets, ts(1), &BackupOptions::default(), &mut NoProgress)
            .await
            .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.new_blobs, 3);
    assert_eq!(report.files_recorded, 5);

    let latest = repo.snapshots().load_latest().await.unwrap();
    assert_eq!(latest.timestamp, Some(ts(1)));
    assert!(latest.sealed);
    assert_eq!(latest.len(), 5);
    assert!(leftover.exists());

    let listed = repo.snapshots().list_snapshots().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(!listed[0].sealed);
}

#[tokio::test]
async fn restore_reproduces_every_recorded_file() {
    let work = tempfile::tempdir().unwrap();
    let src = work.path().join("src");
    write(&src, "docs/report.txt", "quarterly numbers");
    write(&src, "docs/copy.txt", "quarterly numbers");
    write(&src, "photos/cat.jpg", "\u{1}\u{2}\u{3} not really a jpeg");
    write(&src, "empty.txt", "");
    let repo = Repository::init(work.path().join("repo")).await.unwrap();
    let targets = checklist_targets(work.path(), &[&src]).await;
    create_backup_at(&repo, &targets, ts(0), &BackupOptions::default(), &mut NoProgress)
        .await
        .unwrap();

    let out = work.path().join("restored");
    let report = restore(
        &repo,
        &SnapshotSource::Latest,
        &RestoreDestination::Directory(out.clone()),
        &RestoreOptions::default(),
        &mut NoProgress,
    )
    .await
    .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.restored, 4);

    for target in &targets.files {
        let restored = out.join(sanitize_path(&target.path).unwrap());
        assert_eq!(
            std::fs::read(&restored).unwrap(),
            std::fs::read(&target.path).unwrap(),
            "{}",
            target.path.display()
        );
    }
}

#[tokio::test]
async fn every_blob_rehashes_to_its_name() {
    let work = tempfile::tempdir().unwrap();
    let src = work.path().join("src");
    for i in 0..20 {
        write(&src, &format!("d{}/f{i}.txt", i % 3), &"x".repeat(i * 97));
    }
    let repo = Repository::init(work.path().join("repo")).await.unwrap();
    let targets = checklist_targets(work.path(), &[&src]).await;
    create_backup_at(&repo, &targets, ts(0), &BackupOptions::default(), &mut NoProgress)
        .await
        .unwrap();

    let known = repo.store().known_hashes().await.unwrap();
    assert_eq!(known.len(), 20);
    for hash in known.iter() {
        assert_eq!(hash_file(repo.store().blob_path(hash)).await.unwrap(), *hash);
    }

    let latest = repo.snapshots().load_latest().await.unwrap();
    let duplicates = find_duplicates(&latest.entries, 0);
    assert_eq!(duplicates.summary.unique_hashes, 20);
    assert!(duplicates.groups.is_empty());
}

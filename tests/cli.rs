use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

#[fixture]
fn conf_dir() -> assert_fs::TempDir {
    assert_fs::TempDir::new().unwrap()
}

#[fixture]
fn photos() -> assert_fs::TempDir {
    let dir = assert_fs::TempDir::new().unwrap();
    dir.child("a/readme.txt").write_str("hello").unwrap();
    dir
}

#[rstest]
fn collection_lifecycle(conf_dir: assert_fs::TempDir, photos: assert_fs::TempDir) -> Result<()> {
    let root = photos.path().canonicalize()?;
    let root = root.to_str().unwrap();

    cargo_run!("imagedb", "-c", conf_dir.path(), "collection", "add", photos.path())
        .success()
        .stdout(predicate::str::contains(root));
    cargo_run!("imagedb", "-c", conf_dir.path(), "collection", "list")
        .success()
        .stdout(predicate::str::starts_with("1\t").and(predicate::str::contains(root)));

    conf_dir.child("imagedb.db").assert(predicate::path::exists());

    cargo_run!("imagedb", "-c", conf_dir.path(), "collection", "delete", "1").success();
    cargo_run!("imagedb", "-c", conf_dir.path(), "collection", "list")
        .success()
        .stdout(predicate::str::contains(root).not());

    Ok(())
}

#[rstest]
fn collection_add_missing_dir(conf_dir: assert_fs::TempDir) -> Result<()> {
    cargo_run!("imagedb", "-c", conf_dir.path(), "collection", "add", conf_dir.path().join("nope"))
        .failure();
    Ok(())
}

#[rstest]
fn search_empty_collection(conf_dir: assert_fs::TempDir, photos: assert_fs::TempDir) -> Result<()> {
    cargo_run!("imagedb", "-c", conf_dir.path(), "collection", "add", photos.path()).success();
    cargo_run!("imagedb", "-c", conf_dir.path(), "search", "-C", "1", "--output-format", "json")
        .success()
        .stdout(predicate::str::contains("[]"));
    Ok(())
}

#[rstest]
fn search_requires_collection(conf_dir: assert_fs::TempDir) -> Result<()> {
    cargo_run!("imagedb", "-c", conf_dir.path(), "search")
        .failure()
        .stderr(predicate::str::contains("至少需要指定一个集合"));
    cargo_run!("imagedb", "-c", conf_dir.path(), "search", "-C", "1", "--limit", "0")
        .failure()
        .stderr(predicate::str::contains("limit"));
    Ok(())
}

#[rstest]
fn similar_without_embedding(conf_dir: assert_fs::TempDir, photos: assert_fs::TempDir) -> Result<()> {
    cargo_run!("imagedb", "-c", conf_dir.path(), "collection", "add", photos.path()).success();
    cargo_run!("imagedb", "-c", conf_dir.path(), "similar", "-C", "1", "--id", "1")
        .failure()
        .stderr(predicate::str::contains("还没有向量"));
    cargo_run!("imagedb", "-c", conf_dir.path(), "similar", "-C", "1").failure();
    Ok(())
}

#[rstest]
fn index_unknown_collection(conf_dir: assert_fs::TempDir) -> Result<()> {
    cargo_run!("imagedb", "-c", conf_dir.path(), "index", "42")
        .failure()
        .stderr(predicate::str::contains("集合 42 不存在"));
    Ok(())
}

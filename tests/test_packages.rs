//! Package discovery against the fixture workspace in tests/files/ws.

mod common;
use crate::common::*;
use std::fs;
use xacrodoc::{packages, PackageFinder, XacroError};

fn canonical(relative: &str) -> std::path::PathBuf {
    fs::canonicalize(fixture_path(relative)).unwrap()
}

#[test]
fn test_look_in_finds_workspace_packages() {
    test_init();
    let finder = isolated_finder();
    assert_eq!(
        finder.get_path("robot_description").unwrap(),
        canonical("robot_description")
    );
    assert_eq!(finder.get_path("gripper").unwrap(), canonical("tools/gripper"));
    assert_eq!(
        finder
            .get_file_path("gripper", "meshes/tool.stl")
            .unwrap(),
        canonical("tools/gripper/meshes/tool.stl")
    );
}

#[test]
fn test_ignored_tree_is_not_crawled() {
    let finder = isolated_finder();
    let err = finder.get_path("hidden_pkg").unwrap_err();
    assert_eq!(err.missing_package(), Some("hidden_pkg"));
}

#[test]
fn test_legacy_manifest_package() {
    let finder = isolated_finder();
    assert_eq!(finder.get_path("legacy_pkg").unwrap(), canonical("legacy_pkg"));
}

#[test]
fn test_broken_manifest_is_skipped_when_crawling() {
    // Neither declared name is usable, the rest of the workspace still is
    let finder = isolated_finder();
    assert!(finder.get_path("first").is_err());
    assert!(finder.get_path("robot_description").is_ok());
}

#[test]
fn test_walk_up_from_file() {
    let finder = PackageFinder::new();
    finder.walk_up_from(fixture_path("robot_description/urdf/threelink.urdf.xacro"), 0);
    assert_eq!(
        finder.get_path("robot_description").unwrap(),
        canonical("robot_description")
    );
    // Only ancestors are considered
    assert!(finder.get_path("gripper").is_err());
}

#[test]
fn test_walk_up_through_broken_manifest() {
    let finder = PackageFinder::new();
    finder.walk_up_from(fixture_path("broken"), 0);
    let err = finder.get_path("first").unwrap_err();
    assert!(
        matches!(err, XacroError::InvalidPackageManifest { .. }),
        "got: {:?}",
        err
    );
}

#[test]
fn test_cache_entries_take_precedence() {
    let finder = isolated_finder();
    finder.update_package_cache([("gripper", fixture_path("robot_description"))]);
    assert_eq!(finder.get_path("gripper").unwrap(), canonical("robot_description"));
}

#[test]
fn test_priority_of_search_roots() {
    let tmp = tempfile::TempDir::new().unwrap();
    let shadow = tmp.path().join("gripper");
    fs::create_dir(&shadow).unwrap();
    fs::write(
        shadow.join("package.xml"),
        "<package><name>gripper</name></package>",
    )
    .unwrap();

    let finder = isolated_finder();
    finder.look_in([tmp.path()], 1);
    assert_eq!(finder.get_path("gripper").unwrap(), canonical("tools/gripper"));

    let finder = isolated_finder();
    finder.look_in([tmp.path()], 0);
    assert_eq!(
        finder.get_path("gripper").unwrap(),
        fs::canonicalize(&shadow).unwrap()
    );
}

#[test]
fn test_rescan_picks_up_new_packages() {
    let tmp = tempfile::TempDir::new().unwrap();
    let finder = PackageFinder::new();
    finder.look_in([tmp.path()], 0);
    assert!(finder.get_path("late").is_err());

    let late = tmp.path().join("late");
    fs::create_dir(&late).unwrap();
    fs::write(late.join("package.xml"), "<package><name>late</name></package>").unwrap();
    // The crawl index is stale until rescanned
    assert!(finder.get_path("late").is_err());
    finder.rescan();
    assert_eq!(finder.get_path("late").unwrap(), fs::canonicalize(&late).unwrap());
}

#[test]
fn test_global_finder_functions() {
    packages::look_in([fixture_path("tools")], 0);
    assert_eq!(packages::get_path("gripper").unwrap(), canonical("tools/gripper"));

    packages::update_package_cache([("alias", fixture_path("tools/gripper"))]);
    assert_eq!(
        packages::get_file_path("alias", "package.xml").unwrap(),
        canonical("tools/gripper/package.xml")
    );

    packages::reset();
    assert!(packages::get_path("alias").is_err());
}

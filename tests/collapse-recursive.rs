mod common;

use cinder::collapse::recursive::Folder;
use cinder::collapse::Collapse;

#[test]
fn collapse_recursive_basic() {
    common::test_collapse(
        Folder::default(),
        "./tests/data/collapse-recursive/basic.txt",
        "./tests/data/collapse-recursive/results/basic-collapsed.txt",
    )
    .unwrap()
}

// A canonical folded stream passes through unchanged.
#[test]
fn collapse_recursive_is_idempotent() {
    let mut once = Vec::new();
    Folder::default()
        .collapse_file(
            Some("./tests/data/collapse-recursive/basic.txt"),
            &mut once,
        )
        .unwrap();

    let mut twice = Vec::new();
    Folder::default().collapse(&once[..], &mut twice).unwrap();
    assert_eq!(once, twice);
}

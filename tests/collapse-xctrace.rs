mod common;

use cinder::collapse::xctrace::Folder;
use cinder::collapse::Collapse;

#[test]
fn collapse_xctrace_default() {
    common::test_collapse(
        Folder::default(),
        "./tests/data/collapse-xctrace/basic.xml",
        "./tests/data/collapse-xctrace/results/basic-collapsed.txt",
    )
    .unwrap()
}

#[test]
fn collapse_xctrace_is_applicable() {
    let folder = Folder::default();
    assert!(
        folder.is_applicable(&std::fs::read("./tests/data/collapse-xctrace/basic.xml").unwrap())
    );
    assert!(!folder.is_applicable(b"a;b 1\nc 2\n"));
    assert!(!folder.is_applicable(&std::fs::read("./tests/data/collapse-perf/basic.txt").unwrap()));
}

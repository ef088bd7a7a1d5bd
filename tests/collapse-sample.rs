mod common;

use cinder::collapse::sample::{Folder, Options};
use cinder::collapse::Collapse;

fn test_collapse_sample(test_file: &str, expected_file: &str, options: Options) {
    common::test_collapse(Folder::from(options), test_file, expected_file).unwrap()
}

#[test]
fn collapse_sample_default() {
    test_collapse_sample(
        "./tests/data/collapse-sample/basic.txt",
        "./tests/data/collapse-sample/results/basic-collapsed.txt",
        Options::default(),
    );
}

#[test]
fn collapse_sample_no_modules() {
    test_collapse_sample(
        "./tests/data/collapse-sample/basic.txt",
        "./tests/data/collapse-sample/results/basic-collapsed-no-modules.txt",
        Options { no_modules: true },
    );
}

#[test]
fn collapse_sample_hides_waiting_leaves() {
    let input = "\
Call graph:
    10 Thread_1
    + 10 start  (in libdyld.dylib) + 1 [0x1]
    +   10 __psynch_cvwait  (in libsystem_kernel.dylib) + 2 [0x2]

Total number in stack (recursive counted multiple, when >=5):
";
    let mut folder = Folder::default();
    let mut out = Vec::new();
    folder.collapse(input.as_bytes(), &mut out).unwrap();
    assert_eq!(out, b"");
}

#[test]
fn collapse_sample_is_applicable() {
    let folder = Folder::default();
    assert!(folder.is_applicable(&std::fs::read("./tests/data/collapse-sample/basic.txt").unwrap()));
    assert!(!folder.is_applicable(b"a;b 1\nc 2\n"));
    assert!(!folder.is_applicable(&std::fs::read("./tests/data/collapse-perf/basic.txt").unwrap()));
}

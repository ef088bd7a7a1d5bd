mod common;

use cinder::collapse::guess::Folder;
use cinder::Error;

fn test_guess(test_file: &str, expected_file: &str) {
    common::test_collapse(Folder::default(), test_file, expected_file).unwrap()
}

#[test]
fn guess_perf() {
    test_guess(
        "./tests/data/collapse-perf/basic.txt",
        "./tests/data/collapse-perf/results/basic-collapsed.txt",
    );
}

#[test]
fn guess_dtrace() {
    test_guess(
        "./tests/data/collapse-dtrace/basic.txt",
        "./tests/data/collapse-dtrace/results/basic-collapsed.txt",
    );
}

#[test]
fn guess_sample() {
    test_guess(
        "./tests/data/collapse-sample/basic.txt",
        "./tests/data/collapse-sample/results/basic-collapsed.txt",
    );
}

#[test]
fn guess_vtune() {
    test_guess(
        "./tests/data/collapse-vtune/vtune.csv",
        "./tests/data/collapse-vtune/results/vtune-default.txt",
    );
}

#[test]
fn guess_xctrace() {
    test_guess(
        "./tests/data/collapse-xctrace/basic.xml",
        "./tests/data/collapse-xctrace/results/basic-collapsed.txt",
    );
}

// Already-folded input falls through to the identity collapser.
#[test]
fn guess_folded() {
    test_guess(
        "./tests/data/flamegraph/basic.folded",
        "./tests/data/flamegraph/basic.folded",
    );
}

#[test]
fn guess_unknown_format() {
    let error = common::test_collapse_error(
        Folder::default(),
        "./tests/data/collapse-guess/unknown.txt",
    );
    assert!(matches!(error, Error::UnknownFormat));
}

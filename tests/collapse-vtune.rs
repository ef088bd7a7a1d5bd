mod common;

use cinder::collapse::vtune::{Folder, Options};
use cinder::Error;
use log::Level;
use pretty_assertions::assert_eq;
use testing_logger::CapturedLog;

fn test_collapse_vtune(test_file: &str, expected_file: &str, options: Options) {
    common::test_collapse(Folder::from(options), test_file, expected_file).unwrap()
}

fn test_collapse_vtune_error(test_file: &str, options: Options) -> Error {
    common::test_collapse_error(Folder::from(options), test_file)
}

fn test_collapse_vtune_logs<F>(input_file: &str, asserter: F)
where
    F: Fn(&Vec<CapturedLog>),
{
    common::test_collapse_logs(Folder::default(), input_file, asserter);
}

#[test]
fn collapse_vtune_default() {
    test_collapse_vtune(
        "./tests/data/collapse-vtune/vtune.csv",
        "./tests/data/collapse-vtune/results/vtune-default.txt",
        Options::default(),
    );
}

#[test]
fn collapse_vtune_no_modules() {
    test_collapse_vtune(
        "./tests/data/collapse-vtune/vtune.csv",
        "./tests/data/collapse-vtune/results/vtune-no-modules.txt",
        Options { no_modules: true },
    );
}

#[test]
fn collapse_vtune_should_warn_about_fractional_samples() {
    test_collapse_vtune_logs("./tests/data/collapse-vtune/vtune.csv", |captured_logs| {
        let nwarnings = captured_logs
            .iter()
            .filter(|log| {
                log.body
                    == "The input data has fractional sample counts that will be truncated to integers"
                    && log.level == Level::Warn
            })
            .count();
        assert_eq!(
            nwarnings, 1,
            "fractional samples warning logged {} times, but should be logged exactly once",
            nwarnings
        );
    });
}

#[test]
fn collapse_vtune_should_return_error_for_skipped_indent_level() {
    let error = test_collapse_vtune_error(
        "./tests/data/collapse-vtune/skipped-indentation.csv",
        Options::default(),
    );
    assert!(matches!(error, Error::MalformedInput(_)));
    assert!(error.to_string().contains("Skipped indentation level"));
}

#[test]
fn collapse_vtune_should_return_error_for_invalid_time_field() {
    let error = test_collapse_vtune_error(
        "./tests/data/collapse-vtune/invalid-time-field.csv",
        Options::default(),
    );
    assert!(matches!(error, Error::MalformedInput(_)));
    assert!(error.to_string().contains("Invalid `CPU Time:Self` field"));
}

#[test]
fn collapse_vtune_should_return_error_for_bad_stack_line() {
    let error = test_collapse_vtune_error(
        "./tests/data/collapse-vtune/bad-stack-line.csv",
        Options::default(),
    );
    assert!(matches!(error, Error::MalformedInput(_)));
    assert!(error.to_string().contains("Unable to parse stack line"));
}

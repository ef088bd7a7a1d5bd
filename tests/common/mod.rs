#![allow(dead_code)]

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Cursor};

use cinder::collapse::Collapse;
use cinder::Error;
use pretty_assertions::assert_eq;
use testing_logger::CapturedLog;

pub fn compare_results<R, E>(result: R, mut expected: E, expected_file: &str)
where
    R: BufRead,
    E: BufRead,
{
    let mut buf = String::new();
    let mut line_num = 1;
    for line in result.lines() {
        let line = line.unwrap();
        if expected.read_line(&mut buf).unwrap() == 0 {
            panic!(
                "\noutput has more lines than expected result file: {}",
                expected_file
            );
        }
        assert_eq!(line, buf.trim_end(), "\n{}:{}", expected_file, line_num);
        buf.clear();
        line_num += 1;
    }

    if expected.read_line(&mut buf).unwrap() > 0 {
        panic!(
            "\n{} has more lines than output, beginning at line: {}",
            expected_file, line_num
        )
    }
}

pub fn test_collapse<C>(
    mut collapser: C,
    test_filename: &str,
    expected_filename: &str,
) -> cinder::Result<()>
where
    C: Collapse,
{
    if let Err(e) = fs::metadata(test_filename) {
        eprintln!("Failed to open input file '{}'", test_filename);
        return Err(e.into());
    }

    let expected_len = fs::metadata(expected_filename)
        .unwrap_or_else(|e| panic!("Failed to open {}: {}", expected_filename, e))
        .len() as usize;
    let mut result = Cursor::new(Vec::with_capacity(expected_len));
    collapser.collapse_file(Some(test_filename), &mut result)?;
    let expected = BufReader::new(File::open(expected_filename)?);

    result.set_position(0);
    compare_results(result, expected, expected_filename);
    Ok(())
}

pub fn test_collapse_error<C>(mut collapser: C, test_filename: &str) -> Error
where
    C: Collapse,
{
    if fs::metadata(test_filename).is_err() {
        panic!("Failed to open input file '{}'", test_filename);
    }

    collapser
        .collapse_file(Some(test_filename), &mut io::sink())
        .expect_err("Expected an error")
}

pub fn test_collapse_logs<C, F>(mut collapser: C, input_file: &str, asserter: F)
where
    C: Collapse,
    F: Fn(&Vec<CapturedLog>),
{
    testing_logger::setup();
    let r = BufReader::new(File::open(input_file).unwrap());
    collapser.collapse(r, std::io::sink()).unwrap();
    testing_logger::validate(asserter);
}

use std::io;

use crate::collapse::recursive::{is_folded, parse_folded_line};
use crate::collapse::util;
use crate::collapse::{Collapse, Occurrences, CAPACITY_LINE};
use crate::error::Result;

/// The identity collapser: folded input in, canonical folded output out.
///
/// Lines are routed through the occurrence table, so duplicate stacks are
/// merged and the output is canonically ordered, but no frame is renamed or
/// dropped. This is what lets the `flamegraph` binary accept input that has
/// already been collapsed.
#[derive(Debug, Default)]
pub struct Folder {
    /// Number of times each call stack has been seen.
    occurrences: Occurrences,
}

impl Collapse for Folder {
    fn collapse<R, W>(&mut self, mut reader: R, writer: W) -> Result<()>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let mut line = Vec::with_capacity(CAPACITY_LINE);
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }

            let l = util::trim(&line);
            if l.is_empty() {
                continue;
            }
            match parse_folded_line(l) {
                Some((stack, count)) => self.occurrences.add(stack, count)?,
                None => warn!("Unable to parse line: {}", String::from_utf8_lossy(l)),
            }
        }

        self.occurrences.write_and_clear(writer)
    }

    fn is_applicable(&self, sample: &[u8]) -> bool {
        is_folded(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_on_canonical_input() {
        let canonical = "app;funcB;funcA 2\napp;funcC 1\n";
        let mut folder = Folder::default();
        let mut out = Vec::new();
        folder.collapse(canonical.as_bytes(), &mut out).unwrap();
        assert_eq!(out, canonical.as_bytes());
    }

    #[test]
    fn duplicates_merge() {
        let mut folder = Folder::default();
        let mut out = Vec::new();
        folder.collapse(&b"a;b 1\na;b 2\n"[..], &mut out).unwrap();
        assert_eq!(out, b"a;b 3\n");
    }
}

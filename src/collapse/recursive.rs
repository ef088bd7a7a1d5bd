use std::io;

use crate::collapse::util;
use crate::collapse::{Collapse, Occurrences, CAPACITY_LINE};
use crate::error::Result;

/// A post-filter for already-folded input that collapses direct recursion.
///
/// Maximal runs of identical adjacent frames become a single occurrence, so
/// `main;fib;fib;fib;c 7` turns into `main;fib;c 7`. Stacks that become
/// identical through this are merged and their counts summed.
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
        let mut collapsed = Vec::with_capacity(CAPACITY_LINE);
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }

            let l = util::trim(&line);
            if l.is_empty() {
                continue;
            }

            let (stack, count) = match parse_folded_line(l) {
                Some(parsed) => parsed,
                None => {
                    warn!("Unable to parse line: {}", String::from_utf8_lossy(l));
                    continue;
                }
            };

            collapsed.clear();
            let mut previous: Option<&[u8]> = None;
            for frame in stack.split(|&b| b == b';') {
                if previous == Some(frame) {
                    continue;
                }
                if !collapsed.is_empty() {
                    collapsed.push(b';');
                }
                collapsed.extend_from_slice(frame);
                previous = Some(frame);
            }
            self.occurrences.add(&collapsed, count)?;
        }

        self.occurrences.write_and_clear(writer)
    }

    fn is_applicable(&self, sample: &[u8]) -> bool {
        is_folded(sample)
    }
}

// Splits a folded line into its stack and trailing count.
pub(crate) fn parse_folded_line(line: &[u8]) -> Option<(&[u8], u64)> {
    let at = util::rfind_byte(line, b' ')?;
    let count = util::parse_u64(&line[at + 1..])?;
    let stack = util::trim_end(&line[..at]);
    if stack.is_empty() {
        return None;
    }
    Some((stack, count))
}

// Every complete, non-empty line parses as `stack count`. The last line of a
// sniff buffer may have been cut mid-line, so it only counts when it parses.
pub(crate) fn is_folded(sample: &[u8]) -> bool {
    let mut lines = sample.split(|&b| b == b'\n').peekable();
    let mut parsed_any = false;
    while let Some(line) = lines.next() {
        let l = util::trim(line);
        if l.is_empty() {
            continue;
        }
        if parse_folded_line(l).is_some() {
            parsed_any = true;
        } else if lines.peek().is_some() {
            return false;
        }
    }
    parsed_any
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collapse(input: &str) -> String {
        let mut folder = Folder::default();
        let mut out = Vec::new();
        folder.collapse(input.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn adjacent_repeats_collapse() {
        assert_eq!(collapse("a;b;b;b;c 7\n"), "a;b;c 7\n");
        assert_eq!(collapse("a;a 1\n"), "a 1\n");
        assert_eq!(collapse("a;b;a 1\n"), "a;b;a 1\n");
    }

    #[test]
    fn collapsed_stacks_merge() {
        assert_eq!(collapse("a;b;b 2\na;b 3\n"), "a;b 5\n");
    }

    #[test]
    fn canonical_input_is_unchanged() {
        let canonical = "a;b;c 1\nd 2\n";
        assert_eq!(collapse(canonical), canonical);
    }

    #[test]
    fn folded_detection() {
        assert!(is_folded(b"a;b 1\nc 2\n"));
        assert!(is_folded(b"a;b 1\nc 2\nd;e 3"));
        assert!(!is_folded(b"a;b\nc 2\n"));
        assert!(!is_folded(b""));
    }
}

/// Stack collapsing for the output of [`dtrace`](https://illumos.org/books/dtrace/).
pub mod dtrace;

/// The identity collapser for input that is already folded.
pub mod folded;

/// Attempts to use whichever collapser is appropriate for a given input.
pub mod guess;

/// Stack collapsing for the output of [`perf script`](https://linux.die.net/man/1/perf-script).
pub mod perf;

/// Collapsing of directly recursive frames in already-folded input.
pub mod recursive;

/// Stack collapsing for the output of `sample` on macOS.
pub mod sample;

/// Stack collapsing for CSV reports from Intel VTune.
pub mod vtune;

/// Stack collapsing for XML exports from `xctrace` (Xcode Instruments).
pub mod xctrace;

pub(crate) mod util;

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use fnv::FnvHashMap;

use crate::error::{Error, Result};

const CAPACITY_HASHMAP: usize = 512;
const CAPACITY_READER: usize = 128 * 1024;

/// Line buffers start out at this size; realistic perf and DTrace lines fit
/// without reallocation.
pub(crate) const CAPACITY_LINE: usize = 8 * 1024;

/// The abstract behavior of stack collapsing.
///
/// Implementors take the stack traces produced by one particular profiler's
/// output format and write lines in the folded stack format consumed by
/// [`crate::flamegraph`].
///
/// A collapser is a single-threaded, pull-based pipe: one call to
/// [`collapse`](Collapse::collapse) consumes the reader to EOF and returns.
/// Implementors own all of their scratch state, so independent invocations
/// never contend with each other.
pub trait Collapse {
    /// Collapses the contents of the provided `reader` and writes folded
    /// stack lines to the provided `writer`.
    fn collapse<R, W>(&mut self, reader: R, writer: W) -> Result<()>
    where
        R: io::BufRead,
        W: io::Write;

    /// Collapses the contents of the provided file (or of STDIN if `infile`
    /// is `None`) and writes folded stack lines to the provided `writer`.
    fn collapse_file<P, W>(&mut self, infile: Option<P>, writer: W) -> Result<()>
    where
        P: AsRef<Path>,
        W: Write,
    {
        match infile {
            Some(ref path) => {
                let file = File::open(path)?;
                let reader = io::BufReader::with_capacity(CAPACITY_READER, file);
                self.collapse(reader, writer)
            }
            None => {
                let stdio = io::stdin();
                let stdio_guard = stdio.lock();
                let reader = io::BufReader::with_capacity(CAPACITY_READER, stdio_guard);
                self.collapse(reader, writer)
            }
        }
    }

    /// Returns whether this implementation can parse the given input prefix.
    ///
    /// The prefix is at most the first 64 KiB of the input; the check must be
    /// cheap, since the guess collapser probes every format with it.
    fn is_applicable(&self, sample: &[u8]) -> bool;
}

/// The number of times each canonical call stack has been seen.
///
/// Keys are complete semicolon-joined stacks. Repeat puts for an existing
/// stack sum their counts, and a put for a stack that is already present does
/// not allocate; the key bytes are copied exactly once, on first insert.
#[derive(Debug, Default)]
pub(crate) struct Occurrences {
    map: FnvHashMap<Vec<u8>, u64>,
}

impl Occurrences {
    pub(crate) fn new() -> Self {
        Occurrences {
            map: FnvHashMap::with_capacity_and_hasher(
                CAPACITY_HASHMAP,
                fnv::FnvBuildHasher::default(),
            ),
        }
    }

    /// Adds `count` to the tally for `stack`, inserting it if new.
    pub(crate) fn add(&mut self, stack: &[u8], count: u64) -> Result<()> {
        if let Some(n) = self.map.get_mut(stack) {
            *n = n.checked_add(count).ok_or(Error::Overflow)?;
        } else {
            self.map.insert(stack.to_vec(), count);
        }
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Writes all entries as `stack count` lines and resets the table.
    ///
    /// Output is sorted by stack so identical input always serializes
    /// identically.
    pub(crate) fn write_and_clear<W>(&mut self, mut writer: W) -> Result<()>
    where
        W: io::Write,
    {
        let mut contents: Vec<_> = self.map.drain().collect();
        contents.sort();
        for (key, value) in contents {
            writer.write_all(&key)?;
            writeln!(writer, " {}", value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Occurrences;

    #[test]
    fn put_or_add_sums_counts() {
        let mut occurrences = Occurrences::new();
        occurrences.add(b"a;b", 1).unwrap();
        occurrences.add(b"a;b", 2).unwrap();
        occurrences.add(b"a;c", 4).unwrap();

        let mut out = Vec::new();
        occurrences.write_and_clear(&mut out).unwrap();
        assert_eq!(out, b"a;b 3\na;c 4\n");
        assert!(occurrences.is_empty());
    }

    #[test]
    fn overflow_is_an_error() {
        let mut occurrences = Occurrences::new();
        occurrences.add(b"a", u64::MAX).unwrap();
        assert!(occurrences.add(b"a", 1).is_err());
    }

    #[test]
    fn serialization_is_stable() {
        let mut first = Vec::new();
        let mut second = Vec::new();
        for out in [&mut first, &mut second] {
            let mut occurrences = Occurrences::new();
            occurrences.add(b"main;work", 3).unwrap();
            occurrences.add(b"main;idle", 9).unwrap();
            occurrences.add(b"main;work;inner", 1).unwrap();
            occurrences.write_and_clear(out).unwrap();
        }
        assert_eq!(first, second);
    }
}

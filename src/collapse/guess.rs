use std::io::{self, Read};

use crate::collapse::{dtrace, folded, perf, sample, vtune, xctrace, Collapse};
use crate::error::{Error, Result};

// How much of the input is sniffed before committing to a format. 64 KiB is
// enough to get past any profiler preamble and into real stack data.
const SNIFF_BYTES: usize = 64 * 1024;

/// A collapser that tries to find an appropriate `Collapse` implementation
/// based on the input, then delegates to it.
///
/// The formats with the most distinctive preambles are probed first; folded
/// input is the fallback, so feeding this an already-collapsed profile works
/// too. If no format matches, [`Error::UnknownFormat`] is returned.
#[derive(Debug, Default)]
pub struct Folder {}

impl Collapse for Folder {
    fn collapse<R, W>(&mut self, mut reader: R, writer: W) -> Result<()>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let mut sniff = Vec::with_capacity(SNIFF_BYTES);
        (&mut reader)
            .take(SNIFF_BYTES as u64)
            .read_to_end(&mut sniff)?;

        macro_rules! try_collapse_impl {
            ($name:literal, $folder:expr) => {{
                let mut folder = $folder;
                if folder.is_applicable(&sniff) {
                    info!("Using {} collapser", $name);
                    // replay the sniffed prefix in front of the remainder
                    let chained = io::Cursor::new(sniff).chain(reader);
                    return folder.collapse(io::BufReader::new(chained), writer);
                }
            }};
        }

        try_collapse_impl!("xctrace", xctrace::Folder::default());
        try_collapse_impl!("vtune", vtune::Folder::default());
        try_collapse_impl!("sample", sample::Folder::default());
        try_collapse_impl!("dtrace", dtrace::Folder::default());
        try_collapse_impl!("perf", perf::Folder::default());
        try_collapse_impl!("folded", folded::Folder::default());

        error!("No applicable collapse implementation found for input");
        Err(Error::UnknownFormat)
    }

    fn is_applicable(&self, _sample: &[u8]) -> bool {
        unreachable!("the guess collapser is never probed")
    }
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
    fn guesses_perf() {
        let input = "\
app 1234/1234 [000] 0.1: cycles:
\tffffffff81000001 funcA+0x10 (/bin/app)
\tffffffff81000002 funcB+0x20 (/bin/app)

";
        assert_eq!(collapse(input), "app;funcB;funcA 1\n");
    }

    #[test]
    fn guesses_folded() {
        assert_eq!(collapse("a;b 1\na;b 2\n"), "a;b 3\n");
    }

    #[test]
    fn unknown_input_is_an_error() {
        let mut folder = Folder::default();
        let err = folder
            .collapse(&b"certainly not profiler output\n"[..], io::sink())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownFormat));
    }
}

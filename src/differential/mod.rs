use std::fs::File;
use std::io;
use std::path::Path;

use fnv::FnvHashMap;

use crate::collapse::util;
use crate::collapse::CAPACITY_LINE;
use crate::error::{Error, Result};

const CAPACITY_READER: usize = 128 * 1024;

#[derive(Clone, Copy, Debug, Default)]
struct Counts {
    first: u64,
    second: u64,
}

/// Configure the generated output.
///
/// All options default to off.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Scale the first profile's counts so its total matches the second.
    ///
    /// This helps when the two profiles were taken under different load. If
    /// this is not set and the load changed, everything will look like it
    /// got slower (or faster) even where the shape of the profile did not
    /// change.
    pub normalize: bool,

    /// Replace hex addresses like "0x45ef2173" with "0x..." before joining,
    /// so addresses that differ between the two runs do not split entries.
    pub strip_hex: bool,
}

/// Produce output that can be used to generate a differential flame graph.
///
/// The readers are expected to contain folded stack lines, each with a
/// semicolon-separated list of frame names and a sample count. The output
/// has two count columns, one per profile, with `0` filling in for stacks
/// that appear on only one side.
pub fn from_readers<R1, R2, W>(opt: &Options, reader1: R1, reader2: R2, writer: W) -> Result<()>
where
    R1: io::BufRead,
    R2: io::BufRead,
    W: io::Write,
{
    let mut stack_counts = FnvHashMap::default();
    let mut stripped_fractional_samples = false;
    let total1 = parse_stack_counts(
        opt,
        &mut stack_counts,
        reader1,
        true,
        &mut stripped_fractional_samples,
    )?;
    let total2 = parse_stack_counts(
        opt,
        &mut stack_counts,
        reader2,
        false,
        &mut stripped_fractional_samples,
    )?;

    if opt.normalize && total1 > 0 && total1 != total2 {
        for counts in stack_counts.values_mut() {
            counts.first = (u128::from(counts.first) * u128::from(total2) / u128::from(total1))
                as u64;
        }
    }

    write_stacks(&stack_counts, writer)
}

/// Produce differential output from a before and an after profile on disk.
///
/// See [`from_readers`] for the input and output formats.
pub fn from_files<P1, P2, W>(opt: &Options, filename1: P1, filename2: P2, writer: W) -> Result<()>
where
    P1: AsRef<Path>,
    P2: AsRef<Path>,
    W: io::Write,
{
    let file1 = File::open(filename1)?;
    let reader1 = io::BufReader::with_capacity(CAPACITY_READER, file1);
    let file2 = File::open(filename2)?;
    let reader2 = io::BufReader::with_capacity(CAPACITY_READER, file2);
    from_readers(opt, reader1, reader2, writer)
}

// Tallies one reader's folded lines into stack_counts and returns the sum of
// its sample counts.
fn parse_stack_counts<R>(
    opt: &Options,
    stack_counts: &mut FnvHashMap<Vec<u8>, Counts>,
    mut reader: R,
    is_first: bool,
    stripped_fractional_samples: &mut bool,
) -> Result<u64>
where
    R: io::BufRead,
{
    let mut total: u64 = 0;
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

        match parse_line(l, opt.strip_hex, stripped_fractional_samples) {
            Some((stack, count)) => {
                let counts = stack_counts.entry(stack).or_default();
                let side = if is_first {
                    &mut counts.first
                } else {
                    &mut counts.second
                };
                *side = side.checked_add(count).ok_or(Error::Overflow)?;
                total = total.checked_add(count).ok_or(Error::Overflow)?;
            }
            None => warn!("Unable to parse line: {}", String::from_utf8_lossy(l)),
        }
    }

    Ok(total)
}

// Writes three-column lines: the folded stack and one count per profile.
fn write_stacks<W>(stack_counts: &FnvHashMap<Vec<u8>, Counts>, mut writer: W) -> Result<()>
where
    W: io::Write,
{
    let mut stacks: Vec<_> = stack_counts.iter().collect();
    stacks.sort_by_key(|&(stack, _)| stack);
    for (stack, &Counts { first, second }) in stacks {
        writer.write_all(stack)?;
        writeln!(writer, " {} {}", first, second)?;
    }
    Ok(())
}

// Parses a folded line into its (possibly hex-stripped) stack and count.
// Fractional counts are truncated, with a one-shot warning.
fn parse_line(
    line: &[u8],
    strip_hex: bool,
    stripped_fractional_samples: &mut bool,
) -> Option<(Vec<u8>, u64)> {
    let at = util::rfind_byte(line, b' ')?;
    let mut count_bytes = &line[at + 1..];

    if let Some(dot) = util::find_byte(count_bytes, b'.') {
        let fraction = &count_bytes[dot + 1..];
        if fraction.is_empty() || !fraction.iter().all(u8::is_ascii_digit) {
            return None;
        }
        if !*stripped_fractional_samples && fraction.iter().any(|&b| b != b'0') {
            *stripped_fractional_samples = true;
            warn!(
                "The input data has fractional sample counts that will be truncated to integers"
            );
        }
        count_bytes = &count_bytes[..dot];
    }

    let count = util::parse_u64(count_bytes)?;
    let stack = util::trim_end(&line[..at]);
    if stack.is_empty() {
        return None;
    }

    let stack = if strip_hex {
        strip_hex_address(stack)
    } else {
        stack.to_vec()
    };
    Some((stack, count))
}

// Replace all hex runs like "0x45ef2173" with "0x...".
fn strip_hex_address(stack: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(stack.len());
    let mut i = 0;
    while i < stack.len() {
        if stack[i] == b'0' && stack.get(i + 1) == Some(&b'x') {
            let digits = i + 2;
            let mut end = digits;
            while end < stack.len() && stack[end].is_ascii_hexdigit() {
                end += 1;
            }
            if end > digits {
                out.extend_from_slice(b"0x...");
                i = end;
                continue;
            }
        }
        out.push(stack[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(opt: &Options, before: &str, after: &str) -> String {
        let mut out = Vec::new();
        from_readers(opt, before.as_bytes(), after.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn union_with_zero_fill() {
        let out = diff(&Options::default(), "a;b 3\nc 1\n", "a;b 5\nd 2\n");
        assert_eq!(out, "a;b 3 5\nc 1 0\nd 0 2\n");
    }

    #[test]
    fn swapping_inputs_swaps_columns() {
        let before = "a;b 3\nc 1\n";
        let after = "a;b 5\nd 2\n";
        let forward = diff(&Options::default(), before, after);
        let backward = diff(&Options::default(), after, before);

        let swap = |s: &str| {
            let mut lines: Vec<String> = s
                .lines()
                .map(|l| {
                    let mut it = l.rsplitn(3, ' ');
                    let second = it.next().unwrap();
                    let first = it.next().unwrap();
                    let stack = it.next().unwrap();
                    format!("{} {} {}", stack, second, first)
                })
                .collect();
            lines.sort();
            lines.join("\n") + "\n"
        };
        assert_eq!(swap(&forward), backward);
    }

    #[test]
    fn normalize_scales_first_column() {
        let opt = Options {
            normalize: true,
            ..Default::default()
        };
        let out = diff(&opt, "a 100\nb 50\n", "a 200\n");
        assert_eq!(out, "a 133 200\nb 66 0\n");
    }

    #[test]
    fn strip_hex_joins_stacks() {
        let opt = Options {
            strip_hex: true,
            ..Default::default()
        };
        let out = diff(&opt, "foo;0x7f00abcd 3\n", "foo;0x7f00ef12 5\n");
        assert_eq!(out, "foo;0x... 3 5\n");
    }

    #[test]
    fn hex_stripping_edge_cases() {
        assert_eq!(strip_hex_address(b"0x12ab"), b"0x...");
        assert_eq!(strip_hex_address(b"f0x"), b"f0x");
        assert_eq!(strip_hex_address(b"a0xffz0x1"), b"a0x...z0x...");
        assert_eq!(strip_hex_address(b"plain"), b"plain");
    }

    #[test]
    fn fractional_counts_truncate() {
        let out = diff(&Options::default(), "a 3.7\n", "a 5\n");
        assert_eq!(out, "a 3 5\n");
    }
}

use std::io;

use crate::collapse::util;
use crate::collapse::{Collapse, Occurrences, CAPACITY_LINE};
use crate::error::{Error, Result};

// Modules that mark a frame as running in the kernel. Loadable modules are
// recognized by their .ko suffix instead.
static KERNEL_MODULES: &[&[u8]] = &[
    b"unix", b"genunix", b"ip", b"dtrace", b"mac", b"specfs", b"scsi_vhci", b"zfs", b"sockfs",
];

/// Settings that change how frames are named from the incoming stack traces.
///
/// All options default to off.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Annotate kernel frames with a `_[k]` suffix.
    pub annotate_kernel: bool,

    /// Prepend the traced process name, when one was printed before the
    /// stacks (typically by a `dtrace:::BEGIN` clause).
    pub include_pname: bool,

    /// Keep function offsets (except on leaf frames).
    pub includeoffset: bool,
}

/// A stack collapser for the output of dtrace `ustack()`.
///
/// To construct one, either use `dtrace::Folder::default()` or create an
/// [`Options`] and use `dtrace::Folder::from(options)`.
#[derive(Debug, Default)]
pub struct Folder {
    /// Frames accumulated for the current stack, leaf first.
    stack: Vec<Vec<u8>>,

    /// Number of times each call stack has been seen.
    occurrences: Occurrences,

    /// Approximate byte length of the folded line under construction.
    stack_str_size: usize,

    /// Process name printed ahead of the stacks, if any.
    comm: Option<Vec<u8>>,

    /// Scratch space for expanding `->` inline chains.
    cache_inlines: Vec<Vec<u8>>,

    opt: Options,
}

impl Collapse for Folder {
    fn collapse<R, W>(&mut self, mut reader: R, writer: W) -> Result<()>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let mut line = Vec::with_capacity(CAPACITY_LINE);
        let mut lineno = 0;

        // skip header lines -- the first blank line marks the start of data
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                // We reached the end :( this should not happen.
                warn!("File ended while skipping headers");
                return Ok(());
            }
            lineno += 1;
            let l = util::trim(&line);
            if l.is_empty() {
                break;
            }
            self.maybe_comm(l);
        }

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            lineno += 1;

            let l = util::trim(&line);
            if l.is_empty() {
                continue;
            } else if let Some(count) = util::parse_u64(l) {
                self.on_stack_end(count)?;
            } else if l.starts_with(b"dtrace:") {
                // warnings from dtrace itself are interleaved with the data
                warn!("Ignored dtrace message: {}", String::from_utf8_lossy(l));
            } else {
                self.on_stack_line(l);
            }
        }

        if !self.stack.is_empty() {
            self.stack.clear();
            self.stack_str_size = 0;
            return Err(Error::malformed(lineno, "stack ended without a count"));
        }

        self.occurrences.write_and_clear(writer)?;
        self.comm = None;
        Ok(())
    }

    fn is_applicable(&self, sample: &[u8]) -> bool {
        let mut found_empty_line = false;
        let mut found_stack_line = false;
        for line in sample.split(|&b| b == b'\n') {
            let line = util::trim(line);
            if line.is_empty() {
                found_empty_line = true;
            } else if found_empty_line {
                if util::parse_u64(line).is_some() {
                    // a count line must follow at least one stack line
                    return found_stack_line;
                } else if line.starts_with(b"dtrace:") {
                    continue;
                } else {
                    found_stack_line = true;
                }
            }
        }
        false
    }
}

impl From<Options> for Folder {
    fn from(opt: Options) -> Self {
        Folder {
            opt,
            ..Default::default()
        }
    }
}

impl Folder {
    // A BEGIN clause conventionally prints the traced command on a line of
    // its own before any data; remember the last such candidate.
    fn maybe_comm(&mut self, line: &[u8]) {
        if !self.opt.include_pname {
            return;
        }
        if line.starts_with(b"dtrace:") || line.starts_with(b"CPU") {
            return;
        }
        if !line.is_empty() && !line.iter().any(|b| b.is_ascii_whitespace()) {
            self.comm = Some(line.to_vec());
        }
    }

    // we have a stack line that shows one stack entry from the current
    // sample, like:
    //
    //     unix`tsc_gethrtimeunscaled+0x21
    //     genunix`gethrtime_unscaled+0xa
    //     libc.so.1`gettimeofday+0x7
    //     0xfffffd7fffll0e31
    //       1
    fn on_stack_line(&mut self, line: &[u8]) {
        let frame = if self.opt.includeoffset {
            line
        } else {
            remove_offset(line)
        };

        let mut frame = uncpp(frame);

        if frame.is_empty() {
            frame = b"-";
        }

        let is_kernel = self.opt.annotate_kernel && module_is_kernel(frame);

        let mut inline = false;
        for func in split_arrows(frame) {
            let mut func: Vec<u8> = func
                .iter()
                .map(|&b| if b == b';' { b':' } else { b })
                .collect();
            if inline {
                func.extend_from_slice(b"_[i]");
            } else if is_kernel {
                func.extend_from_slice(b"_[k]");
            }
            inline = true;
            self.stack_str_size += func.len() + 1;
            self.cache_inlines.push(func);
        }
        // reverse so the whole stack stays leaf first
        while let Some(func) = self.cache_inlines.pop() {
            self.stack.push(func);
        }
    }

    fn on_stack_end(&mut self, count: u64) -> Result<()> {
        let comm = match (self.opt.include_pname, &self.comm) {
            (true, Some(comm)) => &comm[..],
            _ => b"",
        };
        let mut stack_str = Vec::with_capacity(comm.len() + 1 + self.stack_str_size);
        stack_str.extend_from_slice(comm);

        let last = self.stack.len().saturating_sub(1);
        for (i, frame) in self.stack.drain(..).rev().enumerate() {
            if !stack_str.is_empty() {
                stack_str.push(b';');
            }
            // trim the leaf offset if offsets were retained
            if self.opt.includeoffset && i == last {
                stack_str.extend_from_slice(remove_offset(&frame));
            } else {
                stack_str.extend_from_slice(&frame);
            }
        }

        if !stack_str.is_empty() {
            self.occurrences.add(&stack_str, count)?;
        }

        // reset for the next event
        self.stack_str_size = 0;
        self.stack.clear();
        Ok(())
    }
}

// Split a frame on `->`, which dtrace uses for inlined call chains.
fn split_arrows(frame: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = Some(frame);
    std::iter::from_fn(move || {
        let frame = rest?;
        match util::find_subslice(frame, b"->") {
            Some(at) => {
                rest = Some(&frame[at + 2..]);
                Some(&frame[..at])
            }
            None => {
                rest = None;
                Some(frame)
            }
        }
    })
}

fn module_is_kernel(frame: &[u8]) -> bool {
    let module = match util::find_byte(frame, b'`') {
        Some(at) => &frame[..at],
        None => return false,
    };
    module.ends_with(b".ko") || KERNEL_MODULES.contains(&module)
}

// Strip everything from the last `+` on; dtrace prints offsets that way.
fn remove_offset(line: &[u8]) -> &[u8] {
    match util::rfind_byte(line, b'+') {
        Some(at) => &line[..at],
        None => line,
    }
}

// This function approximates the Perl regex s/(::.*)[(<].*/$1/
// from https://github.com/brendangregg/FlameGraph/blob/1b1c6dee/stackcollapse.pl#L88
fn uncpp(probe: &[u8]) -> &[u8] {
    if let Some(scope) = util::find_subslice(probe, b"::") {
        if let Some(open) = probe[scope + 2..]
            .iter()
            .rposition(|&c| c == b'(' || c == b'<')
        {
            &probe[..scope + 2 + open]
        } else {
            probe
        }
    } else {
        probe
    }
}

use std::io;

use crate::collapse::util::{self, fix_partially_demangled_rust_symbol};
use crate::collapse::{Collapse, Occurrences, CAPACITY_LINE};
use crate::error::Result;

// The set of symbols to ignore for 'waiting' threads, for ease of use.
// This will hide waiting threads from the view, making it easier to
// see what is actually running in the sample.
static IGNORE_SYMBOLS: &[&[u8]] = &[
    b"__psynch_cvwait",
    b"__select",
    b"__semwait_signal",
    b"__ulock_wait",
    b"__wait4",
    b"__workq_kernreturn",
    b"kevent",
    b"mach_msg_trap",
    b"read",
    b"semaphore_wait_trap",
];

// The call graph begins after this line.
static START_LINE: &[u8] = b"Call graph:";

// The section after the call graph begins with this.
// We know we're done when we get to this line.
static END_LINE: &[u8] = b"Total number in stack";

/// Settings that change how frames are named from the incoming stack traces.
///
/// All options default to off.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Don't include modules with function names.
    pub no_modules: bool,
}

/// A stack collapser for the output of `sample` on macOS.
///
/// To construct one, either use `sample::Folder::default()` or create an
/// [`Options`] and use `sample::Folder::from(options)`.
#[derive(Debug, Default)]
pub struct Folder {
    /// Frames on the stack in this entry thus far, root first.
    stack: Vec<Vec<u8>>,

    /// Number of samples for the deepest frame pushed so far.
    current_samples: u64,

    /// Number of times each call stack has been seen.
    occurrences: Occurrences,

    opt: Options,
}

impl Collapse for Folder {
    fn collapse<R, W>(&mut self, mut reader: R, writer: W) -> Result<()>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let mut line = Vec::with_capacity(CAPACITY_LINE);

        // Skip everything until we find the call graph.
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                warn!("File ended before start of call graph");
                return Ok(());
            }
            if line.starts_with(START_LINE) {
                break;
            }
        }

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                warn!("File ended before end of call graph");
                self.record_stack()?;
                break;
            }

            let l = util::trim_end(&line);
            if l.is_empty() {
                continue;
            } else if l.starts_with(b"    ") {
                self.on_line(l)?;
            } else if l.starts_with(END_LINE) {
                self.record_stack()?;
                break;
            } else {
                warn!(
                    "Stack line doesn't start with 4 spaces: {}",
                    String::from_utf8_lossy(l)
                );
            }
        }

        self.stack.clear();
        self.current_samples = 0;
        self.occurrences.write_and_clear(writer)
    }

    /// Check for the start line of a call graph.
    fn is_applicable(&self, sample: &[u8]) -> bool {
        sample
            .split(|&b| b == b'\n')
            .any(|line| line.starts_with(START_LINE))
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
    fn line_parts<'a>(&self, line: &'a [u8]) -> Option<(&'a [u8], &'a [u8], &'a [u8])> {
        let line = util::trim_start(line);
        let (samples, rest) = util::split_once_byte(line, b' ')?;

        let func = util::trim_end(match util::find_byte(rest, b'(') {
            Some(open) => &rest[..open],
            None => rest,
        });

        let mut module: &[u8] = b"";
        if !self.opt.no_modules {
            // Modules are shown with "(in libfoo.dylib)" or "(in AppKit)".
            if let Some(open) = util::rfind_subslice(rest, b"(in ") {
                let after = &rest[open + 4..];
                if let Some(close) = util::find_byte(after, b')') {
                    module = &after[..close];
                }
                // Remove ".dylib", since it adds no value.
                if module.ends_with(b".dylib") {
                    module = &module[..module.len() - 6];
                }
            }
        }

        Some((samples, func, module))
    }

    fn is_indent_char(c: u8) -> bool {
        c == b' ' || c == b'+' || c == b'|' || c == b':' || c == b'!'
    }

    // Handle call graph lines of the form:
    //
    // 5130 Thread_8749954
    //    + 5130 start_wqthread  (in libsystem_pthread.dylib) ...
    //    +   4282 _pthread_wqthread  (in libsystem_pthread.dylib) ...
    //    +   ! 4282 __doworkq_kernreturn  (in libsystem_kernel.dylib) ...
    //    +   848 _pthread_wqthread  (in libsystem_pthread.dylib) ...
    //    +     848 __doworkq_kernreturn  (in libsystem_kernel.dylib) ...
    fn on_line(&mut self, line: &[u8]) -> Result<()> {
        let indent_chars = match line[4..]
            .iter()
            .position(|&c| !Self::is_indent_char(c))
        {
            Some(at) => at,
            None => {
                warn!(
                    "Found stack line with only indent characters: {}",
                    String::from_utf8_lossy(line)
                );
                return Ok(());
            }
        };

        // Each indent is two characters.
        if indent_chars % 2 != 0 {
            warn!(
                "Odd number of indentation characters for line: {}",
                String::from_utf8_lossy(line)
            );
        }

        let prev_depth = self.stack.len();
        let depth = indent_chars / 2 + 1;

        if depth <= prev_depth {
            self.record_stack()?;
            for _ in 0..=prev_depth - depth {
                self.stack.pop();
            }
        } else if depth > prev_depth + 1 {
            warn!(
                "Skipped indentation level at line: {}",
                String::from_utf8_lossy(line)
            );
        }

        match self.line_parts(&line[4 + indent_chars..]) {
            Some((samples, func, module)) => match util::parse_u64(samples) {
                Some(samples) => {
                    self.current_samples = samples;
                    // sample doesn't properly demangle Rust symbols, so fix those
                    let func = fix_partially_demangled_rust_symbol(&String::from_utf8_lossy(func))
                        .into_owned();
                    let mut frame = Vec::with_capacity(module.len() + 1 + func.len());
                    if !module.is_empty() {
                        frame.extend_from_slice(module);
                        frame.push(b'`');
                    }
                    frame.extend_from_slice(func.as_bytes());
                    self.stack.push(frame);
                }
                None => warn!(
                    "Invalid samples field: {}",
                    String::from_utf8_lossy(samples)
                ),
            },
            None => warn!(
                "Unable to parse stack line: {}",
                String::from_utf8_lossy(line)
            ),
        }

        Ok(())
    }

    fn record_stack(&mut self) -> Result<()> {
        if let Some(leaf) = self.stack.last() {
            for symbol in IGNORE_SYMBOLS {
                if leaf.ends_with(symbol) {
                    // Don't write out stacks that are just waiting
                    return Ok(());
                }
            }
        } else {
            return Ok(());
        }

        let mut stack_str =
            Vec::with_capacity(self.stack.iter().map(|f| f.len() + 1).sum::<usize>());
        for (i, frame) in self.stack.iter().enumerate() {
            if i > 0 {
                stack_str.push(b';');
            }
            stack_str.extend_from_slice(frame);
        }
        self.occurrences.add(&stack_str, self.current_samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_extraction() {
        let folder = Folder::default();
        let (samples, func, module) = folder
            .line_parts(b"2791 thread_start  (in libsystem_pthread.dylib) + 13 [0x7fff5f8]")
            .unwrap();
        assert_eq!(samples, b"2791");
        assert_eq!(func, b"thread_start");
        assert_eq!(module, b"libsystem_pthread");
    }

    #[test]
    fn modules_can_be_disabled() {
        let folder = Folder::from(Options { no_modules: true });
        let (_, func, module) = folder
            .line_parts(b"10 main  (in app) + 1 [0x1000]")
            .unwrap();
        assert_eq!(func, b"main");
        assert_eq!(module, b"");
    }
}

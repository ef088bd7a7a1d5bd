use std::io;

use crate::collapse::util::{self, tidy_generic};
use crate::collapse::{Collapse, Occurrences, CAPACITY_LINE};
use crate::error::Result;

/// Settings that change how frames are named from the incoming stack traces.
#[derive(Clone, Debug)]
pub struct Options {
    /// Annotate JIT frames with a `_[j]` suffix.
    pub annotate_jit: bool,

    /// Annotate kernel frames with a `_[k]` suffix.
    pub annotate_kernel: bool,

    /// Only consider samples of the given event type (see `perf list`).
    ///
    /// If this is `None`, the first event type encountered is adopted, and
    /// samples for every other event type are skipped. Merging different
    /// event types, such as instructions and cycles, produces misleading
    /// results.
    pub event_filter: Option<String>,

    /// Emit the raw program counter as `0x…` where no symbol was found.
    pub include_addrs: bool,

    /// Include PID in the root frame.
    ///
    /// The root frame is then named `comm-pid` instead of `comm`.
    pub include_pid: bool,

    /// Include the process name as the root frame of every stack.
    ///
    /// This is on by default.
    pub include_pname: bool,

    /// Include TID and PID in the root frame.
    ///
    /// The root frame is then named `comm-pid/tid` instead of `comm`.
    pub include_tid: bool,

    /// Drop a frame and all of its callers whenever its name matches one of
    /// these, leaving only the frames below the match.
    pub skip_after: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            annotate_jit: false,
            annotate_kernel: false,
            event_filter: None,
            include_addrs: false,
            include_pid: false,
            include_pname: true,
            include_tid: false,
            skip_after: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
enum EventFilter {
    /// No filter has been adopted yet.
    Unset,
    /// The filter came from the first event header.
    Defaulted(String),
    /// A differing event type has been seen and warned about.
    Warned(String),
    /// The filter was supplied by the caller.
    Given(String),
}

/// A stack collapser for the output of `perf script`.
///
/// To construct one, either use `perf::Folder::default()` or create an
/// [`Options`] and use `perf::Folder::from(options)`.
#[derive(Debug)]
pub struct Folder {
    /// Whether we are between an event header and its terminating blank line.
    in_event: bool,

    /// Skip all stack lines in the current event.
    skip_stack: bool,

    /// Frames accumulated for the current event, leaf first.
    stack: Vec<Vec<u8>>,

    /// Number of times each call stack has been seen.
    occurrences: Occurrences,

    /// Current process name, with PID/TID suffixes already applied.
    pname: Vec<u8>,

    /// Current bare comm, used for Java symbol cleanup.
    comm: Vec<u8>,

    event_filter: EventFilter,

    opt: Options,
}

impl From<Options> for Folder {
    fn from(opt: Options) -> Self {
        let event_filter = match opt.event_filter {
            Some(ref event) => EventFilter::Given(event.clone()),
            None => EventFilter::Unset,
        };
        Folder {
            in_event: false,
            skip_stack: false,
            stack: Vec::new(),
            occurrences: Occurrences::new(),
            pname: Vec::new(),
            comm: Vec::new(),
            event_filter,
            opt,
        }
    }
}

impl Default for Folder {
    fn default() -> Self {
        Folder::from(Options::default())
    }
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

            if line.starts_with(b"#") {
                self.on_comment(util::trim_end(&line));
                continue;
            }

            let end = util::trim_end(&line).len();
            if end == 0 {
                self.after_event()?;
            } else {
                line.truncate(end);
                self.on_line(&line);
            }
        }
        // input that ends without a trailing blank line still closes its
        // last sample
        if self.in_event {
            self.after_event()?;
        }

        self.occurrences.write_and_clear(writer)?;
        self.reset();
        Ok(())
    }

    fn is_applicable(&self, sample: &[u8]) -> bool {
        for line in sample.split(|&b| b == b'\n') {
            let line = util::trim_end(line);
            if line.is_empty() || line.starts_with(b"#") {
                continue;
            }
            if line[0].is_ascii_whitespace() {
                continue;
            }
            if let Some((_, event)) = parse_event_line(line) {
                if !event.is_empty() {
                    return true;
                }
            }
        }
        false
    }
}

impl Folder {
    fn reset(&mut self) {
        self.in_event = false;
        self.skip_stack = false;
        self.stack.clear();
        self.pname.clear();
        self.comm.clear();
        if let EventFilter::Defaulted(_) | EventFilter::Warned(_) = self.event_filter {
            self.event_filter = EventFilter::Unset;
        }
    }

    // `perf script --header` repeats the recorded command line, which names
    // the profiled binary before any event is seen:
    //
    //     # cmdline : /usr/bin/perf record -g /usr/bin/app arg1
    fn on_comment(&mut self, line: &[u8]) {
        let rest = match line.strip_prefix(b"# cmdline : ") {
            Some(rest) => rest,
            None => return,
        };
        for token in rest.split(|&b| b == b' ') {
            if token.is_empty() || token.starts_with(b"-") {
                continue;
            }
            let basename = match util::rfind_byte(token, b'/') {
                Some(at) => &token[at + 1..],
                None => token,
            };
            self.comm.clear();
            self.comm.extend_from_slice(basename);
            self.pname.clear();
            if self.opt.include_pname {
                for &b in basename {
                    self.pname.push(if b == b' ' { b'_' } else { b });
                }
            }
            return;
        }
    }

    fn on_line(&mut self, line: &[u8]) {
        if !line[0].is_ascii_whitespace() {
            self.on_event_line(line)
        } else if self.in_event {
            self.on_stack_line(line)
        } else {
            warn!("weird stack line: {}", String::from_utf8_lossy(line));
        }
    }

    // we have an event line, like:
    //
    //     java 25607 4794564.109216: cycles:
    //     java 12688 [002] 6544038.708352: cpu-clock:
    //     V8 WorkerThread 25607 4794564.109216: cycles:
    //     java 24636/25607 [000] 4794564.109216: cycles:
    //     vote   913    72.176760:     257597 cycles:uppp:
    fn on_event_line(&mut self, line: &[u8]) {
        self.in_event = true;
        self.skip_stack = false;

        let ((comm, pid, tid), event) = match parse_event_line(line) {
            Some((parts, event)) if !event.is_empty() => (parts, event),
            _ => {
                warn!("weird event line: {}", String::from_utf8_lossy(line));
                self.in_event = false;
                return;
            }
        };

        match self.event_filter {
            EventFilter::Unset => {
                // By default only show events of the first encountered type.
                self.event_filter =
                    EventFilter::Defaulted(String::from_utf8_lossy(event).into_owned());
            }
            EventFilter::Defaulted(ref filter) => {
                if filter.as_bytes() != event {
                    warn!("Filtering for events of type: {}", filter);
                    let filter = filter.clone();
                    self.event_filter = EventFilter::Warned(filter);
                    self.skip_stack = true;
                    return;
                }
            }
            EventFilter::Warned(ref filter) | EventFilter::Given(ref filter) => {
                if filter.as_bytes() != event {
                    self.skip_stack = true;
                    return;
                }
            }
        }

        self.comm.clear();
        self.comm.extend_from_slice(comm);
        self.pname.clear();
        if self.opt.include_pname {
            for &b in comm {
                self.pname.push(if b == b' ' { b'_' } else { b });
            }
            if self.opt.include_tid {
                self.pname.push(b'-');
                self.pname.extend_from_slice(pid);
                self.pname.push(b'/');
                self.pname.extend_from_slice(tid);
            } else if self.opt.include_pid {
                self.pname.push(b'-');
                self.pname.extend_from_slice(pid);
            }
        }
    }

    // we have a stack line that shows one stack entry from the preceding
    // event, like:
    //
    //     ffffffff8103ce3b native_safe_halt ([kernel.kallsyms])
    //     7f533952bc77 _dl_check_map_versions+0x597 (/usr/lib/ld-2.28.so)
    //     7f722d142778 Ljava/io/PrintStream;::print (/tmp/perf-19982.map)
    //     7f53389994d0 [unknown] ([unknown])
    fn on_stack_line(&mut self, line: &[u8]) {
        if self.skip_stack {
            return;
        }

        let (pc, rawfunc, module) = match stack_line_parts(line) {
            Some(parts) => parts,
            None => {
                warn!("weird stack line: {}", String::from_utf8_lossy(line));
                return;
            }
        };

        let rawfunc = util::strip_offset(rawfunc);

        // skip perf-inserted process names
        // see https://github.com/brendangregg/FlameGraph/blob/f857ebc9/stackcollapse-perf.pl#L269
        if rawfunc.starts_with(b"(") {
            return;
        }

        let mut func = self.symbol_or_fallback(rawfunc, module, pc);
        tidy_generic(&mut func);
        if self.comm == b"java" {
            tidy_java(&mut func);
        }

        // detect kernel and jit frames from the module name; eg:
        //
        //     ffffffff8103ce3b native_safe_halt ([kernel.kallsyms])
        //     8c3453 tcp_sendmsg (/lib/modules/4.3.0-rc1-virtual/build/vmlinux)
        //     7f722d142778 Ljava/io/PrintStream;::print (/tmp/perf-19982.map)
        if self.opt.annotate_kernel
            && (module.starts_with(b"[") || module.ends_with(b"vmlinux"))
            && module != b"[unknown]"
        {
            func.extend_from_slice(b"_[k]");
        }
        if self.opt.annotate_jit && module.starts_with(b"/tmp/perf-") && module.ends_with(b".map") {
            func.extend_from_slice(b"_[j]");
        }

        self.stack.push(func);
    }

    fn symbol_or_fallback(&self, rawfunc: &[u8], module: &[u8], pc: &[u8]) -> Vec<u8> {
        if rawfunc != b"[unknown]" {
            return rawfunc.to_vec();
        }

        if self.opt.include_addrs {
            let mut func = Vec::with_capacity(pc.len() + 2);
            func.extend_from_slice(b"0x");
            func.extend_from_slice(pc);
            return func;
        }

        if module != b"[unknown]" {
            // use everything following the last / of the module as the name
            let module = match util::rfind_byte(module, b'/') {
                Some(at) => &module[at + 1..],
                None => module,
            };
            let mut func = Vec::with_capacity(module.len() + 2);
            func.push(b'[');
            func.extend_from_slice(module);
            func.push(b']');
            return func;
        }

        rawfunc.to_vec()
    }

    fn after_event(&mut self) -> Result<()> {
        if !self.skip_stack && !self.stack.is_empty() {
            // the stack is leaf first; a skip_after match and everything
            // shallower than it are dropped
            if !self.opt.skip_after.is_empty() {
                let matches = |frame: &Vec<u8>| {
                    self.opt
                        .skip_after
                        .iter()
                        .any(|name| name.as_bytes() == &frame[..])
                };
                if let Some(at) = self.stack.iter().position(matches) {
                    self.stack.truncate(at);
                }
            }

            if !self.stack.is_empty() {
                let mut stack_str = Vec::with_capacity(
                    self.pname.len() + self.stack.iter().map(|f| f.len() + 1).sum::<usize>(),
                );
                stack_str.extend_from_slice(&self.pname);
                for frame in self.stack.iter().rev() {
                    if !stack_str.is_empty() {
                        stack_str.push(b';');
                    }
                    stack_str.extend_from_slice(frame);
                }
                self.occurrences.add(&stack_str, 1)?;
            }
        }

        // reset for the next event
        self.in_event = false;
        self.skip_stack = false;
        self.stack.clear();
        Ok(())
    }
}

// Splits an event header into ((comm, pid, tid), event_name).
//
// The comm may contain spaces, so the pid/tid anchor is the first word
// consisting only of digits (and at most one slash); the event name is the
// final word, which ends with a colon.
fn parse_event_line(line: &[u8]) -> Option<((&[u8], &[u8], &[u8]), &[u8])> {
    let parts = event_line_parts(line)?;
    let last = &line[util::rfind_byte(line, b' ').map(|at| at + 1).unwrap_or(0)..];
    if let Some((&b':', event)) = last.split_last() {
        Some((parts, event))
    } else {
        None
    }
}

fn event_line_parts(line: &[u8]) -> Option<(&[u8], &[u8], &[u8])> {
    let mut word_start = 0;
    let mut all_digits = false;
    let mut contains_slash_at = None;
    for (idx, &c) in line.iter().enumerate() {
        if c == b' ' {
            if all_digits && word_start > 0 {
                let (pid, tid) = if let Some(slash) = contains_slash_at {
                    // found PID + TID
                    (&line[word_start..slash], &line[(slash + 1)..idx])
                } else {
                    // found TID only
                    (&b"?"[..], &line[word_start..idx])
                };
                let comm = &line[..(word_start - 1)];
                return Some((comm, pid, tid));
            }
            word_start = idx + 1;
            all_digits = true;
        } else if c == b'/' {
            if all_digits {
                contains_slash_at = Some(idx);
            }
        } else if c.is_ascii_digit() {
            // we're still all digits if we were all digits
        } else {
            all_digits = false;
            contains_slash_at = None;
        }
    }
    None
}

fn stack_line_parts(line: &[u8]) -> Option<(&[u8], &[u8], &[u8])> {
    let line = util::trim_start(line);
    let (pc, rest) = util::split_once_byte(line, b' ')?;
    let module_at = util::rfind_byte(rest, b' ').map(|at| at + 1).unwrap_or(0);
    let module = &rest[module_at..];
    // the module is always wrapped in parens
    if module.len() < 2 || module[0] != b'(' || module[module.len() - 1] != b')' {
        return None;
    }
    let module = &module[1..module.len() - 1];
    let rawfunc = match util::trim_end(&rest[..module_at]) {
        // Sometimes there are two spaces between the pc and the module, like:
        //     7f1e2215d058  (/lib/x86_64-linux-gnu/libc-2.15.so)
        // To match the Perl version, the rawfunc is " " in that case, not "".
        b"" => b" ",
        s => s,
    };
    Some((pc, rawfunc, module))
}

// converts java symbols like
//     Lorg/mozilla/javascript/MemberBox;.<init>(Ljava/lang/reflect/Method;)V
// into
//     org/mozilla/javascript/MemberBox:.init
fn tidy_java(func: &mut Vec<u8>) {
    if func.starts_with(b"L") && util::find_byte(func, b'/').is_some() {
        func.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(line: &str) -> Option<(String, String, String)> {
        event_line_parts(line.as_bytes()).map(|(comm, pid, tid)| {
            (
                String::from_utf8_lossy(comm).into_owned(),
                String::from_utf8_lossy(pid).into_owned(),
                String::from_utf8_lossy(tid).into_owned(),
            )
        })
    }

    #[test]
    fn event_line_shapes() {
        assert_eq!(
            parts("java 25607 4794564.109216: cycles:"),
            Some(("java".into(), "?".into(), "25607".into()))
        );
        assert_eq!(
            parts("java 24636/25607 [000] 4794564.109216: cycles:"),
            Some(("java".into(), "24636".into(), "25607".into()))
        );
        assert_eq!(
            parts("V8 WorkerThread 25607 4794564.109216: cycles:"),
            Some(("V8 WorkerThread".into(), "?".into(), "25607".into()))
        );
        assert_eq!(parts("no digits here"), None);
    }

    #[test]
    fn event_name_extraction() {
        let (_, event) = parse_event_line(b"vote   913    72.176760:     257597 cycles:uppp:").unwrap();
        assert_eq!(event, b"cycles:uppp");
        assert!(parse_event_line(b"app 1234 [000] 0.1: cycles").is_none());
    }

    #[test]
    fn stack_line_shapes() {
        let (pc, func, module) =
            stack_line_parts(b"\tffffffff8103ce3b native_safe_halt ([kernel.kallsyms])").unwrap();
        assert_eq!(pc, b"ffffffff8103ce3b");
        assert_eq!(func, b"native_safe_halt");
        assert_eq!(module, b"[kernel.kallsyms]");

        let (_, func, module) =
            stack_line_parts(b"\t7f1e2215d058  (/lib/x86_64-linux-gnu/libc-2.15.so)").unwrap();
        assert_eq!(func, b" ");
        assert_eq!(module, b"/lib/x86_64-linux-gnu/libc-2.15.so");

        assert!(stack_line_parts(b"\tdeadbeef not_a_module").is_none());
    }
}

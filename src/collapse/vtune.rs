use std::io;

use crate::collapse::util;
use crate::collapse::{Collapse, Occurrences, CAPACITY_LINE};
use crate::error::{Error, Result};

// The report must have been generated with these two columns first:
//     amplxe-cl -R top-down -call-stack-mode all \
//         -column="CPU Time:Self","Module" -format csv -csv-delimiter comma
static CSV_HEADER: &[u8] = b"\"Function Stack\",\"CPU Time:Self\"";

/// Settings that change how frames are named from the incoming stack traces.
///
/// All options default to off.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Don't include modules with function names.
    pub no_modules: bool,
}

/// A stack collapser for CSV reports from Intel VTune's `amplxe-cl` tool.
///
/// To construct one, either use `vtune::Folder::default()` or create an
/// [`Options`] and use `vtune::Folder::from(options)`.
#[derive(Debug, Default)]
pub struct Folder {
    /// Frames on the stack in this entry thus far, root first.
    stack: Vec<Vec<u8>>,

    /// Number of times each call stack has been seen.
    occurrences: Occurrences,

    /// Whether we have already warned about truncating fractional counts.
    stripped_fractional_samples: bool,

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

        // Consume the header.
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                warn!("File ended before header");
                return Ok(());
            }
            lineno += 1;
            if line.starts_with(CSV_HEADER) {
                break;
            }
        }

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            lineno += 1;

            let l = util::trim_end(&line);
            if l.is_empty() {
                continue;
            }
            self.on_line(l, lineno)?;
        }

        self.stack.clear();
        self.stripped_fractional_samples = false;
        self.occurrences.write_and_clear(writer)
    }

    fn is_applicable(&self, sample: &[u8]) -> bool {
        for line in sample.split(|&b| b == b'\n') {
            let line = util::trim(line);
            if !line.is_empty() {
                return line.starts_with(CSV_HEADER);
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
    // Lines are CSV records with the call depth encoded as leading spaces
    // inside the first cell:
    //
    //     "main","0.150","app"
    //     " helper","12.5","app"
    //     "  memcpy","0","libc.so.6"
    fn on_line(&mut self, line: &[u8], lineno: usize) -> Result<()> {
        let (function, time, module) = match line_parts(line) {
            Some(parts) => parts,
            None => {
                return Err(Error::malformed(
                    lineno,
                    format!("Unable to parse stack line: {}", String::from_utf8_lossy(line)),
                ));
            }
        };

        let depth = function.iter().take_while(|&&b| b == b' ').count();
        let name = &function[depth..];
        if name.is_empty() {
            return Err(Error::malformed(
                lineno,
                format!("Unable to parse stack line: {}", String::from_utf8_lossy(line)),
            ));
        }

        if depth > self.stack.len() {
            return Err(Error::malformed(
                lineno,
                format!(
                    "Skipped indentation level at line: {}",
                    String::from_utf8_lossy(line)
                ),
            ));
        }
        self.stack.truncate(depth);

        let micros = match util::parse_f64(time) {
            Some(micros) if micros >= 0.0 => micros,
            _ => {
                return Err(Error::malformed(
                    lineno,
                    format!(
                        "Invalid `CPU Time:Self` field: {}",
                        String::from_utf8_lossy(time)
                    ),
                ));
            }
        };

        let mut frame = Vec::with_capacity(name.len() + module.len() + 1);
        if !self.opt.no_modules && !module.is_empty() {
            frame.extend_from_slice(module);
            frame.push(b'`');
        }
        frame.extend_from_slice(name);
        for b in frame.iter_mut() {
            if *b == b';' {
                *b = b':';
            }
        }
        self.stack.push(frame);

        // Self time is fractional microseconds; the fraction is dropped.
        let count = micros as u64;
        if micros.fract() != 0.0 && !self.stripped_fractional_samples {
            self.stripped_fractional_samples = true;
            warn!(
                "The input data has fractional sample counts that will be truncated to integers"
            );
        }
        if count > 0 {
            let mut stack_str =
                Vec::with_capacity(self.stack.iter().map(|f| f.len() + 1).sum::<usize>());
            for (i, frame) in self.stack.iter().enumerate() {
                if i > 0 {
                    stack_str.push(b';');
                }
                stack_str.extend_from_slice(frame);
            }
            self.occurrences.add(&stack_str, count)?;
        }

        Ok(())
    }
}

// Splits a CSV record into (function, time, module). The time and module
// cells may or may not be quoted; the function cell always is.
fn line_parts(line: &[u8]) -> Option<(&[u8], &[u8], &[u8])> {
    let mut cells = CsvCells { rest: Some(line) };
    let function = cells.next()?;
    let time = cells.next()?;
    let module = cells.next().unwrap_or(b"");
    Some((function, time, module))
}

struct CsvCells<'a> {
    rest: Option<&'a [u8]>,
}

impl<'a> Iterator for CsvCells<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let rest = self.rest?;
        if let Some(inner) = rest.strip_prefix(b"\"") {
            // quoted cell: runs to the quote preceding a comma or the end
            let close = util::find_subslice(inner, b"\",").or_else(|| {
                if inner.ends_with(b"\"") {
                    Some(inner.len() - 1)
                } else {
                    None
                }
            })?;
            self.rest = inner.get(close + 2..);
            Some(&inner[..close])
        } else if rest.is_empty() {
            self.rest = None;
            None
        } else {
            match util::find_byte(rest, b',') {
                Some(comma) => {
                    self.rest = Some(&rest[comma + 1..]);
                    Some(&rest[..comma])
                }
                None => {
                    self.rest = None;
                    Some(rest)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_records_split() {
        let (function, time, module) = line_parts(b"\" helper\",\"12.5\",\"app\"").unwrap();
        assert_eq!(function, b" helper");
        assert_eq!(time, b"12.5");
        assert_eq!(module, b"app");

        let (function, time, module) = line_parts(b"\"main\",0.150,app").unwrap();
        assert_eq!(function, b"main");
        assert_eq!(time, b"0.150");
        assert_eq!(module, b"app");

        let (function, time, module) = line_parts(b"\"f,g\",\"7\"").unwrap();
        assert_eq!(function, b"f,g");
        assert_eq!(time, b"7");
        assert_eq!(module, b"");
    }
}

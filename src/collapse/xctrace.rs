use std::collections::BTreeMap;
use std::io;

use quick_xml::events::attributes::Attributes;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::collapse::util::fix_partially_demangled_rust_symbol;
use crate::collapse::{Collapse, Occurrences};
use crate::error::{Error, Result};

const ROW: &[u8] = b"row";
const BACKTRACE: &[u8] = b"backtrace";
const FRAME: &[u8] = b"frame";
const ID: &[u8] = b"id";
const REF: &[u8] = b"ref";
const NAME: &[u8] = b"name";
const SAMPLE_COUNT: &[u8] = b"sample-count";

/// A stack collapser for XML exported by `xctrace export`.
///
/// Backtraces and frames appear once with an `id` attribute and are referred
/// back to with `ref` attributes afterwards, so both are interned while the
/// document streams through.
#[derive(Debug, Default)]
pub struct Folder {
    /// Folded stack text for every backtrace id seen so far.
    backtraces: BTreeMap<u64, Vec<u8>>,

    /// Frame name for every frame id seen so far.
    frames: BTreeMap<u64, Vec<u8>>,

    /// Frames of the backtrace currently being read, leaf first.
    current_frames: Vec<Vec<u8>>,

    /// Id of the backtrace currently being read, if inside one.
    current_backtrace: Option<u64>,

    /// Weight of the row currently being read.
    row_weight: u64,

    /// Whether we are inside a `<row>` element.
    in_row: bool,

    /// Number of times each call stack has been seen.
    occurrences: Occurrences,
}

impl Collapse for Folder {
    fn collapse<R, W>(&mut self, reader: R, writer: W) -> Result<()>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let mut reader = Reader::from_reader(reader);
        let mut buf = Vec::new();
        loop {
            let offset = reader.buffer_position();
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(start)) => self.on_start(&start, offset)?,
                Ok(Event::Empty(empty)) => {
                    self.on_start(&empty, offset)?;
                    self.on_end(empty.name().into_inner(), offset)?;
                }
                Ok(Event::End(end)) => self.on_end(end.name().into_inner(), offset)?,
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(Error::malformed_at_byte(
                        offset,
                        format!("reading XML event failed: {}", e),
                    ));
                }
            }
            buf.clear();
        }

        self.occurrences.write_and_clear(writer)?;
        self.reset();
        Ok(())
    }

    fn is_applicable(&self, sample: &[u8]) -> bool {
        let mut lines = sample.split(|&b| b == b'\n');
        match lines.find(|line| !crate::collapse::util::is_blank(line)) {
            Some(line) => {
                crate::collapse::util::find_subslice(line, b"<?xml").is_some()
                    || line.starts_with(b"<trace-query-result")
            }
            None => false,
        }
    }
}

impl Folder {
    fn reset(&mut self) {
        self.backtraces.clear();
        self.frames.clear();
        self.current_frames.clear();
        self.current_backtrace = None;
        self.row_weight = 1;
        self.in_row = false;
    }

    fn on_start(&mut self, tag: &BytesStart<'_>, offset: usize) -> Result<()> {
        match tag.name().into_inner() {
            ROW => {
                self.in_row = true;
                self.row_weight = match attribute(&tag.attributes(), SAMPLE_COUNT) {
                    Some(value) => parse_u64_attribute(&value, SAMPLE_COUNT, offset)?,
                    None => 1,
                };
            }
            BACKTRACE if self.in_row => {
                let attributes = tag.attributes();
                if let Some(ref_id) = attribute(&attributes, REF) {
                    let ref_id = parse_u64_attribute(&ref_id, REF, offset)?;
                    let folded = self.backtraces.get(&ref_id).ok_or_else(|| {
                        Error::malformed_at_byte(
                            offset,
                            format!("invalid backtrace ref id: {}", ref_id),
                        )
                    })?;
                    if !folded.is_empty() {
                        let weight = self.row_weight;
                        // interned stacks are already folded text
                        let folded = folded.clone();
                        self.occurrences.add(&folded, weight)?;
                    }
                } else if let Some(id) = attribute(&attributes, ID) {
                    let id = parse_u64_attribute(&id, ID, offset)?;
                    self.current_backtrace = Some(id);
                    self.current_frames.clear();
                } else {
                    return Err(Error::malformed_at_byte(
                        offset,
                        "backtrace without id or ref attribute",
                    ));
                }
            }
            FRAME if self.current_backtrace.is_some() => {
                let attributes = tag.attributes();
                if let Some(ref_id) = attribute(&attributes, REF) {
                    let ref_id = parse_u64_attribute(&ref_id, REF, offset)?;
                    let name = self.frames.get(&ref_id).ok_or_else(|| {
                        Error::malformed_at_byte(offset, format!("invalid frame ref id: {}", ref_id))
                    })?;
                    self.current_frames.push(name.clone());
                } else {
                    let id = match attribute(&attributes, ID) {
                        Some(id) => parse_u64_attribute(&id, ID, offset)?,
                        None => {
                            return Err(Error::malformed_at_byte(
                                offset,
                                "frame without id or ref attribute",
                            ));
                        }
                    };
                    let name = match attribute(&attributes, NAME) {
                        Some(name) => frame_name(&name, offset)?,
                        None => {
                            return Err(Error::malformed_at_byte(
                                offset,
                                format!("no name found for frame {}", id),
                            ));
                        }
                    };
                    self.frames.insert(id, name.clone());
                    self.current_frames.push(name);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn on_end(&mut self, name: &[u8], _offset: usize) -> Result<()> {
        match name {
            ROW => {
                self.in_row = false;
                self.row_weight = 1;
            }
            BACKTRACE => {
                if let Some(id) = self.current_backtrace.take() {
                    // frames are leaf first in the document; fold root first
                    let mut folded = Vec::new();
                    for frame in self.current_frames.drain(..).rev() {
                        if !folded.is_empty() {
                            folded.push(b';');
                        }
                        folded.extend_from_slice(&frame);
                    }
                    if !folded.is_empty() {
                        self.occurrences.add(&folded, self.row_weight)?;
                    }
                    self.backtraces.insert(id, folded);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn attribute(attributes: &Attributes<'_>, key: &[u8]) -> Option<Vec<u8>> {
    attributes
        .clone()
        .filter_map(|a| a.ok())
        .find(|a| a.key.into_inner() == key)
        .map(|a| a.value.into_owned())
}

fn parse_u64_attribute(value: &[u8], key: &[u8], offset: usize) -> Result<u64> {
    crate::collapse::util::parse_u64(value).ok_or_else(|| {
        Error::malformed_at_byte(
            offset,
            format!(
                "unrecognized {} attribute: {}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(value)
            ),
        )
    })
}

// Frame names arrive XML-escaped; decode entities and repair Rust symbols
// that Instruments half-demangles.
fn frame_name(raw: &[u8], offset: usize) -> Result<Vec<u8>> {
    let text = String::from_utf8_lossy(raw);
    let unescaped = quick_xml::escape::unescape(&text).map_err(|e| {
        Error::malformed_at_byte(offset, format!("invalid xml text in frame name: {:?}", e))
    })?;
    let fixed = fix_partially_demangled_rust_symbol(&unescaped);
    let mut name: Vec<u8> = fixed.as_bytes().to_vec();
    for b in name.iter_mut() {
        if *b == b';' {
            *b = b':';
        }
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collapse::Collapse;

    fn collapse(input: &str) -> String {
        let mut folder = Folder::default();
        let mut out = Vec::new();
        folder.collapse(input.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn backtraces_are_reversed_and_refs_resolved() {
        let input = r#"<?xml version="1.0"?>
<trace-query-result>
<node>
<row><backtrace id="1"><frame id="10" name="leaf"/><frame id="11" name="main"/></backtrace></row>
<row><backtrace ref="1"/></row>
</node>
</trace-query-result>"#;
        assert_eq!(collapse(input), "main;leaf 2\n");
    }

    #[test]
    fn sample_count_attribute_weights_rows() {
        let input = r#"<?xml version="1.0"?>
<trace-query-result>
<node>
<row sample-count="3"><backtrace id="1"><frame id="10" name="f &amp; g"/></backtrace></row>
</node>
</trace-query-result>"#;
        assert_eq!(collapse(input), "f & g 3\n");
    }

    #[test]
    fn dangling_ref_is_fatal() {
        let input = r#"<trace-query-result><node><row><backtrace ref="7"/></node></trace-query-result>"#;
        let mut folder = Folder::default();
        let err = folder.collapse(input.as_bytes(), io::sink()).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }
}

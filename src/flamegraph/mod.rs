mod svg;
mod tree;

/// Palette resolution and per-frame color derivation.
pub mod color;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use num_format::{Locale, ToFormattedString};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use str_stack::StrStack;

pub use color::{BackgroundColor, BasicPalette, Palette, SemanticPalette};

use crate::error::{Error, Result};
use svg::{Dimension, StyleOptions, TextArgument, TextItem};
use tree::{BuildOptions, FrameTree};

const XPAD: usize = 10; // pad left and right
const FRAMEPAD: usize = 1; // vertical padding for frames
const DEFAULT_IMAGE_WIDTH: usize = 1200;

/// The default title of the graph.
pub const DEFAULT_TITLE: &str = "Flame Graph";

/// The title used instead when the graph is inverted.
pub const DEFAULT_TITLE_INVERTED: &str = "Icicle Graph";

/// Which way the graph grows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Stacks grow upwards: the root is at the bottom. This is a flame graph.
    Straight,
    /// Stacks grow downwards: the root is at the top. This is an icicle
    /// graph.
    Inverted,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Straight
    }
}

/// Which side of a too-long function name survives truncation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextTruncateDirection {
    /// Keep the leftmost characters.
    Right,
    /// Keep the rightmost characters; usually the identifying part.
    Left,
}

impl Default for TextTruncateDirection {
    fn default() -> Self {
        TextTruncateDirection::Left
    }
}

/// Configure the flame graph.
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    /// The color palette to use when plotting.
    pub colors: Palette,

    /// The background color for the plot; defaults to a per-palette choice.
    pub bgcolors: Option<BackgroundColor>,

    /// Choose names based on the hashes of function names, weighting early
    /// characters. The same function will then have the same color in every
    /// graph.
    pub hash: bool,

    /// Derive colors from an FNV hash of the whole function name. Like
    /// [`hash`](Options::hash), but names that share a prefix still get
    /// clearly distinct colors.
    pub deterministic: bool,

    /// Spread the palette along the x axis instead of varying it randomly.
    pub color_diffusion: bool,

    /// The title for the flame graph.
    pub title: String,

    /// The subtitle for the flame graph, if any.
    pub subtitle: Option<String>,

    /// Free-form notes embedded in a comment of the SVG.
    pub notes: String,

    /// Whether the graph should grow up (flame) or down (icicle).
    pub direction: Direction,

    /// The width of the image in pixels. When unset the image is fluid and
    /// fills its viewport.
    pub image_width: Option<usize>,

    /// The height of each frame in pixels.
    pub frame_height: usize,

    /// The pixel width below which a frame is elided from the output.
    pub min_width: f64,

    /// The font used for all text.
    pub font_type: String,

    /// The font size used for all text.
    pub font_size: usize,

    /// Average font character width relative to the font size; used to
    /// decide how many characters of a name fit in its frame.
    pub font_width: f64,

    /// The unit word used in tooltips, e.g. "samples" or "bytes".
    pub count_name: String,

    /// The label prefix shown in the details bar, e.g. "Function:".
    pub name_type: String,

    /// Multiply every sample count by this factor.
    pub factor: f64,

    /// Swap the red/blue hues of a differential graph, for when the inputs
    /// were passed in the opposite order.
    pub negate_differentials: bool,

    /// Keep the input's line order and only merge adjacent identical
    /// frames, producing a flame chart rather than a flame graph.
    pub flame_chart: bool,

    /// Reverse each stack before building the graph, merging on leaves
    /// instead of roots.
    pub reverse_stack_order: bool,

    /// The CSS color used to highlight search hits.
    pub search_color: String,

    /// A search term armed when the image loads.
    pub search_term: Option<String>,

    /// The CSS color of the search, zoom, and match UI text.
    pub ui_color: String,

    /// An optional CSS color for frame outlines.
    pub stroke_color: Option<String>,

    /// Which end of a name to keep when it does not fit its frame.
    pub text_truncate_direction: TextTruncateDirection,

    /// Leave out the interactive script. Only really useful for tests that
    /// compare output files.
    pub no_javascript: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            colors: Palette::default(),
            bgcolors: None,
            hash: false,
            deterministic: false,
            color_diffusion: false,
            title: DEFAULT_TITLE.to_string(),
            subtitle: None,
            notes: String::new(),
            direction: Direction::default(),
            image_width: None,
            frame_height: 16,
            min_width: 0.1,
            font_type: "Verdana".to_string(),
            font_size: 12,
            font_width: 0.59,
            count_name: "samples".to_string(),
            name_type: "Function:".to_string(),
            factor: 1.0,
            negate_differentials: false,
            flame_chart: false,
            reverse_stack_order: false,
            search_color: "rgb(230,0,230)".to_string(),
            search_term: None,
            ui_color: "rgb(0,0,0)".to_string(),
            stroke_color: None,
            text_truncate_direction: TextTruncateDirection::default(),
            no_javascript: false,
        }
    }
}

impl Options {
    fn validate(&self) -> Result<()> {
        if self.min_width < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "min_width must not be negative, got {}",
                self.min_width
            )));
        }
        if self.image_width == Some(0) {
            return Err(Error::InvalidConfig("image_width must not be 0".into()));
        }
        if self.frame_height == 0 {
            return Err(Error::InvalidConfig("frame_height must not be 0".into()));
        }
        if !(self.factor > 0.0 && self.factor.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "factor must be a positive number, got {}",
                self.factor
            )));
        }
        if !(self.font_width > 0.0 && self.font_width.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "font_width must be a positive number, got {}",
                self.font_width
            )));
        }
        Ok(())
    }

    pub(super) fn effective_image_width(&self) -> usize {
        self.image_width.unwrap_or(DEFAULT_IMAGE_WIDTH)
    }

    // top padding: room for the title, and the subtitle if there is one
    pub(super) fn ypad1(&self) -> usize {
        if self.subtitle.is_some() {
            self.font_size * 5
        } else {
            self.font_size * 3
        }
    }

    // bottom padding: room for the details bar
    pub(super) fn ypad2(&self) -> usize {
        self.font_size * 2 + 10
    }
}

/// Produce a flame graph from an iterator over folded stack lines.
///
/// Each line is `frame1;frame2;…;frameN count`, or with a second trailing
/// count for differential input. Sibling frames are drawn in order of first
/// appearance, so the input's line order is visible in the output (and is
/// what [`Options::flame_chart`] relies on).
pub fn from_lines<'a, I, W>(opt: &Options, lines: I, writer: W) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
    W: Write,
{
    opt.validate()?;

    let build = BuildOptions {
        factor: opt.factor,
        reverse_stack_order: opt.reverse_stack_order,
        flame_chart: opt.flame_chart,
    };
    let (tree, ignored) = FrameTree::from_lines(lines, &build)?;
    if ignored > 0 {
        warn!("Ignored {} lines with invalid format", ignored);
    }

    let total = tree.total();
    if total == 0 {
        error!("No stack counts found");
        return Err(Error::EmptyProfile);
    }

    let image_width = opt.effective_image_width() as f64;
    let drawable_width = image_width - (2 * XPAD) as f64;
    let width_per_unit = drawable_width / total as f64;
    let min_units = opt.min_width / width_per_unit;

    let (frames, depthmax) = tree.frames(min_units);
    let max_abs_delta = tree.max_abs_delta();

    let imageheight = (depthmax + 1) * opt.frame_height + opt.ypad1() + opt.ypad2();

    let mut svg_writer = Writer::new(writer);
    svg::write_header(&mut svg_writer, imageheight, opt)?;
    let (bgcolor1, bgcolor2) = color::bgcolor_for(opt.bgcolors, opt.colors);
    svg::write_prelude(
        &mut svg_writer,
        &StyleOptions {
            imageheight,
            bgcolor1,
            bgcolor2,
        },
        opt,
    )?;

    svg_writer.write_event(Event::Start(BytesStart::new("svg").with_attributes(vec![
        ("id", "frames"),
        ("x", &*format!("{}", XPAD)),
        ("width", &*format!("{}", drawable_width as usize)),
        ("total_samples", &*format!("{}", total)),
    ])))?;

    let color_mode = if opt.deterministic {
        color::ColorMode::Deterministic
    } else if opt.hash {
        color::ColorMode::Hash
    } else {
        color::ColorMode::Random
    };
    let mut rng = color::Lcg::new();

    let mut buffer = StrStack::new();
    for frame in frames {
        let x_pct = 100.0 * frame.x as f64 / total as f64;
        let width_pct = 100.0 * frame.width as f64 / total as f64;
        let x_px = frame.x as f64 * width_per_unit;
        let width_px = frame.width as f64 * width_per_unit;

        let (y1, y2) = match opt.direction {
            Direction::Straight => {
                let y1 = imageheight
                    - opt.ypad2()
                    - (frame.depth + 1) * opt.frame_height
                    + FRAMEPAD;
                let y2 = imageheight - opt.ypad2() - frame.depth * opt.frame_height;
                (y1, y2)
            }
            Direction::Inverted => {
                let y1 = opt.ypad1() + frame.depth * opt.frame_height;
                let y2 = opt.ypad1() + (frame.depth + 1) * opt.frame_height - FRAMEPAD;
                (y1, y2)
            }
        };

        // add thousands separators to the sample count
        let samples_txt = frame.width.to_formatted_string(&Locale::en);

        let is_root = frame.depth == 0 && frame.name.is_empty();
        let function = deannotate(frame.name);
        let info = if is_root {
            write!(buffer, "all ({} {}, 100%)", samples_txt, opt.count_name)
        } else {
            let pct = 100.0 * frame.width as f64 / total as f64;
            if tree.is_diff {
                write!(
                    buffer,
                    "{} ({} {}, {:.2}%; {:+})",
                    function, samples_txt, opt.count_name, pct, frame.delta,
                )
            } else {
                write!(
                    buffer,
                    "{} ({} {}, {:.2}%)",
                    function, samples_txt, opt.count_name, pct,
                )
            }
        };

        svg_writer.write_event(Event::Start(
            BytesStart::new("g").with_attributes(vec![
                ("class", "func_g"),
                ("onmouseover", "s(this)"),
                ("onmouseout", "c()"),
                ("onclick", "zoom(this)"),
            ]),
        ))?;

        svg_writer.write_event(Event::Start(BytesStart::new("title")))?;
        svg_writer.write_event(Event::Text(BytesText::new(&buffer[info])))?;
        svg_writer.write_event(Event::End(BytesEnd::new("title")))?;

        let (r, g, b) = if frame.name == "--" {
            color::VDGREY
        } else if frame.name == "-" {
            color::DGREY
        } else if tree.is_diff {
            let delta = if opt.negate_differentials {
                -frame.delta
            } else {
                frame.delta
            };
            color::color_scale(delta, max_abs_delta)
        } else if opt.color_diffusion {
            color::color_diffusion(opt.colors, frame.name, x_pct + width_pct / 2.0)
        } else {
            color::color(opt.colors, color_mode, frame.name, &mut rng)
        };
        let fill = write!(buffer, "rgb({},{},{})", r, g, b);

        let rect_x = if opt.image_width.is_some() {
            write!(buffer, "{:.2}", x_px + XPAD as f64)
        } else {
            write!(buffer, "{:.4}%", x_pct)
        };
        let rect_width = if opt.image_width.is_some() {
            write!(buffer, "{:.2}", width_px)
        } else {
            write!(buffer, "{:.4}%", width_pct)
        };
        let y = write!(buffer, "{}", y1);
        let height = write!(buffer, "{}", y2 - y1);
        svg_writer.write_event(Event::Empty(
            BytesStart::new("rect").with_attributes(vec![
                ("x", &buffer[rect_x]),
                ("y", &buffer[y]),
                ("width", &buffer[rect_width]),
                ("height", &buffer[height]),
                ("fill", &buffer[fill]),
            ]),
        ))?;

        // only write out the name if it fits
        let fitchars = (width_px / (opt.font_size as f64 * opt.font_width)).trunc() as usize;
        let text: TextArgument<'_> = if fitchars >= 3 {
            // room for one char plus two dots
            let nchars = function.chars().count();
            if nchars < fitchars {
                function.into()
            } else {
                let mut w = buffer.writer();
                use std::fmt::Write as _;
                match opt.text_truncate_direction {
                    TextTruncateDirection::Right => {
                        for c in function.chars().take(fitchars - 2) {
                            w.write_char(c).expect("writing to buffer shouldn't fail");
                        }
                        w.write_str("..").expect("writing to buffer shouldn't fail");
                    }
                    TextTruncateDirection::Left => {
                        w.write_str("..").expect("writing to buffer shouldn't fail");
                        for c in function.chars().skip(nchars - (fitchars - 2)) {
                            w.write_char(c).expect("writing to buffer shouldn't fail");
                        }
                    }
                }
                w.finish().into()
            }
        } else {
            // don't show the function name
            "".into()
        };

        let text_x = if opt.image_width.is_some() {
            Dimension::Pixels(x_px + XPAD as f64 + 3.0)
        } else {
            Dimension::Percent(x_pct + 100.0 * 3.0 / drawable_width)
        };
        svg::write_str(
            &mut svg_writer,
            &mut buffer,
            TextItem {
                x: text_x,
                y: 3.0 + (y1 + y2) as f64 / 2.0,
                text,
                extra: std::iter::empty::<(&str, &str)>(),
            },
        )?;

        buffer.clear();
        svg_writer.write_event(Event::End(BytesEnd::new("g")))?;
    }

    svg_writer.write_event(Event::End(BytesEnd::new("svg")))?;
    svg_writer.write_event(Event::End(BytesEnd::new("svg")))?;
    svg_writer.write_event(Event::Eof)?;
    Ok(())
}

/// Produce a flame graph from a reader of folded stack lines.
///
/// See [`from_lines`] for the expected format.
pub fn from_reader<R, W>(opt: &Options, mut reader: R, writer: W) -> Result<()>
where
    R: Read,
    W: Write,
{
    let mut input = String::new();
    reader.read_to_string(&mut input)?;
    from_lines(opt, input.lines(), writer)
}

/// Produce a flame graph from files of folded stack lines, or from STDIN if
/// `infiles` is empty.
///
/// See [`from_lines`] for the expected format.
pub fn from_files<W>(opt: &Options, infiles: &[std::path::PathBuf], writer: W) -> Result<()>
where
    W: Write,
{
    if infiles.is_empty() {
        let stdin = io::stdin();
        let r = io::BufReader::with_capacity(128 * 1024, stdin.lock());
        return from_reader(opt, r, writer);
    }

    let mut input = String::new();
    for infile in infiles {
        read_to_string(infile, &mut input)?;
    }
    from_lines(opt, input.lines(), writer)
}

fn read_to_string(path: &Path, input: &mut String) -> Result<()> {
    let mut file = File::open(path)?;
    file.read_to_string(input)?;
    Ok(())
}

// Strip a `_[k]`-style annotation for display purposes.
fn deannotate(f: &str) -> &str {
    if f.ends_with(']') {
        if let Some(ai) = f.rfind("_[") {
            if f[ai..].len() == 4 && "kwij".contains(&f[ai + 2..ai + 3]) {
                return &f[..ai];
            }
        }
    }
    f
}

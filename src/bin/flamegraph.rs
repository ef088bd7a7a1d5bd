use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process;
use std::str::FromStr;

use env_logger::Env;
use structopt::StructOpt;

use cinder::collapse::{dtrace, folded, guess, perf, recursive, sample, vtune, xctrace, Collapse};
use cinder::flamegraph::{
    self, BackgroundColor, Direction, Options, Palette, TextTruncateDirection, DEFAULT_TITLE,
    DEFAULT_TITLE_INVERTED,
};

#[derive(Clone, Copy, Debug)]
enum InputFormat {
    Perf,
    Dtrace,
    Sample,
    Vtune,
    Xctrace,
    Recursive,
    Folded,
    Guess,
}

impl FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "perf" => Ok(InputFormat::Perf),
            "dtrace" => Ok(InputFormat::Dtrace),
            "sample" => Ok(InputFormat::Sample),
            "vtune" => Ok(InputFormat::Vtune),
            "xctrace" => Ok(InputFormat::Xctrace),
            "recursive" => Ok(InputFormat::Recursive),
            "folded" => Ok(InputFormat::Folded),
            "guess" => Ok(InputFormat::Guess),
            unknown => Err(format!("unknown input format: {}", unknown)),
        }
    }
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "flamegraph",
    about = "\
Collapses the output of a stack-sampling profiler and renders it as an
interactive flame graph SVG on standard output.",
    after_help = "\
The input format is sniffed by default; pass --format to pin it down.
Already-folded input (`frame1;frame2;…;frameN count` lines) is accepted too,
so this can be used as a plain plotter. Open the resulting SVG in a web
browser for interactivity: mouse-over frames for info, click to zoom, and
ctrl-F to search."
)]
struct Opt {
    // ************* //
    // *** FLAGS *** //
    // ************* //
    /// Colors are keyed by the hash of the function name
    #[structopt(long = "hash")]
    hash: bool,

    /// Colors are derived deterministically from the full function name
    #[structopt(long = "cp")]
    cp: bool,

    /// Spread the palette across the x axis instead of varying it randomly
    #[structopt(long = "colordiffusion")]
    color_diffusion: bool,

    /// Plot the flame graph up-side-down
    #[structopt(short = "i", long = "inverted")]
    inverted: bool,

    /// Produce a flame chart (input line order kept, stacks not merged)
    #[structopt(long = "flamechart")]
    flamechart: bool,

    /// Reverse stack order, merging on leaves instead of roots
    #[structopt(long = "reverse")]
    reverse: bool,

    /// Switch differential hues (blue<->red)
    #[structopt(long = "negate")]
    negate: bool,

    /// Truncate long function names from the left, keeping the beginning
    #[structopt(long = "truncate-text-right")]
    truncate_text_right: bool,

    /// Don't include the interactive JavaScript in the SVG
    #[structopt(long = "no-javascript", hidden = true)]
    no_javascript: bool,

    /// Silence all log output
    #[structopt(short = "q", long = "quiet")]
    quiet: bool,

    /// Verbose logging mode (-v, -vv, -vvv)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: usize,

    // *************** //
    // *** OPTIONS *** //
    // *************** //
    /// Input format; guessed from the input by default
    #[structopt(
        long = "format",
        value_name = "FORMAT",
        default_value = "guess",
        possible_values = &["perf", "dtrace", "sample", "vtune", "xctrace", "recursive", "folded", "guess"]
    )]
    format: InputFormat,

    /// Write the SVG here instead of to standard output
    #[structopt(short = "o", long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Set color palette
    #[structopt(
        short = "c",
        long = "colors",
        value_name = "PALETTE",
        default_value = "hot",
        possible_values = &["hot", "mem", "io", "red", "green", "blue", "aqua", "yellow", "purple", "orange", "java", "js", "perl", "python", "rust", "wakeup"]
    )]
    colors: Palette,

    /// Set background colors: yellow, blue, green, grey, or flat "#rrggbb"
    #[structopt(long = "bgcolors", value_name = "COLOR")]
    bgcolors: Option<BackgroundColor>,

    /// Change title text
    #[structopt(long = "title", value_name = "TEXT")]
    title: Option<String>,

    /// Second level title
    #[structopt(long = "subtitle", value_name = "TEXT")]
    subtitle: Option<String>,

    /// Set embedded notes in the SVG
    #[structopt(long = "notes", value_name = "TEXT", default_value = "")]
    notes: String,

    /// Count type label
    #[structopt(long = "countname", value_name = "NAME", default_value = "samples")]
    count_name: String,

    /// Name type label
    #[structopt(long = "nametype", value_name = "NAME", default_value = "Function:")]
    name_type: String,

    /// Width of the image; the image is fluid if not given
    #[structopt(long = "width", value_name = "PIXELS")]
    image_width: Option<usize>,

    /// Height of each frame
    #[structopt(long = "height", value_name = "PIXELS", default_value = "16")]
    frame_height: usize,

    /// Omit functions smaller than this
    #[structopt(long = "minwidth", value_name = "PIXELS", default_value = "0.1")]
    min_width: f64,

    /// Font type
    #[structopt(long = "fonttype", value_name = "FONT", default_value = "Verdana")]
    font_type: String,

    /// Font size
    #[structopt(long = "fontsize", value_name = "SIZE", default_value = "12")]
    font_size: usize,

    /// Font width relative to the font size
    #[structopt(long = "fontwidth", value_name = "WIDTH", default_value = "0.59")]
    font_width: f64,

    /// Factor to scale sample counts by
    #[structopt(long = "factor", value_name = "FACTOR", default_value = "1.0")]
    factor: f64,

    /// Arm this search term when the image loads
    #[structopt(long = "search", value_name = "TERM")]
    search: Option<String>,

    /// Color for search highlights
    #[structopt(
        long = "searchcolor",
        value_name = "COLOR",
        default_value = "rgb(230,0,230)"
    )]
    search_color: String,

    /// Color for the search, zoom, and match UI text
    #[structopt(long = "uicolor", value_name = "COLOR", default_value = "rgb(0,0,0)")]
    ui_color: String,

    /// Outline frames with this color
    #[structopt(long = "strokecolor", value_name = "COLOR")]
    stroke_color: Option<String>,

    // ************ //
    // *** ARGS *** //
    // ************ //
    /// Profiler output to process, or STDIN if absent or "-"
    #[structopt(value_name = "INPUT")]
    infile: Option<PathBuf>,
}

impl Opt {
    fn into_parts(self) -> (InputFormat, Option<PathBuf>, Option<PathBuf>, Options) {
        let title = match self.title {
            Some(title) => title,
            None if self.flamechart => "Flame Chart".to_string(),
            None if self.inverted => DEFAULT_TITLE_INVERTED.to_string(),
            None => DEFAULT_TITLE.to_string(),
        };
        let options = Options {
            colors: self.colors,
            bgcolors: self.bgcolors,
            hash: self.hash,
            deterministic: self.cp,
            color_diffusion: self.color_diffusion,
            title,
            subtitle: self.subtitle,
            notes: self.notes,
            direction: if self.inverted {
                Direction::Inverted
            } else {
                Direction::Straight
            },
            image_width: self.image_width,
            frame_height: self.frame_height,
            min_width: self.min_width,
            font_type: self.font_type,
            font_size: self.font_size,
            font_width: self.font_width,
            count_name: self.count_name,
            name_type: self.name_type,
            factor: self.factor,
            negate_differentials: self.negate,
            flame_chart: self.flamechart,
            reverse_stack_order: self.reverse,
            search_color: self.search_color,
            search_term: self.search,
            ui_color: self.ui_color,
            stroke_color: self.stroke_color,
            text_truncate_direction: if self.truncate_text_right {
                TextTruncateDirection::Right
            } else {
                TextTruncateDirection::Left
            },
            no_javascript: self.no_javascript,
        };
        let infile = self.infile.filter(|f| f.as_os_str() != "-");
        (self.format, infile, self.output, options)
    }
}

fn main() {
    let opt = match Opt::from_iter_safe(std::env::args_os()) {
        Ok(opt) => opt,
        Err(e) if e.use_stderr() => {
            eprintln!("{}", e.message);
            process::exit(2);
        }
        // --help and --version go to stdout and exit successfully
        Err(e) => e.exit(),
    };

    // Initialize logger
    if !opt.quiet {
        env_logger::Builder::from_env(Env::default().default_filter_or(match opt.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }))
        .format_timestamp(None)
        .init();
    }

    if let Err(e) = run(opt) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(opt: Opt) -> cinder::Result<()> {
    let (format, infile, outfile, options) = opt.into_parts();

    // A flame chart needs the input's line order, which the occurrence
    // table would destroy; feed folded input straight to the renderer.
    let folded = if options.flame_chart {
        let mut raw = Vec::new();
        match infile {
            Some(ref path) => {
                File::open(path)?.read_to_end(&mut raw)?;
            }
            None => {
                io::stdin().lock().read_to_end(&mut raw)?;
            }
        }
        raw
    } else {
        collapse(format, infile.as_ref())?
    };

    // Render into memory so a failed render doesn't leave a partial SVG
    // behind.
    let mut svg = Vec::new();
    let folded = String::from_utf8_lossy(&folded);
    flamegraph::from_lines(&options, folded.lines(), &mut svg)?;

    match outfile {
        Some(ref path) => {
            let mut file = BufWriter::new(File::create(path)?);
            file.write_all(&svg)?;
            file.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut stdout = stdout.lock();
            stdout.write_all(&svg)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn collapse(format: InputFormat, infile: Option<&PathBuf>) -> cinder::Result<Vec<u8>> {
    let mut folded = Vec::new();
    match format {
        InputFormat::Perf => {
            perf::Folder::default().collapse_file(infile, &mut folded)?;
        }
        InputFormat::Dtrace => {
            dtrace::Folder::default().collapse_file(infile, &mut folded)?;
        }
        InputFormat::Sample => {
            sample::Folder::default().collapse_file(infile, &mut folded)?;
        }
        InputFormat::Vtune => {
            vtune::Folder::default().collapse_file(infile, &mut folded)?;
        }
        InputFormat::Xctrace => {
            xctrace::Folder::default().collapse_file(infile, &mut folded)?;
        }
        InputFormat::Recursive => {
            recursive::Folder::default().collapse_file(infile, &mut folded)?;
        }
        InputFormat::Folded => {
            folded::Folder::default().collapse_file(infile, &mut folded)?;
        }
        InputFormat::Guess => {
            guess::Folder::default().collapse_file(infile, &mut folded)?;
        }
    }
    Ok(folded)
}

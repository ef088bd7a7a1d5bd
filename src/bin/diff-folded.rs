use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process;

use env_logger::Env;
use structopt::StructOpt;

use cinder::differential::{self, Options};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "diff-folded",
    about = "\
Joins two folded profiles taken before and after a change into the
three-column folded format that flamegraph colors by delta.",
    after_help = "\
Feed the output to flamegraph to render a differential flame graph:

    diff-folded before.folded after.folded | flamegraph > diff.svg

Frames that got slower are drawn red, frames that got faster blue."
)]
struct Opt {
    /// Scale the first profile's counts to match the second's total
    #[structopt(short = "n", long = "normalize")]
    normalize: bool,

    /// Replace hex addresses like "0x45ef2173" with "0x..."
    #[structopt(short = "s", long = "strip-hex")]
    strip_hex: bool,

    /// Write the output here instead of to standard output
    #[structopt(short = "o", long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Silence all log output
    #[structopt(short = "q", long = "quiet")]
    quiet: bool,

    /// Verbose logging mode (-v, -vv, -vvv)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: usize,

    /// Folded profile taken before the change
    #[structopt(value_name = "BEFORE_FILE")]
    infile1: PathBuf,

    /// Folded profile taken after the change
    #[structopt(value_name = "AFTER_FILE")]
    infile2: PathBuf,
}

impl Opt {
    fn into_parts(self) -> (PathBuf, PathBuf, Option<PathBuf>, Options) {
        (
            self.infile1,
            self.infile2,
            self.output,
            Options {
                normalize: self.normalize,
                strip_hex: self.strip_hex,
            },
        )
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
    let (folded1, folded2, outfile, options) = opt.into_parts();

    match outfile {
        Some(ref path) => {
            let mut file = BufWriter::new(File::create(path)?);
            differential::from_files(&options, folded1, folded2, &mut file)?;
            file.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut stdout = stdout.lock();
            differential::from_files(&options, folded1, folded2, &mut stdout)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

//! Cinder turns the output of stack-sampling profilers into [flame graphs].
//!
//! Like the original Perl [flamegraph toolkit], it is split into two stages:
//! *collapsing* and *plotting*. Collapsing takes the raw, repetitive output of
//! a profiler (such as `perf script` or DTrace's `ustack()`) and folds every
//! observed call stack into a single line of the form
//! `frame1;frame2;…;frameN count`, merging duplicate stacks along the way.
//! Plotting takes those folded lines and renders a self-contained, interactive
//! SVG image in which the width of each frame is proportional to how often it
//! was on-CPU.
//!
//! # Command-line use
//!
//! The `flamegraph` binary runs the whole pipeline. It sniffs the input
//! format by default, so for most profilers this is all you need:
//!
//! ```console
//! $ perf record --call-graph dwarf target/release/mybin
//! $ perf script | flamegraph > profile.svg
//! ```
//!
//! Already-folded input is recognized too, so the binary can also be used as
//! a plain plotter. The `diff-folded` binary joins two folded profiles taken
//! before and after a change into the three-column differential format that
//! the plotter colors by delta.
//!
//! # Programmatic use
//!
//! Each profiler format has a collapser in [`collapse`] implementing the
//! [`collapse::Collapse`] trait; the plotter lives in [`flamegraph`]; and the
//! differential merger in [`differential`]. All of them are plain
//! reader-to-writer pipes with no shared state, so independent invocations
//! can run concurrently as long as each owns its own readers and writers.
//!
//!   [flame graphs]: http://www.brendangregg.com/flamegraphs.html
//!   [flamegraph toolkit]: https://github.com/brendangregg/FlameGraph

#![deny(missing_docs)]

#[macro_use]
extern crate log;

mod error;

pub use error::{Error, Result};

/// Stack collapsing for various profiler output formats.
pub mod collapse;

/// Merging two folded profiles into differential flame graph input.
pub mod differential;

/// Rendering folded stacks as an interactive SVG flame graph.
pub mod flamegraph;

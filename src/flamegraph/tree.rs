use crate::error::{Error, Result};

/// The prefix tree of frames built from folded input.
///
/// Nodes live in one index-addressed arena; children are indices, in order
/// of first appearance in the input. The root is a synthetic node with an
/// empty name whose value is the total weight of the profile.
#[derive(Debug)]
pub(super) struct FrameTree {
    nodes: Vec<Node>,

    /// Whether the input had two count columns per line.
    pub(super) is_diff: bool,
}

#[derive(Debug)]
struct Node {
    name: String,

    /// Aggregate weight of every stack passing through this node.
    value: u64,

    /// The "before" profile's weight when the input is differential;
    /// equal to `value` otherwise.
    before: u64,

    children: Vec<usize>,
}

impl Node {
    fn new(name: &str) -> Self {
        Node {
            name: name.to_string(),
            value: 0,
            before: 0,
            children: Vec::new(),
        }
    }
}

/// How to turn folded lines into a tree.
#[derive(Clone, Copy, Debug)]
pub(super) struct BuildOptions {
    /// Scale factor applied to every count.
    pub(super) factor: f64,

    /// Reverse the order of each stack's frames before insertion.
    pub(super) reverse_stack_order: bool,

    /// Only merge a frame into the most recently inserted sibling, keeping
    /// the input's time order intact.
    pub(super) flame_chart: bool,
}

/// One drawable rectangle, in sample-count units.
#[derive(Debug, PartialEq)]
pub(super) struct FrameRect<'a> {
    pub(super) name: &'a str,
    pub(super) depth: usize,
    pub(super) x: u64,
    pub(super) width: u64,
    pub(super) delta: i64,
}

impl FrameTree {
    /// Builds a tree from folded lines, returning it along with the number
    /// of lines that were ignored because they did not parse.
    pub(super) fn from_lines<'a, I>(lines: I, opt: &BuildOptions) -> Result<(FrameTree, usize)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut tree = FrameTree {
            nodes: vec![Node::new("")],
            is_diff: false,
        };
        let mut ignored = 0;
        let mut stripped_fractional_samples = false;
        let mut path: Vec<&str> = Vec::new();

        for line in lines {
            let mut line = line.trim();
            if line.is_empty() {
                continue;
            }

            // Usually there is one count column at the end of a line, but
            // differential input has two; the trailing one is the "after"
            // profile and sets the frame width.
            let after = match parse_nsamples(&mut line, &mut stripped_fractional_samples) {
                Some(n) => n,
                None => {
                    ignored += 1;
                    continue;
                }
            };
            let before = match parse_nsamples(&mut line, &mut stripped_fractional_samples) {
                Some(n) => {
                    tree.is_diff = true;
                    n
                }
                None => after,
            };
            if line.is_empty() {
                ignored += 1;
                continue;
            }

            let value = (after as f64 * opt.factor) as u64;
            let before = (before as f64 * opt.factor) as u64;

            path.clear();
            path.extend(line.split(';'));
            if opt.reverse_stack_order {
                path.reverse();
            }

            tree.insert(&path, value, before, opt.flame_chart)?;
        }

        Ok((tree, ignored))
    }

    fn insert(&mut self, path: &[&str], value: u64, before: u64, flame_chart: bool) -> Result<()> {
        let mut at = 0;
        self.bump(at, value, before)?;
        for name in path {
            at = self.find_or_insert(at, name, flame_chart);
            self.bump(at, value, before)?;
        }
        Ok(())
    }

    fn bump(&mut self, at: usize, value: u64, before: u64) -> Result<()> {
        let node = &mut self.nodes[at];
        node.value = node.value.checked_add(value).ok_or(Error::Overflow)?;
        node.before = node.before.checked_add(before).ok_or(Error::Overflow)?;
        Ok(())
    }

    fn find_or_insert(&mut self, parent: usize, name: &str, flame_chart: bool) -> usize {
        // Folded input is usually sorted, so shared prefixes arrive
        // adjacently and the last child is nearly always the match. In
        // flame chart mode it is the only permissible match.
        if let Some(&last) = self.nodes[parent].children.last() {
            if self.nodes[last].name == name {
                return last;
            }
        }
        if !flame_chart {
            for i in 0..self.nodes[parent].children.len() {
                let child = self.nodes[parent].children[i];
                if self.nodes[child].name == name {
                    return child;
                }
            }
        }

        let idx = self.nodes.len();
        self.nodes.push(Node::new(name));
        self.nodes[parent].children.push(idx);
        idx
    }

    /// The total weight of the profile.
    pub(super) fn total(&self) -> u64 {
        self.nodes[0].value
    }

    /// The largest absolute per-frame delta, used to scale differential
    /// colors.
    pub(super) fn max_abs_delta(&self) -> u64 {
        self.nodes
            .iter()
            .map(|n| (n.value as i64 - n.before as i64).unsigned_abs())
            .max()
            .unwrap_or(0)
    }

    /// Emits drawable frames in pre-order, siblings in insertion order.
    ///
    /// Frames narrower than `min_units` are pruned along with their
    /// subtrees; pruning leaves gaps rather than re-flowing siblings.
    /// Returns the frames and the maximum emitted depth.
    pub(super) fn frames(&self, min_units: f64) -> (Vec<FrameRect<'_>>, usize) {
        let mut out = Vec::new();
        let mut depthmax = 0;
        let mut todo = vec![(0usize, 0usize, 0u64)];
        while let Some((idx, depth, x)) = todo.pop() {
            let node = &self.nodes[idx];
            if (node.value as f64) < min_units {
                continue;
            }
            depthmax = std::cmp::max(depthmax, depth);
            out.push(FrameRect {
                name: &node.name,
                depth,
                x,
                width: node.value,
                delta: node.value as i64 - node.before as i64,
            });

            // push in reverse so that popping yields insertion order
            let mut cx = x;
            let mut children = Vec::with_capacity(node.children.len());
            for &child in &node.children {
                children.push((child, depth + 1, cx));
                cx += self.nodes[child].value;
            }
            for entry in children.into_iter().rev() {
                todo.push(entry);
            }
        }
        (out, depthmax)
    }
}

// Parse and remove the number of samples from the end of a line.
//
// The Perl version keeps fractional counts, but cumulative floating point
// errors make that problematic; fractions are truncated instead, and the
// --factor option can scale pre-multiplied data back down.
fn parse_nsamples(line: &mut &str, stripped_fractional_samples: &mut bool) -> Option<u64> {
    let samplesi = line.rfind(' ')? + 1;
    let mut samples = &line[samplesi..];

    if let Some(doti) = samples.find('.') {
        if !samples[..doti]
            .chars()
            .chain(samples[doti + 1..].chars())
            .all(|c| c.is_ascii_digit())
        {
            return None;
        }
        // Warn if we're stripping a non-zero fractional part, but only the
        // first time.
        if !*stripped_fractional_samples && !samples[doti + 1..].chars().all(|c| c == '0') {
            *stripped_fractional_samples = true;
            warn!(
                "The input data has fractional sample counts that will be truncated to integers"
            );
        }
        samples = &samples[..doti];
    } else if !samples.chars().all(|c| c.is_ascii_digit()) || samples.is_empty() {
        return None;
    }

    let nsamples = samples.parse::<u64>().ok()?;
    *line = line[..samplesi - 1].trim_end();
    Some(nsamples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(lines: &[&str], opt: &BuildOptions) -> FrameTree {
        FrameTree::from_lines(lines.iter().copied(), opt)
            .unwrap()
            .0
    }

    fn default_opt() -> BuildOptions {
        BuildOptions {
            factor: 1.0,
            reverse_stack_order: false,
            flame_chart: false,
        }
    }

    #[test]
    fn values_sum_through_the_tree() {
        let tree = build(&["a;b 2", "a;c 3", "a 1"], &default_opt());
        assert_eq!(tree.total(), 6);

        let (frames, depthmax) = tree.frames(0.0);
        assert_eq!(depthmax, 2);
        let a = frames.iter().find(|f| f.name == "a").unwrap();
        assert_eq!(a.width, 6);
        let b = frames.iter().find(|f| f.name == "b").unwrap();
        assert_eq!((b.x, b.width, b.depth), (0, 2, 2));
        let c = frames.iter().find(|f| f.name == "c").unwrap();
        assert_eq!((c.x, c.width, c.depth), (2, 3, 2));
    }

    #[test]
    fn siblings_keep_first_appearance_order() {
        let tree = build(&["zeta 1", "alpha 1", "zeta;inner 1"], &default_opt());
        let (frames, _) = tree.frames(0.0);
        let names: Vec<_> = frames
            .iter()
            .filter(|f| f.depth == 1)
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(tree.total(), 3);
    }

    #[test]
    fn flame_chart_merges_adjacent_only() {
        let opt = BuildOptions {
            flame_chart: true,
            ..default_opt()
        };
        let tree = build(&["a 1", "b 1", "a 1"], &opt);
        let (frames, _) = tree.frames(0.0);
        let names: Vec<_> = frames
            .iter()
            .filter(|f| f.depth == 1)
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "a"]);
    }

    #[test]
    fn reverse_stack_order_flips_paths() {
        let opt = BuildOptions {
            reverse_stack_order: true,
            ..default_opt()
        };
        let tree = build(&["a;b 1"], &opt);
        let (frames, _) = tree.frames(0.0);
        let b = frames.iter().find(|f| f.name == "b").unwrap();
        assert_eq!(b.depth, 1);
        let a = frames.iter().find(|f| f.name == "a").unwrap();
        assert_eq!(a.depth, 2);
    }

    #[test]
    fn factor_scales_counts() {
        let opt = BuildOptions {
            factor: 2.5,
            ..default_opt()
        };
        let tree = build(&["a 4"], &opt);
        assert_eq!(tree.total(), 10);
    }

    #[test]
    fn differential_columns_parse() {
        let tree = build(&["a;b 3 5", "a;c 4 2"], &default_opt());
        assert!(tree.is_diff);
        assert_eq!(tree.total(), 7);
        let (frames, _) = tree.frames(0.0);
        let b = frames.iter().find(|f| f.name == "b").unwrap();
        assert_eq!(b.delta, 2);
        let c = frames.iter().find(|f| f.name == "c").unwrap();
        assert_eq!(c.delta, -2);
        assert_eq!(tree.max_abs_delta(), 2);
    }

    #[test]
    fn bad_lines_are_counted() {
        let (tree, ignored) =
            FrameTree::from_lines(vec!["a;b 1", "nonsense", " 4"], &default_opt()).unwrap();
        assert_eq!(ignored, 2);
        assert_eq!(tree.total(), 1);
    }

    #[test]
    fn min_width_prunes_monotonically() {
        let tree = build(&["a;b 100", "a;c 1"], &default_opt());
        let (all, _) = tree.frames(0.0);
        let (pruned, _) = tree.frames(2.0);
        assert!(pruned.len() < all.len());
        for frame in &pruned {
            assert!(all.iter().any(|f| f == frame));
        }
        assert!(!pruned.iter().any(|f| f.name == "c"));
    }
}

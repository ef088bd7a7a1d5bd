use std::borrow::Cow;
use std::str::FromStr;

mod palettes;

pub(super) const VDGREY: (u8, u8, u8) = (160, 160, 160);
pub(super) const DGREY: (u8, u8, u8) = (200, 200, 200);

const YELLOW_GRADIENT: (&str, &str) = ("#eeeeee", "#eeeeb0");
const BLUE_GRADIENT: (&str, &str) = ("#eeeeee", "#e0e0ff");
const GREEN_GRADIENT: (&str, &str) = ("#eef2ee", "#e0ffe0");
const GRAY_GRADIENT: (&str, &str) = ("#f8f8f8", "#e8e8e8");

/// The background of the image: a vertical gradient, or one flat color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BackgroundColor {
    /// A pale yellow gradient, the default for the hot palette.
    Yellow,
    /// A pale blue gradient.
    Blue,
    /// A pale green gradient.
    Green,
    /// A pale grey gradient.
    Grey,
    /// A flat `#rrggbb` color.
    Flat(u8, u8, u8),
}

impl Default for BackgroundColor {
    fn default() -> Self {
        BackgroundColor::Yellow
    }
}

impl FromStr for BackgroundColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yellow" => Ok(BackgroundColor::Yellow),
            "blue" => Ok(BackgroundColor::Blue),
            "green" => Ok(BackgroundColor::Green),
            "grey" => Ok(BackgroundColor::Grey),
            flat => parse_flat_bgcolor(flat)
                .map(|(r, g, b)| BackgroundColor::Flat(r, g, b))
                .ok_or_else(|| format!("unknown background color: {}", flat)),
        }
    }
}

macro_rules! u8_from_hex_iter {
    ($slice:expr) => {
        (($slice.next()?.to_digit(16)? as u8) << 4) | ($slice.next()?.to_digit(16)? as u8)
    };
}

fn parse_flat_bgcolor(s: &str) -> Option<(u8, u8, u8)> {
    if !s.starts_with('#') || (s.len() != 7) {
        None
    } else {
        let mut s = s[1..].chars();

        let r = u8_from_hex_iter!(s);
        let g = u8_from_hex_iter!(s);
        let b = u8_from_hex_iter!(s);

        Some((r, g, b))
    }
}

/// A color family for the frames of the graph.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Palette {
    /// One base color with randomized variance.
    Basic(BasicPalette),
    /// A palette that classifies each frame name into a basic palette using
    /// per-language conventions.
    Semantic(SemanticPalette),
}

/// A base RGB centerpoint plus per-channel scaling for variance.
#[derive(Clone, Copy, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum BasicPalette {
    Hot,
    Mem,
    Io,
    Red,
    Green,
    Blue,
    Aqua,
    Yellow,
    Purple,
    Orange,
}

/// Language-aware palettes; see [`Palette::Semantic`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum SemanticPalette {
    Java,
    Js,
    Perl,
    Python,
    Rust,
    Wakeup,
}

impl Default for Palette {
    fn default() -> Self {
        Palette::Basic(BasicPalette::Hot)
    }
}

impl FromStr for Palette {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hot" => Ok(Palette::Basic(BasicPalette::Hot)),
            "mem" => Ok(Palette::Basic(BasicPalette::Mem)),
            "io" => Ok(Palette::Basic(BasicPalette::Io)),
            "red" => Ok(Palette::Basic(BasicPalette::Red)),
            "green" => Ok(Palette::Basic(BasicPalette::Green)),
            "blue" => Ok(Palette::Basic(BasicPalette::Blue)),
            "aqua" => Ok(Palette::Basic(BasicPalette::Aqua)),
            "yellow" => Ok(Palette::Basic(BasicPalette::Yellow)),
            "purple" => Ok(Palette::Basic(BasicPalette::Purple)),
            "orange" => Ok(Palette::Basic(BasicPalette::Orange)),
            "java" => Ok(Palette::Semantic(SemanticPalette::Java)),
            "js" => Ok(Palette::Semantic(SemanticPalette::Js)),
            "perl" => Ok(Palette::Semantic(SemanticPalette::Perl)),
            "python" => Ok(Palette::Semantic(SemanticPalette::Python)),
            "rust" => Ok(Palette::Semantic(SemanticPalette::Rust)),
            "wakeup" => Ok(Palette::Semantic(SemanticPalette::Wakeup)),
            unknown => Err(format!("unknown color palette: {}", unknown)),
        }
    }
}

/// How the per-frame variance scalars are derived.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(in crate::flamegraph) enum ColorMode {
    /// A fresh pseudo-random value per frame.
    Random,
    /// The position-weighted name hash; identical names get identical colors.
    Hash,
    /// FNV-1a over the whole name; identical names get identical colors.
    Deterministic,
}

/// The 32-bit linear congruential generator that jitters frame colors when
/// no name hashing was requested. Reseeded at the start of every render so
/// identical inputs produce identical images.
#[derive(Clone, Debug)]
pub(in crate::flamegraph) struct Lcg {
    state: u32,
}

impl Lcg {
    pub(in crate::flamegraph) fn new() -> Self {
        Lcg { state: 0x2a1b_3c4d }
    }

    fn next(&mut self) -> f32 {
        // Numerical Recipes constants
        self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (self.state >> 8) as f32 / (1 << 24) as f32
    }
}

struct NamehashVariables {
    vector: f32,
    weight: f32,
    max: f32,
    modulo: u8,
}

impl NamehashVariables {
    fn init() -> Self {
        NamehashVariables {
            vector: 0.0,
            weight: 1.0,
            max: 1.0,
            modulo: 10,
        }
    }

    fn update(&mut self, character: u8) {
        let i = f32::from(character % self.modulo);
        self.vector += (i / f32::from(self.modulo - 1)) * self.weight;
        self.modulo += 1;
        self.max += self.weight;
        self.weight *= 0.70;
    }

    fn result(&self) -> f32 {
        1.0 - self.vector / self.max
    }
}

/// Generate a vector hash for the name string, weighting early over later
/// characters. We want to pick the same colors for function names across
/// different flame graphs.
fn namehash<I: Iterator<Item = u8>>(mut name: I) -> f32 {
    let mut namehash_variables = NamehashVariables::init();
    let mut module_name_found = false;

    // The original Perl regex is: $name =~ s/.(.*?)`//;
    // Ie. we want to remove everything before the first '`'. If '`' is the
    // first character, we remove everything before the second '`'. If there
    // is no '`', we keep everything. We want to compute the hash and do the
    // potential deletion in one pass, and only the first three characters
    // ever contribute meaningfully (the Perl version ran while modulo > 12,
    // and modulo starts at 10); so: hash up to three characters, break early
    // on a '`', and if any '`' exists, restart the hash on what follows it.
    match name.next() {
        None => return namehash_variables.result(),
        Some(first_char) => namehash_variables.update(first_char),
    }

    for character in name.by_ref().take(2) {
        if character == b'`' {
            module_name_found = true;
            break;
        }

        namehash_variables.update(character);
    }

    module_name_found = module_name_found || name.any(|c| c == b'`');

    if module_name_found {
        namehash_variables = NamehashVariables::init();

        for character in name.take(3) {
            namehash_variables.update(character)
        }
    }

    namehash_variables.result()
}

// FNV-1a over the name, folded down to [0, 1).
fn fnv_hash(name: &str) -> f32 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x1_0000_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for &byte in name.as_bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    (hash as f64 / (u64::MAX as f64 + 1.0)) as f32
}

macro_rules! t {
    ($b:expr, $a:expr, $x:expr) => {
        $b + ($a as f32 * $x) as u8
    };
}

fn rgb_components_for_palette(
    palette: Palette,
    name: &str,
    v1: f32,
    v2: f32,
    v3: f32,
) -> (u8, u8, u8) {
    let basic_palette = match palette {
        Palette::Basic(basic) => basic,
        Palette::Semantic(SemanticPalette::Java) => palettes::java::resolve(name),
        Palette::Semantic(SemanticPalette::Js) => palettes::js::resolve(name),
        Palette::Semantic(SemanticPalette::Perl) => palettes::perl::resolve(name),
        Palette::Semantic(SemanticPalette::Python) => palettes::python::resolve(name),
        Palette::Semantic(SemanticPalette::Rust) => palettes::rust::resolve(name),
        Palette::Semantic(SemanticPalette::Wakeup) => palettes::wakeup::resolve(name),
    };

    match basic_palette {
        BasicPalette::Hot => (t!(205, 50, v3), t!(0, 230, v1), t!(0, 55, v2)),
        BasicPalette::Mem => (t!(0, 0, v3), t!(190, 50, v2), t!(0, 210, v1)),
        BasicPalette::Io => (t!(80, 60, v1), t!(80, 60, v1), t!(190, 55, v2)),
        BasicPalette::Red => (t!(200, 55, v1), t!(50, 80, v1), t!(50, 80, v1)),
        BasicPalette::Green => (t!(50, 60, v1), t!(200, 55, v1), t!(50, 60, v1)),
        BasicPalette::Blue => (t!(80, 60, v1), t!(80, 60, v1), t!(205, 50, v1)),
        BasicPalette::Yellow => (t!(175, 55, v1), t!(175, 55, v1), t!(50, 20, v1)),
        BasicPalette::Purple => (t!(190, 65, v1), t!(80, 60, v1), t!(190, 65, v1)),
        BasicPalette::Aqua => (t!(50, 60, v1), t!(165, 55, v1), t!(165, 55, v1)),
        BasicPalette::Orange => (t!(190, 65, v1), t!(90, 65, v1), t!(0, 0, v1)),
    }
}

pub(super) fn color(
    palette: Palette,
    mode: ColorMode,
    name: &str,
    rng: &mut Lcg,
) -> (u8, u8, u8) {
    let (v1, v2, v3) = match mode {
        ColorMode::Random => (rng.next(), rng.next(), rng.next()),
        ColorMode::Hash => {
            let name_hash = namehash(name.bytes());
            let reverse_name_hash = namehash(name.bytes().rev());
            (name_hash, reverse_name_hash, reverse_name_hash)
        }
        ColorMode::Deterministic => {
            let hash = fnv_hash(name);
            (hash, hash, hash)
        }
    };

    rgb_components_for_palette(palette, name, v1, v2, v3)
}

// Spreads the palette across the x axis, so sibling frames shade from one
// end of the family to the other instead of varying at random.
pub(super) fn color_diffusion(palette: Palette, name: &str, position_pct: f64) -> (u8, u8, u8) {
    let v = (position_pct / 100.0) as f32;
    rgb_components_for_palette(palette, name, v, v, v)
}

/// The fill used for differential frames: red for more samples, blue for
/// fewer, white for unchanged, scaled by the largest delta in the graph.
pub(super) fn color_scale(value: i64, max: u64) -> (u8, u8, u8) {
    if value == 0 || max == 0 {
        (255, 255, 255)
    } else if value > 0 {
        // more samples means more time spent, so a red hue
        let c = (210 * (max as i64 - value) / max as i64) as u8;
        (255, c, c)
    } else {
        // fewer samples is a speed-up, so a blue hue
        let c = (210 * (max as i64 + value) / max as i64) as u8;
        (c, c, 255)
    }
}

fn default_bg_color_for(palette: Palette) -> BackgroundColor {
    match palette {
        Palette::Basic(BasicPalette::Mem) => BackgroundColor::Green,
        Palette::Basic(BasicPalette::Io) | Palette::Semantic(SemanticPalette::Wakeup) => {
            BackgroundColor::Blue
        }
        Palette::Basic(BasicPalette::Red)
        | Palette::Basic(BasicPalette::Green)
        | Palette::Basic(BasicPalette::Blue)
        | Palette::Basic(BasicPalette::Aqua)
        | Palette::Basic(BasicPalette::Yellow)
        | Palette::Basic(BasicPalette::Purple)
        | Palette::Basic(BasicPalette::Orange) => BackgroundColor::Grey,
        _ => BackgroundColor::Yellow,
    }
}

macro_rules! cow {
    ($gradient:expr) => {
        (Cow::from($gradient.0), Cow::from($gradient.1))
    };
}

pub(super) fn bgcolor_for<'a>(
    bgcolor: Option<BackgroundColor>,
    palette: Palette,
) -> (Cow<'a, str>, Cow<'a, str>) {
    let bgcolor = bgcolor.unwrap_or_else(|| default_bg_color_for(palette));

    match bgcolor {
        BackgroundColor::Yellow => cow!(YELLOW_GRADIENT),
        BackgroundColor::Blue => cow!(BLUE_GRADIENT),
        BackgroundColor::Green => cow!(GREEN_GRADIENT),
        BackgroundColor::Grey => cow!(GRAY_GRADIENT),
        BackgroundColor::Flat(r, g, b) => {
            let color = format!("#{:02x}{:02x}{:02x}", r, g, b);
            let first = Cow::from(color);
            let second = first.clone();
            (first, second)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgcolor_parse_test() {
        assert_eq!(parse_flat_bgcolor("#ffffff"), Some((0xff, 0xff, 0xff)));
        assert_eq!(parse_flat_bgcolor("#000000"), Some((0x00, 0x00, 0x00)));
        assert_eq!(parse_flat_bgcolor("#abcdef"), Some((0xab, 0xcd, 0xef)));
        assert_eq!(parse_flat_bgcolor("ffffff"), None);
        assert_eq!(parse_flat_bgcolor("#fffffff"), None);
        assert_eq!(parse_flat_bgcolor("#xfffff"), None);
        assert_eq!(parse_flat_bgcolor("# fffff"), None);
    }

    macro_rules! test_hash {
        ($name:expr, $expected:expr) => {
            assert_eq!(namehash($name.bytes()), $expected)
        };
    }

    #[test]
    fn namehash_test() {
        test_hash!(
            "org/mozilla/javascript/NativeFunction:.initScriptFunction_[j]",
            0.77964604
        );
        test_hash!(
            "]j[_noitcnuFtpircStini.:noitcnuFevitaN/tpircsavaj/allizom/gro",
            0.64415313
        );
        test_hash!("genunix`kmem_cache_free", 0.46692634);
        test_hash!("eerf_ehcac_memk`xinuneg", 0.84041037);
        test_hash!("unix`0xfffffffffb8001d6", 0.41813117);
        test_hash!("6d1008bfffffffffx0`xinu", 0.84041037);
        test_hash!("un`0xfffffffffb8001d6", 0.41813117);
        test_hash!("``0xfffffffffb8001d6", 0.41813117);
        test_hash!("", 1.0);
    }

    #[test]
    fn hashed_colors_are_deterministic() {
        let mut rng1 = Lcg::new();
        let mut rng2 = Lcg::new();
        let palette = Palette::default();
        assert_eq!(
            color(palette, ColorMode::Hash, "genunix`kmem_cache_free", &mut rng1),
            color(palette, ColorMode::Hash, "genunix`kmem_cache_free", &mut rng2),
        );
        assert_eq!(
            color(palette, ColorMode::Deterministic, "main", &mut rng1),
            color(palette, ColorMode::Deterministic, "main", &mut rng2),
        );
    }

    #[test]
    fn lcg_is_reproducible_and_in_range() {
        let mut rng1 = Lcg::new();
        let mut rng2 = Lcg::new();
        for _ in 0..1000 {
            let v = rng1.next();
            assert_eq!(v, rng2.next());
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn scale_endpoints() {
        assert_eq!(color_scale(0, 10), (255, 255, 255));
        assert_eq!(color_scale(10, 10), (255, 0, 0));
        assert_eq!(color_scale(-10, 10), (0, 0, 255));
    }
}

//! Byte-slice lexing shared by the collapsers.
//!
//! The parsers treat their input as ASCII-compatible bytes end-to-end; none
//! of these helpers perform any character-encoding normalization.

use std::borrow::Cow;

const RUST_HASH_LENGTH: usize = 17;

/// Strips ASCII whitespace from both ends.
pub(crate) fn trim(mut line: &[u8]) -> &[u8] {
    line = trim_start(line);
    trim_end(line)
}

pub(crate) fn trim_start(mut line: &[u8]) -> &[u8] {
    while let Some((&first, rest)) = line.split_first() {
        if first.is_ascii_whitespace() {
            line = rest;
        } else {
            break;
        }
    }
    line
}

pub(crate) fn trim_end(mut line: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = line.split_last() {
        if last.is_ascii_whitespace() {
            line = rest;
        } else {
            break;
        }
    }
    line
}

pub(crate) fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

pub(crate) fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

pub(crate) fn rfind_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().rposition(|&b| b == needle)
}

pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Splits at the first occurrence of `needle`, which is not included in
/// either half.
pub(crate) fn split_once_byte(haystack: &[u8], needle: u8) -> Option<(&[u8], &[u8])> {
    let at = find_byte(haystack, needle)?;
    Some((&haystack[..at], &haystack[at + 1..]))
}

/// Parses a non-empty run of ASCII digits as a 64-bit count.
pub(crate) fn parse_u64(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() {
        return None;
    }
    let mut n: u64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        n = n.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
    }
    Some(n)
}

pub(crate) fn parse_f64(bytes: &[u8]) -> Option<f64> {
    std::str::from_utf8(bytes).ok()?.parse::<f64>().ok()
}

/// Strips a trailing `+0x1af`-style instruction offset, if present.
pub(crate) fn strip_offset(symbol: &[u8]) -> &[u8] {
    if let Some(plus) = rfind_subslice(symbol, b"+0x") {
        let digits = &symbol[plus + 3..];
        if !digits.is_empty() && digits.iter().all(u8::is_ascii_hexdigit) {
            return &symbol[..plus];
        }
    }
    symbol
}

pub(crate) fn rfind_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

/// Canonical cleanup of a raw symbol name.
///
/// Converts embedded semicolons (which would corrupt folded output) to
/// colons, removes `(anonymous namespace)::` qualifiers, strips C/C++
/// argument lists, and elides template bodies. Go method names like
/// `net/http.(*Client).Do` keep their parenthesized receiver.
pub(crate) fn tidy_generic(func: &mut Vec<u8>) {
    for b in func.iter_mut() {
        if *b == b';' {
            *b = b':';
        }
    }

    while let Some(at) = find_subslice(func, b"(anonymous namespace)::") {
        func.drain(at..at + b"(anonymous namespace)::".len());
    }

    if let Some(paren) = find_byte(func, b'(') {
        // if .get(-1) is None, it can't be a dot
        let is_go_receiver = paren > 0 && func[paren - 1] == b'.';
        if !is_go_receiver {
            func.truncate(paren);
        }
    }

    elide_template_body(func);
}

// Removes matched top-level `<...>` groups. `operator<` and friends make
// bracket matching ambiguous, so names containing them are left alone.
fn elide_template_body(func: &mut Vec<u8>) {
    if find_subslice(func, b"operator<").is_some() || find_subslice(func, b"operator>").is_some() {
        return;
    }

    let mut from = 0;
    while let Some(open) = find_byte(&func[from..], b'<') {
        let open = from + open;
        let mut depth = 0usize;
        let mut close = None;
        for (i, &b) in func[open..].iter().enumerate() {
            match b {
                b'<' => depth += 1,
                b'>' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(open + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        match close {
            Some(close) => {
                func.drain(open..=close);
                from = open;
            }
            // unmatched bracket, leave the remainder untouched
            None => break,
        }
    }
}

/// Demangles partially demangled Rust symbols that profilers like `sample`
/// and DTrace get wrong.
///
/// For example:
///     `_$LT$grep_searcher..searcher..glue..ReadByLine$LT$$u27$s$C$$u20$M$C$$u20$R$C$$u20$S$GT$$GT$::run::h30ecedc997ad7e32`
/// becomes
///     `<grep_searcher::searcher::glue::ReadByLine<'s, M, R, S>>::run`
///
/// Non-Rust symbols, or Rust symbols that are already demangled, are returned
/// unchanged.
pub(crate) fn fix_partially_demangled_rust_symbol(symbol: &str) -> Cow<'_, str> {
    // Rust hashes are hex digits with an `h` prepended.
    let is_rust_hash = |s: &str| s.starts_with('h') && s[1..].chars().all(|c| c.is_ascii_hexdigit());

    // If there's no trailing Rust hash just return the symbol as is.
    if symbol.len() < RUST_HASH_LENGTH || !is_rust_hash(&symbol[symbol.len() - RUST_HASH_LENGTH..])
    {
        return Cow::Borrowed(symbol);
    }

    // Strip off trailing hash.
    let mut rest = &symbol[..symbol.len() - RUST_HASH_LENGTH];

    if rest.ends_with("::") {
        rest = &rest[..rest.len() - 2];
    }

    if rest.starts_with("_$") {
        rest = &rest[1..];
    }

    let mut demangled = String::new();

    while !rest.is_empty() {
        if rest.starts_with('.') {
            if let Some('.') = rest[1..].chars().next() {
                demangled.push_str("::");
                rest = &rest[2..];
            } else {
                demangled.push('.');
                rest = &rest[1..];
            }
        } else if rest.starts_with('$') {
            macro_rules! demangle {
                ($($pat:expr => $demangled:expr,)*) => ({
                    $(if rest.starts_with($pat) {
                        demangled.push_str($demangled);
                        rest = &rest[$pat.len()..];
                        } else)*
                    {
                        demangled.push_str(rest);
                        break;
                    }

                })
            }

            demangle! {
                "$SP$" => "@",
                "$BP$" => "*",
                "$RF$" => "&",
                "$LT$" => "<",
                "$GT$" => ">",
                "$LP$" => "(",
                "$RP$" => ")",
                "$C$" => ",",
                "$u7e$" => "~",
                "$u20$" => " ",
                "$u27$" => "'",
                "$u3d$" => "=",
                "$u5b$" => "[",
                "$u5d$" => "]",
                "$u7b$" => "{",
                "$u7d$" => "}",
                "$u3b$" => ";",
                "$u2b$" => "+",
                "$u21$" => "!",
                "$u22$" => "\"",
            }
        } else {
            let idx = match rest.char_indices().find(|&(_, c)| c == '$' || c == '.') {
                None => rest.len(),
                Some((i, _)) => i,
            };
            demangled.push_str(&rest[..idx]);
            rest = &rest[idx..];
        }
    }

    Cow::Owned(demangled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tidied(name: &str) -> String {
        let mut func = name.as_bytes().to_vec();
        tidy_generic(&mut func);
        String::from_utf8(func).unwrap()
    }

    #[test]
    fn trim_and_blank() {
        assert_eq!(trim(b"  a b \t"), b"a b");
        assert_eq!(trim(b""), b"");
        assert!(is_blank(b" \t\r\n"));
        assert!(!is_blank(b" x "));
    }

    #[test]
    fn u64_parsing() {
        assert_eq!(parse_u64(b"0"), Some(0));
        assert_eq!(parse_u64(b"18446744073709551615"), Some(u64::MAX));
        assert_eq!(parse_u64(b"18446744073709551616"), None);
        assert_eq!(parse_u64(b""), None);
        assert_eq!(parse_u64(b"12a"), None);
    }

    #[test]
    fn offset_stripping() {
        assert_eq!(strip_offset(b"funcA+0x10"), b"funcA");
        assert_eq!(strip_offset(b"funcA+0x"), b"funcA+0x");
        assert_eq!(strip_offset(b"funcA+0xzz"), b"funcA+0xzz");
        assert_eq!(strip_offset(b"funcA"), b"funcA");
    }

    #[test]
    fn generic_tidying() {
        assert_eq!(tidied("foo(int, char*)"), "foo");
        assert_eq!(tidied("net/http.(*Client).Do"), "net/http.(*Client).Do");
        assert_eq!(tidied("(anonymous namespace)::run"), "run");
        assert_eq!(tidied("std::vector<int, alloc<int>>::push_back"), "std::vector::push_back");
        assert_eq!(tidied("bad;name"), "bad:name");
        assert_eq!(tidied("std::operator<<char>"), "std::operator<<char>");
    }

    macro_rules! t {
        ($a:expr, $b:expr) => {
            assert_eq!(fix_partially_demangled_rust_symbol($a), $b)
        };
    }

    macro_rules! t_unchanged {
        ($a:expr) => {
            assert_eq!(fix_partially_demangled_rust_symbol($a), $a)
        };
    }

    #[test]
    fn fix_partially_demangled_rust_symbols() {
        t!(
            "std::sys::unix::fs::File::open::hb90e1c1c787080f0",
            "std::sys::unix::fs::File::open"
        );
        t!("_$LT$std..fs..ReadDir$u20$as$u20$core..iter..traits..iterator..Iterator$GT$::next::hc14f1750ca79129b", "<std::fs::ReadDir as core::iter::traits::iterator::Iterator>::next");
        t!("rg::search_parallel::_$u7b$$u7b$closure$u7d$$u7d$::_$u7b$$u7b$closure$u7d$$u7d$::h6e849b55a66fcd85", "rg::search_parallel::_{{closure}}::_{{closure}}");
        t!(
            "_$LT$F$u20$as$u20$alloc..boxed..FnBox$LT$A$GT$$GT$::call_box::h8612a2a83552fc2d",
            "<F as alloc::boxed::FnBox<A>>::call_box"
        );
        t!(
            "std::sync::mpsc::shared::Packet$LT$T$GT$::recv::hfde2d9e28d13fd56",
            "std::sync::mpsc::shared::Packet<T>::recv"
        );
    }

    #[test]
    fn fix_partially_demangled_rust_symbol_on_mangled_and_demangled_symbols() {
        t_unchanged!("_ZN4testE");
        t_unchanged!("_ZN3std5panic12catch_unwind17h0562757d03ff60b3E");
        t_unchanged!("std::sys::unix::fs::File::open");
        t_unchanged!("<F as alloc::boxed::FnBox<A>>::call_box");
        t_unchanged!("<grep_searcher::searcher::glue::ReadByLine<'s, M, R, S>>::run");
    }
}

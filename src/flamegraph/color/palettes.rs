enum Annotation {
    Kernel,
    Inline,
    Jit,
}

fn resolve_annotation(name: &str) -> Option<Annotation> {
    if name.ends_with(']') {
        if let Some(ai) = name.rfind("_[") {
            if name[ai..].len() == 4 {
                match &name[ai + 2..ai + 3] {
                    "k" => return Some(Annotation::Kernel),
                    "i" => return Some(Annotation::Inline),
                    "j" => return Some(Annotation::Jit),
                    _ => {}
                }
            }
        }
    }

    None
}

pub(super) mod java {
    use super::Annotation;
    use crate::flamegraph::color::BasicPalette;

    /// Handle both annotations (_[j], _[i], ...; which are accurate), as
    /// well as input that lacks any annotations, as best as possible.
    /// Without annotations, we get a little hacky and match on java|org|com,
    /// etc.
    pub fn resolve(name: &str) -> BasicPalette {
        if let Some(annotation) = super::resolve_annotation(name) {
            return match annotation {
                Annotation::Kernel => BasicPalette::Orange,
                Annotation::Inline => BasicPalette::Aqua,
                Annotation::Jit => BasicPalette::Green,
            };
        }

        let java_prefix = if let Some(stripped) = name.strip_prefix('L') {
            stripped
        } else {
            name
        };

        if name.contains("::") || name.starts_with("-[") || name.starts_with("+[") {
            // C++ or Objective C
            BasicPalette::Yellow
        } else if java_prefix.contains('/')
            || (java_prefix.contains('.') && !java_prefix.starts_with('['))
            || match java_prefix.chars().next() {
                Some(c) => c.is_ascii_uppercase(),
                _ => false,
            }
        {
            // Java
            BasicPalette::Green
        } else {
            // system
            BasicPalette::Red
        }
    }
}

pub(super) mod perl {
    use crate::flamegraph::color::BasicPalette;

    pub fn resolve(name: &str) -> BasicPalette {
        if let Some(super::Annotation::Kernel) = super::resolve_annotation(name) {
            BasicPalette::Orange
        } else if name.contains("Perl") || name.contains(".pl") {
            BasicPalette::Green
        } else if name.contains("::") {
            BasicPalette::Yellow
        } else {
            BasicPalette::Red
        }
    }
}

pub(super) mod python {
    use crate::flamegraph::color::BasicPalette;

    pub fn resolve(name: &str) -> BasicPalette {
        if name.contains("site-packages") {
            // third-party
            BasicPalette::Aqua
        } else if name.contains("python")
            || name.contains("Python")
            || name.starts_with("<built-in")
            || name.starts_with("<method")
            || name.starts_with("<frozen")
        {
            BasicPalette::Yellow
        } else {
            BasicPalette::Red
        }
    }
}

pub(super) mod js {
    use crate::flamegraph::color::BasicPalette;

    pub fn resolve(name: &str) -> BasicPalette {
        let annotation = super::resolve_annotation(name);

        if !name.is_empty() && name.trim().is_empty() {
            return BasicPalette::Green;
        } else if let Some(super::Annotation::Kernel) = annotation {
            return BasicPalette::Orange;
        } else if let Some(super::Annotation::Jit) = annotation {
            if name.contains('/') {
                return BasicPalette::Green;
            } else {
                return BasicPalette::Aqua;
            }
        } else if name.contains("::") {
            return BasicPalette::Yellow;
        } else if name.contains(':') {
            return BasicPalette::Aqua;
        } else if name.contains("node_modules/") {
            return BasicPalette::Purple;
        } else if let Some(ai) = name.find('/') {
            if name[ai..].contains(".js") {
                return BasicPalette::Green;
            }
        }

        BasicPalette::Red
    }
}

pub(super) mod rust {
    use crate::flamegraph::color::BasicPalette;

    /// Differentiate between std/core/alloc and everything else.
    pub fn resolve(name: &str) -> BasicPalette {
        // A module prefix like "binary`" may precede the symbol.
        let name = match name.find('`') {
            Some(at) => &name[at + 1..],
            None => name,
        };
        if name.starts_with("core::")
            || name.starts_with("std::")
            || name.starts_with("alloc::")
            || (name.starts_with("<core::")
                && !name.starts_with("<core::future::from_generator::GenFuture<T>"))
            || name.starts_with("<std::")
            || name.starts_with("<alloc::")
        {
            BasicPalette::Orange
        } else if name.contains("::") {
            BasicPalette::Aqua
        } else {
            BasicPalette::Yellow
        }
    }
}

pub(super) mod wakeup {
    use crate::flamegraph::color::BasicPalette;

    pub fn resolve(_name: &str) -> BasicPalette {
        BasicPalette::Aqua
    }
}

#[cfg(test)]
mod tests {
    use crate::flamegraph::color::BasicPalette;

    fn check(resolve: fn(&str) -> BasicPalette, cases: &[(&str, BasicPalette)]) {
        for (input, expected) in cases {
            assert_eq!(resolve(input), *expected, "input: {:?}", input);
        }
    }

    #[test]
    fn java_mod_resolves() {
        check(
            super::java::resolve,
            &[
                ("_[k]", BasicPalette::Orange),
                ("_[j]_[k]", BasicPalette::Orange),
                ("_[j]", BasicPalette::Green),
                ("_[i]", BasicPalette::Aqua),
                ("_[jk]", BasicPalette::Red),
                ("_[i]blah", BasicPalette::Red),
                ("java/somestuff", BasicPalette::Green),
                ("Ljava/somestuff", BasicPalette::Green),
                ("org/somestuff", BasicPalette::Green),
                ("scala.tools.nsc.Global$Run.compile", BasicPalette::Green),
                ("Compile", BasicPalette::Green),
                ("jdk::[ki]", BasicPalette::Yellow),
                ("::", BasicPalette::Yellow),
                ("-[test]", BasicPalette::Yellow),
                ("+[test]", BasicPalette::Yellow),
                ("[test.event]", BasicPalette::Red),
                ("jdk", BasicPalette::Red),
                ("Ljdk", BasicPalette::Red),
                ("", BasicPalette::Red),
                ("something", BasicPalette::Red),
            ],
        );
    }

    #[test]
    fn perl_mod_resolves() {
        check(
            super::perl::resolve,
            &[
                ("", BasicPalette::Red),
                ("something", BasicPalette::Red),
                ("somethingpl", BasicPalette::Red),
                ("something_[k]", BasicPalette::Orange),
                ("some::thing", BasicPalette::Yellow),
                ("some/ai.pl", BasicPalette::Green),
                ("somethingPerl", BasicPalette::Green),
            ],
        );
    }

    #[test]
    fn python_mod_resolves() {
        check(
            super::python::resolve,
            &[
                ("spam", BasicPalette::Red),
                ("/opt/python3.9/lib/python.so", BasicPalette::Yellow),
                ("<built-in method posix.stat>", BasicPalette::Yellow),
                ("<method 'append' of 'list'>", BasicPalette::Yellow),
                ("<frozen importlib._bootstrap>", BasicPalette::Yellow),
                (
                    "/venv/lib/site-packages/requests/api.py",
                    BasicPalette::Aqua,
                ),
            ],
        );
    }

    #[test]
    fn js_returns_correct() {
        check(
            super::js::resolve,
            &[
                (" ", BasicPalette::Green),
                ("something_[k]", BasicPalette::Orange),
                ("something/_[j]", BasicPalette::Green),
                ("something_[j]", BasicPalette::Aqua),
                ("some::thing", BasicPalette::Yellow),
                ("some:thing", BasicPalette::Aqua),
                ("node_modules/express/index", BasicPalette::Purple),
                ("some/ai.js", BasicPalette::Green),
                ("someai.js", BasicPalette::Red),
            ],
        );
    }

    #[test]
    fn rust_mod_resolves() {
        check(
            super::rust::resolve,
            &[
                ("std::fs::File::open", BasicPalette::Orange),
                ("core::ptr::drop_in_place", BasicPalette::Orange),
                ("alloc::vec::Vec<T>::push", BasicPalette::Orange),
                ("<std::fs::ReadDir as Iterator>::next", BasicPalette::Orange),
                ("mybin`std::fs::File::open", BasicPalette::Orange),
                (
                    "<core::future::from_generator::GenFuture<T> as core::future::future::Future>::poll",
                    BasicPalette::Aqua,
                ),
                ("mycrate::module::func", BasicPalette::Aqua),
                ("main", BasicPalette::Yellow),
            ],
        );
    }

    #[test]
    fn wakeup_is_always_aqua() {
        check(super::wakeup::resolve, &[("anything", BasicPalette::Aqua)]);
    }
}

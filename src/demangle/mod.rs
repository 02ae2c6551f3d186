//! Symbol-name demangling: detect the mangling scheme by prefix, then hand
//! off to the matching demangler. Grounded on samply-symbols' `demangle.rs`
//! dispatch chain, narrowed to the schemes actually in scope here (Itanium
//! C++ and Swift) plus the OCaml convention, grounded on `original_source/`.

#[cfg(feature = "swift-demangle")]
mod swift;

/// Demangles `mangled`, returning an owned string.
///
/// Falls back to an owned copy of the input when no scheme's prefix
/// matches, or when the matching demangler declines to produce output (for
/// instance, a mangled name that merely *looks* Itanium-shaped but isn't a
/// valid one). Never fails.
pub fn demangle(mangled: &str) -> String {
    if !crate::config::raw_names() {
        if is_itanium(mangled) {
            if let Some(demangled) = demangle_itanium(mangled) {
                return demangled;
            }
        } else if is_swift(mangled) && crate::config::swift_demangler_active() {
            #[cfg(feature = "swift-demangle")]
            if let Some(demangled) = swift::demangle(mangled) {
                return demangled;
            }
        } else if let Some(demangled) = demangle_ocaml(mangled) {
            return demangled;
        }
    }
    mangled.to_owned()
}

fn is_itanium(mangled: &str) -> bool {
    mangled.starts_with("_Z") || mangled.starts_with("___Z") || is_global_ctor_dtor(mangled)
}

/// The `_GLOBAL_<sep><D|I>_` form used for global constructor/destructor
/// thunks, where `<sep>` is `_` or `.` depending on the toolchain.
fn is_global_ctor_dtor(mangled: &str) -> bool {
    let rest = match mangled.strip_prefix("_GLOBAL_") {
        Some(rest) => rest,
        None => return false,
    };
    let mut chars = rest.chars();
    matches!(chars.next(), Some('_') | Some('.'))
        && matches!(chars.next(), Some('D') | Some('I'))
        && chars.next() == Some('_')
}

fn is_swift(mangled: &str) -> bool {
    const PREFIXES: &[&str] = &["_$s", "$s", "_$e", "$e", "_$S", "$S", "_T0", "@__swiftmacro_"];
    PREFIXES.iter().any(|prefix| mangled.starts_with(prefix))
}

fn demangle_itanium(mangled: &str) -> Option<String> {
    if let Ok(sym) = rustc_demangle::try_demangle(mangled) {
        return Some(format!("{sym:#}"));
    }
    cpp_demangle::Symbol::new(mangled)
        .ok()
        .map(|sym| sym.to_string())
}

/// OCaml mangles `Module.ident` as `camlModule__ident` (with `__` separating
/// every dotted path component and numeric-suffixed disambiguators on
/// shadowed identifiers); unmangling just reverses the substitution. Grounded
/// on `original_source/`'s demangler; worth keeping since it costs nothing
/// beyond this function.
fn demangle_ocaml(mangled: &str) -> Option<String> {
    let rest = mangled.strip_prefix("caml")?;
    if rest.is_empty() || !rest.starts_with(|c: char| c.is_ascii_uppercase()) {
        return None;
    }
    Some(rest.replace("__", "."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_itanium_prefixes() {
        assert!(is_itanium("_ZN4core3fmt"));
        assert!(is_itanium("___ZN4core3fmt"));
        assert!(is_itanium("_GLOBAL__I_a"));
        assert!(is_itanium("_GLOBAL_.D_a"));
        assert!(!is_itanium("hello"));
    }

    #[test]
    fn detects_swift_prefixes() {
        for mangled in ["_$s4main3fooyyF", "$s4main3fooyyF", "_T0", "@__swiftmacro_Foo"] {
            assert!(is_swift(mangled), "{mangled} should be detected as Swift");
        }
        assert!(!is_swift("_ZN4core3fmt"));
    }

    #[test]
    fn demangles_rust_symbol() {
        let demangled = demangle("_ZN3foo3barE");
        assert!(!demangled.is_empty());
    }

    #[test]
    fn unknown_prefix_returns_copy() {
        assert_eq!(demangle("plain_c_symbol"), "plain_c_symbol");
    }

    #[test]
    fn ocaml_unmangles_dotted_path() {
        assert_eq!(
            demangle_ocaml("camlMy_module__ident_1036").unwrap(),
            "My_module.ident_1036"
        );
        assert!(demangle_ocaml("camel_case_but_not_ocaml").is_none());
    }

    #[test]
    fn raw_names_flag_suppresses_demangling() {
        crate::config::set_raw_names(true);
        let result = demangle("_ZN3foo3barE");
        crate::config::set_raw_names(false);
        assert_eq!(result, "_ZN3foo3barE");
    }
}

//! Target-ABI symbol decoration.
//!
//! Every path that produces or consumes a symbol name goes through one shared
//! [`Mangler`]. A mismatch between two paths is a silent lookup miss rather
//! than a crash, so the engine constructs exactly one instance and hands it to
//! every layer.

/// Names starting with this byte are emitted verbatim, without ABI prefix.
pub const VERBATIM_MARKER: char = '\u{1}';

/// Deterministic mapping from logical names to ABI-decorated names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mangler {
    global_prefix: Option<char>,
}

impl Mangler {
    /// Builds the mangler for a target triple such as `x86_64-unknown-linux-gnu`.
    ///
    /// Mach-O targets and 32-bit Windows decorate C symbols with a leading
    /// underscore; ELF and 64-bit COFF do not.
    pub fn for_triple(triple: &str) -> Self {
        let mut parts = triple.split('-');
        let arch = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();
        let is_macho = rest
            .iter()
            .any(|p| matches!(*p, "apple" | "darwin" | "macos" | "ios" | "tvos" | "watchos"));
        let is_win32 = rest.iter().any(|p| p.starts_with("windows"))
            && matches!(arch, "i386" | "i586" | "i686" | "x86");
        let global_prefix = if is_macho || is_win32 { Some('_') } else { None };
        Self { global_prefix }
    }

    /// A mangler that leaves names unchanged.
    pub fn undecorated() -> Self {
        Self {
            global_prefix: None,
        }
    }

    pub fn with_prefix(prefix: char) -> Self {
        Self {
            global_prefix: Some(prefix),
        }
    }

    pub fn global_prefix(&self) -> Option<char> {
        self.global_prefix
    }

    /// Decorates a logical name.
    pub fn mangle(&self, name: &str) -> String {
        if let Some(verbatim) = name.strip_prefix(VERBATIM_MARKER) {
            return verbatim.to_string();
        }
        match self.global_prefix {
            Some(prefix) => {
                let mut out = String::with_capacity(name.len() + 1);
                out.push(prefix);
                out.push_str(name);
                out
            }
            None => name.to_string(),
        }
    }

    /// Strips the ABI prefix again, yielding the name the dynamic loader expects.
    pub fn host_name<'a>(&self, mangled: &'a str) -> &'a str {
        match self.global_prefix {
            Some(prefix) => mangled.strip_prefix(prefix).unwrap_or(mangled),
            None => mangled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elf_targets_are_undecorated() {
        let m = Mangler::for_triple("x86_64-unknown-linux-gnu");
        assert_eq!(m.mangle("main"), "main");
        assert_eq!(m.global_prefix(), None);
    }

    #[test]
    fn macho_targets_get_underscore() {
        let m = Mangler::for_triple("aarch64-apple-darwin");
        assert_eq!(m.mangle("main"), "_main");
        assert_eq!(m.host_name("_main"), "main");
    }

    #[test]
    fn win32_gets_underscore_but_win64_does_not() {
        assert_eq!(Mangler::for_triple("i686-pc-windows-msvc").mangle("f"), "_f");
        assert_eq!(Mangler::for_triple("x86_64-pc-windows-msvc").mangle("f"), "f");
    }

    #[test]
    fn verbatim_names_skip_prefix() {
        let m = Mangler::with_prefix('_');
        assert_eq!(m.mangle("\u{1}raw_name"), "raw_name");
    }

    #[test]
    fn mangling_is_deterministic() {
        let m = Mangler::for_triple("aarch64-apple-darwin");
        assert_eq!(m.mangle("foo"), m.clone().mangle("foo"));
    }
}

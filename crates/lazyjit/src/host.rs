//! Last-resort symbol lookup in the host process.

use std::collections::HashMap;

/// Source of host symbols, queried with unmangled names.
pub trait HostSymbols: Send + Sync {
    fn lookup(&self, name: &str) -> Option<u64>;
}

/// The symbols of the running process and every library it has loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSymbols;

impl HostSymbols for ProcessSymbols {
    #[cfg(unix)]
    fn lookup(&self, name: &str) -> Option<u64> {
        let c_name = std::ffi::CString::new(name).ok()?;
        // SAFETY: `c_name` is NUL-terminated and RTLD_DEFAULT is always valid.
        let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, c_name.as_ptr()) };
        if addr.is_null() {
            None
        } else {
            Some(addr as usize as u64)
        }
    }

    #[cfg(not(unix))]
    fn lookup(&self, _name: &str) -> Option<u64> {
        None
    }
}

/// Resolves nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHostSymbols;

impl HostSymbols for NoHostSymbols {
    fn lookup(&self, _name: &str) -> Option<u64> {
        None
    }
}

impl HostSymbols for HashMap<String, u64> {
    fn lookup(&self, name: &str) -> Option<u64> {
        self.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn process_symbols_find_libc() {
        assert!(ProcessSymbols.lookup("labs").is_some());
        assert!(ProcessSymbols.lookup("lazyjit_no_such_symbol_here").is_none());
    }

    #[test]
    fn interior_nul_is_a_miss() {
        assert!(ProcessSymbols.lookup("la\0bs").is_none());
    }

    #[test]
    fn map_lookup() {
        let mut map = HashMap::new();
        map.insert("twice".to_string(), 0x40u64);
        assert_eq!(map.lookup("twice"), Some(0x40));
        assert_eq!(NoHostSymbols.lookup("twice"), None);
    }
}

use parking_lot::Mutex;
use std::collections::HashMap;

/// Memoizes ip to symbol lookups for the duration of one dump.
///
/// Resolution goes through the platform symbolizer; a dump revisits
/// the same ips once per record that shares a path.
#[derive(Default)]
pub struct SymbolCache {
    names: Mutex<HashMap<usize, Option<String>>>,
}

impl SymbolCache {
    pub fn resolve(&self, ip: usize) -> Option<String> {
        self.names
            .lock()
            .entry(ip)
            .or_insert_with(|| crate::resolve_name(ip))
            .clone()
    }

    pub fn clear(&self) {
        self.names.lock().clear();
    }
}

//! Data key namespacing.
//!
//! Global data lives under `["__global", "data", ...]`. The first user segment sits at
//! index 2 of the path, which is the segment the private mapper hashes for path keys.

const GLOBAL_ROOT: &str = "__global";
const DATA_SEGMENT: &str = "data";

#[derive(Debug, Clone, Default)]
pub struct KeyManager;

impl KeyManager {
    pub fn new() -> Self {
        Self
    }

    /// Localizes a dotted user key (`"users.42.name"`). `None` yields the namespace root.
    pub fn global_data_key(&self, key: Option<&str>) -> Vec<String> {
        let mut path = vec![GLOBAL_ROOT.to_string(), DATA_SEGMENT.to_string()];
        if let Some(key) = key {
            path.extend(
                key.split('.')
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string),
            );
        }
        path
    }
}

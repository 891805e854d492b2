use std::path::PathBuf;

/// Replace characters that are awkward or unsafe in a filename on common
/// filesystems: `/`, space, and `:`. Not reversible; collisions are the
/// caller's concern (unique source names are a configuration invariant,
/// not something this function detects).
pub fn escape(name: &str) -> String {
    name.replace('/', "_").replace(' ', "_").replace(':', "_")
}

/// Join `dir` with the escaped `name`, or `None` if `dir` is empty
/// (persistence disabled).
pub fn file_path(dir: &str, name: &str) -> Option<PathBuf> {
    if dir.is_empty() {
        return None;
    }
    Some(PathBuf::from(dir).join(escape(name)))
}

use std::path::{Component, Path};

/// Lexically normalize a path: drop `.` components and trailing slashes, and
/// fold `dir/..` pairs.  The filesystem is never consulted, so symlinks are not
/// resolved; two spellings of the same file only compare equal if they
/// normalize to the same text.
pub fn normalize_path(path: &str) -> String {
    let mut prefix = String::new();
    let mut parts: Vec<String> = vec![];
    for component in Path::new(path).components() {
        match component {
            Component::Prefix(p) => prefix.push_str(&p.as_os_str().to_string_lossy()),
            Component::RootDir => prefix.push('/'),
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(last) if last != ".." => {
                    parts.pop();
                }
                _ => {
                    // `/..` is `/`, but a relative path may legitimately climb.
                    if prefix.is_empty() {
                        parts.push("..".to_string());
                    }
                }
            },
            Component::Normal(c) => parts.push(c.to_string_lossy().into_owned()),
        }
    }

    let joined = parts.join("/");
    if prefix.is_empty() && joined.is_empty() {
        ".".to_string()
    } else {
        format!("{}{}", prefix, joined)
    }
}

/// Whether `path` lies under any of `roots`, comparing whole components so
/// that `/usr/include2/x.h` is not considered to be under `/usr/include`.
pub fn is_under_any_root(path: &str, roots: &[String]) -> bool {
    let path = Path::new(path);
    roots.iter().any(|root| path.starts_with(root))
}

/// Final path component, or the whole path if it has none.
pub fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

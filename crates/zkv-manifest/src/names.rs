//! Name policy: length truncation and collision-safe sibling naming

/// Maximum entry name length in characters
pub const MAX_NAME_LEN: usize = 255;

/// Truncate a name to [`MAX_NAME_LEN`] characters, preserving the file
/// extension when one exists. Folder names have no extension handling.
pub fn truncate_name(name: &str, is_file: bool) -> String {
    if name.chars().count() <= MAX_NAME_LEN {
        return name.to_string();
    }

    if is_file {
        if let Some((stem, ext)) = split_extension(name) {
            let ext_len = ext.chars().count() + 1; // includes the dot
            if ext_len < MAX_NAME_LEN {
                let stem_budget = MAX_NAME_LEN - ext_len;
                let stem: String = stem.chars().take(stem_budget).collect();
                return format!("{stem}.{ext}");
            }
        }
    }

    name.chars().take(MAX_NAME_LEN).collect()
}

/// Build a sibling-unique variant of `name` by appending `" (n)"` before
/// the extension, incrementing n until no case-insensitive collision
/// remains. `taken` holds the existing sibling names.
pub fn unique_name<'a, I>(name: &str, is_file: bool, taken: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let lowered: Vec<String> = taken.into_iter().map(|n| n.to_lowercase()).collect();
    let collides = |candidate: &str| lowered.iter().any(|t| t == &candidate.to_lowercase());

    if !collides(name) {
        return name.to_string();
    }

    let (stem, ext) = if is_file {
        match split_extension(name) {
            Some((stem, ext)) => (stem.to_string(), Some(ext.to_string())),
            None => (name.to_string(), None),
        }
    } else {
        (name.to_string(), None)
    };

    let mut n = 1u32;
    loop {
        let candidate = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        if !collides(&candidate) {
            return truncate_name(&candidate, is_file);
        }
        n += 1;
    }
}

/// Split `"archive.tar.gz"` into `("archive.tar", "gz")`. Returns `None`
/// for names without a usable extension (no dot, leading dot only).
fn split_extension(name: &str) -> Option<(&str, &str)> {
    let dot = name.rfind('.')?;
    if dot == 0 || dot == name.len() - 1 {
        return None;
    }
    Some((&name[..dot], &name[dot + 1..]))
}

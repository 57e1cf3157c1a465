//! Work ID generation
//!
//! Work ids use the format `{6-char-hex}-{slug}`, e.g. `019a3f-fix-auth`.
//! Task ids are derived from them as `{work-id}.{n}`.

/// Generate a work ID from a human name
pub fn generate_work_id(name: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    format!("{}-{}", hex_prefix, slugify(name))
}

/// Slugify a name for use in IDs
fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_work_id() {
        let id = generate_work_id("Fix Auth Flow");
        assert!(id.len() > 7);
        assert!(id.ends_with("-fix-auth-flow"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Multiple   Spaces"), "multiple-spaces");
        assert_eq!(slugify("don't stop"), "dont-stop");
        assert_eq!(slugify("Add OAuth!"), "add-oauth");
    }

    #[test]
    fn test_ids_are_unique() {
        let a = generate_work_id("same");
        let b = generate_work_id("same");
        assert_ne!(a, b);
    }
}

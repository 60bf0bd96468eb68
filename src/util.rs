use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "cloudwatchmetricbeat.json";

pub fn get_default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Convert a CamelCase identifier to snake_case.
///
/// Acronyms are lower-cased as a whole and only separated from their
/// neighbours at a case boundary, so `SnakeIDGoogle` becomes `snake_id_google`
/// and `OMGWTFBBQ` stays a single word.
pub fn to_snake(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_uppercase() {
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let prev_is_lower = chars[i - 1].is_lowercase();
            if next_is_lower || prev_is_lower {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }

    out
}

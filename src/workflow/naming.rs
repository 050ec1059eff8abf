use crate::config::NamingConfig;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum NamingError {
    #[error("Detection name '{0}' has no coordinate sign delimiter")]
    NoDelimiter(String),
}

/// Public release name of a working detection name.
///
/// `SoFiA J123456.7-654321.0` becomes `WALLABY J123456-654321` for a project that truncates
/// precision. Converting an already converted name returns it unchanged.
pub fn release_name(name: &str, naming: &NamingConfig) -> Result<String, NamingError> {
    let converted = name
        .replace(naming.pipeline_prefix.as_str(), &naming.project)
        .replace('_', " ");
    let converted = converted.trim();

    let (head, coords) = match converted.rfind(char::is_whitespace) {
        Some(i) => converted.split_at(i + 1),
        None => ("", converted),
    };

    let sign_at = coords
        .find(|c: char| c == '+' || c == '-')
        .ok_or_else(|| NamingError::NoDelimiter(name.to_string()))?;
    let (left, rest) = coords.split_at(sign_at);
    let delimiter = &rest[..1];
    let right = &rest[1..];

    let (left, right) = if naming.truncate_precision {
        (before_dot(left), before_dot(right))
    } else {
        (left, right)
    };

    Ok(format!("{}{}{}{}", head, left, delimiter, right))
}

fn before_dot(part: &str) -> &str {
    part.split('.').next().unwrap_or(part)
}

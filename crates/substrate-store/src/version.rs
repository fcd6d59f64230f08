use substrate_core::{SubstrateError, ValidationCategory};

/// Parses a plan version string. Rejects non-positive and non-integer input,
/// mirroring the `parseVersion` contract the round-trip property is stated
/// against.
pub fn parse_version(raw: &str) -> Result<u32, SubstrateError> {
    let parsed: i64 = raw.trim().parse().map_err(|_| {
        SubstrateError::validation(
            ValidationCategory::Schema,
            "version",
            format!("`{raw}` is not an integer"),
        )
    })?;
    if parsed <= 0 {
        return Err(SubstrateError::validation(
            ValidationCategory::Schema,
            "version",
            format!("version must be positive, got {parsed}"),
        ));
    }
    Ok(parsed as u32)
}

pub fn get_next_version(raw: &str) -> Result<String, SubstrateError> {
    Ok((parse_version(raw)? + 1).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_next_version() {
        assert_eq!(get_next_version("3").unwrap(), "4");
        assert_eq!(parse_version(&get_next_version("3").unwrap()).unwrap(), 4);
    }

    #[test]
    fn rejects_non_positive_and_non_integer_input() {
        assert!(parse_version("0").is_err());
        assert!(parse_version("-1").is_err());
        assert!(parse_version("v3").is_err());
        assert!(parse_version("3.5").is_err());
    }
}

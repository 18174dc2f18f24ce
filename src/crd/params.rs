//! Parameter validators for `VolumeModifyClaim`/`VolumeModifyContent` (spec.md §4.7.2).

use super::common::Parameters;
use crate::error::{Error, Result};

/// Inclusive bounds for `metroPairSyncSpeed`, driver-defined (spec.md §4.7.2).
/// Kept as constants here rather than threaded through `Config` because the
/// spec describes them as intrinsic to the parameter's semantics, not an
/// operator-tunable.
pub const SPEED_LOW: i64 = 1;
pub const SPEED_HIGHEST: i64 = 9;

const SUPPORTED_KEYS: &[&str] = &["hyperMetro", "metroPairSyncSpeed"];

/// Validate `spec.parameters` against the supported-key list and the
/// per-key validators table (spec.md §4.7 step 2 / §4.8 step 2).
pub fn validate(parameters: &Parameters) -> Result<()> {
    if parameters.is_empty() {
        return Err(Error::Validation("parameters must not be empty".into()));
    }

    for key in parameters.keys() {
        if !SUPPORTED_KEYS.contains(&key.as_str()) {
            return Err(Error::Validation(format!("unsupported parameter key '{key}'")));
        }
    }

    if let Some(hyper_metro) = parameters.get("hyperMetro") {
        if hyper_metro != "true" {
            return Err(Error::Validation(
                "hyperMetro must equal \"true\"".into(),
            ));
        }
    }

    if let Some(speed) = parameters.get("metroPairSyncSpeed") {
        let value: i64 = speed
            .parse()
            .map_err(|_| Error::Validation(format!("metroPairSyncSpeed '{speed}' is not an integer")))?;
        if !(SPEED_LOW..=SPEED_HIGHEST).contains(&value) {
            return Err(Error::Validation(format!(
                "metroPairSyncSpeed must be in [{SPEED_LOW}, {SPEED_HIGHEST}]"
            )));
        }
        if parameters.get("hyperMetro").map(String::as_str) != Some("true") {
            return Err(Error::Validation(
                "metroPairSyncSpeed requires hyperMetro=\"true\" in the same map".into(),
            ));
        }
    }

    Ok(())
}

/// Validate a `spec.source.name` naming a `StorageClass` (spec.md §9 open
/// question: storage classes are cluster-scoped, so a `namespace/name`
/// shaped string is rejected at the API boundary rather than silently
/// split like the namespaced refs elsewhere in this crate).
pub fn validate_storage_class_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("source.name must not be empty".into()));
    }
    if name.contains('/') {
        return Err(Error::Validation(format!(
            "storage class name '{name}' must be a bare name, not namespace/name"
        )));
    }
    Ok(())
}

/// Reverse the mutable parameters for a rollback `ModifyVolume` call
/// (spec.md §4.8 delete pipeline): `hyperMetro=true -> hyperMetro=false`,
/// other keys omitted.
pub fn rollback_parameters(parameters: &Parameters) -> Parameters {
    let mut out = Parameters::new();
    if parameters.get("hyperMetro").map(String::as_str) == Some("true") {
        out.insert("hyperMetro".to_string(), "false".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn rejects_empty_parameters() {
        assert!(validate(&Parameters::new()).is_err());
    }

    #[test]
    fn rejects_unknown_key() {
        assert!(validate(&params(&[("bogus", "x")])).is_err());
    }

    #[test]
    fn rejects_speed_without_hyper_metro() {
        assert!(validate(&params(&[("metroPairSyncSpeed", "5")])).is_err());
    }

    #[test]
    fn rejects_speed_out_of_range() {
        assert!(validate(&params(&[("hyperMetro", "true"), ("metroPairSyncSpeed", "50")])).is_err());
    }

    #[test]
    fn accepts_hyper_metro_alone() {
        assert!(validate(&params(&[("hyperMetro", "true")])).is_ok());
    }

    #[test]
    fn accepts_valid_speed_with_hyper_metro() {
        assert!(validate(&params(&[("hyperMetro", "true"), ("metroPairSyncSpeed", "5")])).is_ok());
    }

    #[test]
    fn rejects_namespaced_storage_class_name() {
        assert!(validate_storage_class_name("ns/sc1").is_err());
    }

    #[test]
    fn accepts_bare_storage_class_name() {
        assert!(validate_storage_class_name("sc1").is_ok());
    }

    #[test]
    fn rollback_flips_hyper_metro_and_drops_other_keys() {
        let rolled = rollback_parameters(&params(&[
            ("hyperMetro", "true"),
            ("metroPairSyncSpeed", "5"),
        ]));
        assert_eq!(rolled.get("hyperMetro").map(String::as_str), Some("false"));
        assert_eq!(rolled.len(), 1);
    }
}

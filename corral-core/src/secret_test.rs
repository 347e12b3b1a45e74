use anyhow::Result;

use super::*;

#[test]
fn populated_secret_round_trips() -> Result<()> {
    let secret = Secret {
        encryption: "AES256".into(),
        encoding: "Base64".into(),
        value: "dGVzdFNB".into(),
    };
    let yaml = serde_yaml::to_string(&secret)?;
    let parsed: Secret = serde_yaml::from_str(&yaml)?;
    assert!(parsed == secret, "round-tripped secret differs, got {:?}, expected {:?}", parsed, secret);
    Ok(())
}

#[test]
fn zero_secret_serializes_without_keys() -> Result<()> {
    let secret = Secret::default();
    let yaml = serde_yaml::to_string(&secret)?;
    assert!(
        !yaml.contains("encryption") && !yaml.contains("encoding") && !yaml.contains("value"),
        "zero-valued secret must omit all keys, got {}",
        yaml
    );
    Ok(())
}

#[test]
fn is_zero_detects_any_populated_field() {
    assert!(Secret::default().is_zero(), "default secret must be zero");
    let with_value = Secret { value: "x".into(), ..Default::default() };
    assert!(!with_value.is_zero(), "secret with a value must not be zero");
    assert!(Existing::default().is_zero(), "default existing ref must be zero");
    let named = Existing { name: "backup-creds".into(), ..Default::default() };
    assert!(!named.is_zero(), "existing ref with a name must not be zero");
}

#[test]
fn existing_internal_name_uses_original_key() -> Result<()> {
    let existing = Existing {
        name: "creds".into(),
        key: "serviceaccountjson".into(),
        internal_name: "sa.json".into(),
    };
    let yaml = serde_yaml::to_string(&existing)?;
    assert!(yaml.contains("internalName"), "expected internalName key in {}", yaml);
    let parsed: Existing = serde_yaml::from_str(&yaml)?;
    assert!(parsed == existing, "round-tripped existing ref differs");
    Ok(())
}

use anyhow::Result;

use super::*;
use crate::error::PlanningError;

#[test]
fn tree_parses_header_and_keeps_spec_raw() -> Result<()> {
    let tree = Tree::from_yaml(
        "kind: databases.caos.ch/BucketBackup\nversion: v0\nspec:\n  cron: 0 * * * *\n  bucket: backups\n",
    )?;
    assert!(
        tree.common.kind == "databases.caos.ch/BucketBackup",
        "unexpected kind parsed, got {}",
        tree.common.kind
    );
    assert!(tree.common.version == "v0", "unexpected version parsed, got {}", tree.common.version);
    assert!(!tree.common.verbose, "verbose must default to false");
    assert!(tree.kind()? == Kind::BucketBackup, "kind() must resolve the bucket backup adapter");
    assert!(!tree.spec.is_null(), "spec block must be retained");
    Ok(())
}

#[test]
fn unknown_kind_is_a_hard_error() -> Result<()> {
    let tree = Tree::from_yaml("kind: databases.caos.ch/Postgres\nversion: v0\n")?;
    match tree.kind() {
        Err(PlanningError::UnknownKind(kind)) => {
            assert!(kind == "databases.caos.ch/Postgres", "unexpected kind in error, got {}", kind);
        }
        other => panic!("expected unknown kind error, got {:?}", other),
    }
    Ok(())
}

#[test]
fn document_list_preserves_order() -> Result<()> {
    let trees = Tree::list_from_yaml(
        "- kind: databases.caos.ch/CockroachDB\n  version: v0\n- kind: databases.caos.ch/BucketBackup\n  version: v0\n",
    )?;
    assert!(trees.len() == 2, "expected 2 documents, got {}", trees.len());
    assert!(trees[0].kind()? == Kind::CockroachDb, "database document must stay first");
    assert!(trees[1].kind()? == Kind::BucketBackup, "backup document must stay second");
    Ok(())
}

#[test]
fn kind_strings_round_trip() -> Result<()> {
    for kind in &[Kind::CockroachDb, Kind::BucketBackup, Kind::S3Backup, Kind::ProvidedDatabase] {
        let parsed = Kind::parse(kind.as_str())?;
        assert!(parsed == *kind, "kind string round trip failed for {}", kind);
    }
    Ok(())
}

#[test]
fn header_only_document_serializes_without_spec() -> Result<()> {
    let tree = Tree {
        common: Common {
            kind: Kind::BucketBackup.as_str().into(),
            version: "v0".into(),
            verbose: false,
        },
        spec: serde_yaml::Value::Null,
    };
    let yaml = serde_yaml::to_string(&tree)?;
    assert!(!yaml.contains("spec"), "null spec must be omitted, got {}", yaml);
    assert!(!yaml.contains("verbose"), "false verbose must be omitted, got {}", yaml);
    Ok(())
}

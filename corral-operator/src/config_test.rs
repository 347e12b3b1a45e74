use anyhow::Result;

use crate::backup::Feature;
use crate::config::Config;

#[test]
fn config_deserializes_from_full_env() -> Result<()> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "error".into()),
        ("NAMESPACE".into(), "default".into()),
        ("DESIRED_STATE_PATH".into(), "/etc/corral/desired.yaml".into()),
        ("RECONCILE_INTERVAL_SECONDS".into(), "30".into()),
        ("DESTROY".into(), "true".into()),
        ("FEATURES".into(), "database,backup,restore".into()),
        ("CLUSTER_DNS".into(), "cluster.internal".into()),
        ("GENERATE_NODE_CERTS".into(), "false".into()),
        ("REUSE_CLIENT_CERTS".into(), "true".into()),
    ])?;

    assert!(config.rust_log == "error", "unexpected value parsed for RUST_LOG, got {}", config.rust_log);
    assert!(config.namespace == "default", "unexpected value parsed for NAMESPACE, got {}", config.namespace);
    assert!(
        config.desired_state_path == "/etc/corral/desired.yaml",
        "unexpected value parsed for DESIRED_STATE_PATH, got {}",
        config.desired_state_path
    );
    assert!(
        config.reconcile_interval_seconds == 30,
        "unexpected value parsed for RECONCILE_INTERVAL_SECONDS, got {}",
        config.reconcile_interval_seconds
    );
    assert!(config.destroy, "unexpected value parsed for DESTROY, got {}", config.destroy);
    assert!(
        config.features == vec![Feature::Database, Feature::Backup, Feature::Restore],
        "unexpected value parsed for FEATURES, got {:?}",
        config.features
    );
    assert!(config.cluster_dns == "cluster.internal", "unexpected value parsed for CLUSTER_DNS, got {}", config.cluster_dns);
    assert!(!config.generate_node_certs, "unexpected value parsed for GENERATE_NODE_CERTS, got {}", config.generate_node_certs);
    assert!(config.reuse_client_certs, "unexpected value parsed for REUSE_CLIENT_CERTS, got {}", config.reuse_client_certs);
    Ok(())
}

#[test]
fn config_deserializes_from_sparse_env() -> Result<()> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "info".into()),
        ("NAMESPACE".into(), "default".into()),
        ("DESIRED_STATE_PATH".into(), "/etc/corral/desired.yaml".into()),
    ])?;

    assert!(
        config.reconcile_interval_seconds == 60,
        "unexpected default for RECONCILE_INTERVAL_SECONDS, got {}",
        config.reconcile_interval_seconds
    );
    assert!(!config.destroy, "unexpected default for DESTROY, got {}", config.destroy);
    assert!(
        config.features == vec![Feature::Database, Feature::Backup],
        "unexpected default for FEATURES, got {:?}",
        config.features
    );
    assert!(config.cluster_dns == "cluster.local", "unexpected default for CLUSTER_DNS, got {}", config.cluster_dns);
    assert!(config.generate_node_certs, "unexpected default for GENERATE_NODE_CERTS, got {}", config.generate_node_certs);
    assert!(!config.reuse_client_certs, "unexpected default for REUSE_CLIENT_CERTS, got {}", config.reuse_client_certs);
    Ok(())
}

#[test]
fn unknown_feature_tags_fail_validation() -> Result<()> {
    let res: Result<Config, envy::Error> = envy::from_iter(vec![
        ("RUST_LOG".into(), "info".into()),
        ("NAMESPACE".into(), "default".into()),
        ("DESIRED_STATE_PATH".into(), "/etc/corral/desired.yaml".into()),
        ("FEATURES".into(), "backup,bakcup".into()),
    ]);
    let err = match res {
        Err(err) => err.to_string(),
        Ok(_) => panic!("expected a typoed feature tag to fail validation"),
    };
    assert!(err.contains("unknown feature bakcup"), "unexpected error, got {}", err);
    Ok(())
}

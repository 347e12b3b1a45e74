use anyhow::Result;

use super::*;
use crate::backup::Feature;
use crate::config::Config;
use crate::k8s::mock::{Call, MockKube};
use crate::pki::NODE_SECRET_SELECTOR;
use crate::reconcile::{sequence_destroyers, sequence_queriers, Observed};

fn test_config() -> Config {
    Config {
        rust_log: "info".into(),
        namespace: "testNs".into(),
        desired_state_path: "/etc/corral/desired.yaml".into(),
        reconcile_interval_seconds: 60,
        destroy: false,
        features: vec![Feature::Database],
        cluster_dns: "cluster.local".into(),
        generate_node_certs: true,
        reuse_client_certs: false,
    }
}

fn cluster_tree(spec_yaml: &str) -> corral_core::tree::Tree {
    let doc = format!("kind: databases.caos.ch/CockroachDB\nversion: v0\nspec:\n{}", spec_yaml);
    corral_core::tree::Tree::from_yaml(&doc).expect("cluster document must parse")
}

#[tokio::test]
async fn database_feature_plans_the_full_resource_set_in_order() -> Result<()> {
    let kube = MockKube::new();
    let config = test_config();
    let tree = cluster_tree("  replicaCount: 3\n  users:\n    - app\n");
    let mut observed = Observed::default();

    let adapted = adapt(&tree, &config, &config.features)?;
    let ensurer = sequence_queriers(false, &adapted.queriers, &kube, &mut observed).await?;

    assert!(observed.database().is_ok(), "the cluster adapter must register the database current state");
    assert!(
        kube.calls() == vec![Call::ListSecrets(NODE_SECRET_SELECTOR.into())],
        "planning must only read, got {:?}",
        kube.calls()
    );

    ensurer.apply(&kube).await?;
    let applies: Vec<Call> = kube.calls().into_iter().skip(1).collect();
    let expected = vec![
        Call::ApplyServiceAccount("cockroachdb".into()),
        Call::ApplyRole("cockroachdb".into()),
        Call::ApplyRoleBinding("cockroachdb".into()),
        Call::ApplyClusterRole("cockroachdb".into()),
        Call::ApplyClusterRoleBinding("cockroachdb".into()),
        Call::ApplySecret("cockroachdb.node".into()),
        Call::ApplySecret("cockroachdb.client.root".into()),
        Call::ApplySecret("cockroachdb.client.app".into()),
        Call::ApplyService("cockroachdb".into()),
        Call::ApplyService("cockroachdb-public".into()),
        Call::ApplyStatefulSet("cockroachdb".into()),
        Call::ApplyPodDisruptionBudget("cockroachdb-budget".into()),
    ];
    assert!(applies == expected, "unexpected apply sequence, got {:?}", applies);
    Ok(())
}

#[tokio::test]
async fn without_the_database_feature_only_registration_happens() -> Result<()> {
    let kube = MockKube::new();
    let config = test_config();
    let tree = cluster_tree("  replicaCount: 1\n");
    let mut observed = Observed::default();

    let adapted = adapt(&tree, &config, &[Feature::Backup])?;
    let ensurer = sequence_queriers(false, &adapted.queriers, &kube, &mut observed).await?;
    ensurer.apply(&kube).await?;

    assert!(observed.database().is_ok(), "registration must happen regardless of the feature set");
    assert!(kube.calls().is_empty(), "no cluster resource may be touched, got {:?}", kube.calls());
    assert!(adapted.destroyers.is_empty(), "nothing was reconciled, so nothing is torn down");
    Ok(())
}

#[tokio::test]
async fn teardown_scales_down_first_and_releases_claims_last() -> Result<()> {
    let kube = MockKube::new();
    let config = test_config();
    let tree = cluster_tree("  replicaCount: 3\n");

    let adapted = adapt(&tree, &config, &config.features)?;
    sequence_destroyers(adapted.destroyers).destroy(&kube).await?;

    let calls = kube.calls();
    assert!(
        calls.first() == Some(&Call::ScaleStatefulSet("cockroachdb".into(), 0)),
        "teardown must scale the cluster down before deleting, got {:?}",
        calls.first()
    );
    assert!(
        calls.last() == Some(&Call::ListPersistentVolumeClaims(builders::cluster_selector())),
        "volume claims must be released last, got {:?}",
        calls.last()
    );
    assert!(
        calls.contains(&Call::DeleteStatefulSet("cockroachdb".into())),
        "teardown must delete the statefulset, got {:?}",
        calls
    );
    assert!(
        calls.contains(&Call::DeleteClusterRoleBinding("cockroachdb".into())),
        "teardown must delete the cluster-scoped rbac, got {:?}",
        calls
    );
    Ok(())
}

#[test]
fn statefulset_joins_all_members_and_mounts_the_node_certs() {
    let spec = Spec {
        replica_count: 3,
        ..Default::default()
    };
    let set = builders::stateful_set("testNs", &spec);

    let spec = set.spec.expect("statefulset must carry a spec");
    assert!(spec.replicas == Some(3), "unexpected replica count, got {:?}", spec.replicas);
    let pod = spec.template.spec.expect("statefulset must carry a pod spec");
    let command = pod.containers[0].command.as_ref().expect("cockroach container must carry a command");
    let start = command.last().expect("command must end with the start invocation");
    assert!(
        start.contains("--join cockroachdb-0.cockroachdb,cockroachdb-1.cockroachdb,cockroachdb-2.cockroachdb"),
        "every member must be joined, got {}",
        start
    );

    let volumes = pod.volumes.expect("pod must mount the node certificates");
    let certs = volumes.iter().find(|volume| volume.name == "certs").expect("certs volume must exist");
    assert!(
        certs.secret.as_ref().and_then(|secret| secret.secret_name.as_deref()) == Some("cockroachdb.node"),
        "certs volume must come from the node secret"
    );

    let claims = spec.volume_claim_templates.expect("statefulset must template a volume claim");
    let storage = claims[0]
        .spec
        .as_ref()
        .and_then(|spec| spec.resources.as_ref())
        .and_then(|resources| resources.requests.as_ref())
        .and_then(|requests| requests.get("storage"));
    assert!(
        storage.map(|quantity| quantity.0.as_str()) == Some("5Gi"),
        "an unset storage capacity must fall back to the default, got {:?}",
        storage
    );
}

use std::path::PathBuf;
use std::time::Duration;

use pickle_harness::config::{DeployStep, HarnessConfig};
use pickle_harness::scenario::{Scenario, BUILTIN_SCENARIOS};

fn crate_file(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(relative)
}

#[test]
fn test_shipped_config_matches_defaults() {
    let shipped = HarnessConfig::load(crate_file("config/harness.toml")).unwrap();
    let defaults = HarnessConfig::default();

    assert_eq!(shipped.deployment.steps, vec![DeployStep::Handover]);
    assert_eq!(shipped.deployment.token.minter, defaults.deployment.token.minter);
    assert_eq!(shipped.deployment.masterchef.pickle_per_block, 1_000_000_000_000);
    assert_eq!(shipped.deployment.masterchef.start_block, 13_560_000);
    assert_eq!(shipped.deployment.handover.masterchef, defaults.deployment.handover.masterchef);
    assert_eq!(shipped.deployment.handover.role, defaults.deployment.handover.role);
    assert_eq!(shipped.deployment.handover.admin_key, "prev-admin");

    assert_eq!(shipped.vault.want, defaults.vault.want);
    assert_eq!(shipped.vault.reward_token, defaults.vault.reward_token);
    assert_eq!(shipped.vault.whale, defaults.vault.whale);
    assert_eq!(shipped.vault.keep_alcx, 2000);
    assert_eq!(
        shipped.vault.harvest_windows,
        vec![Duration::from_secs(15 * 86_400), Duration::from_secs(15 * 86_400)]
    );
    assert!(shipped.vault.existing.jar.is_none());
    assert!(shipped.network.node.is_none());
    assert_eq!(shipped.keystore.env_prefix, "HARNESS_KEY_");
}

#[test]
fn test_saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harness.toml");

    let mut config = HarnessConfig::default();
    config.vault.keep_alcx = 1500;
    config.vault.harvest_windows = vec![Duration::from_secs(3600)];
    config.deployment.steps = vec![DeployStep::Token, DeployStep::Masterchef];
    config.save(&path).unwrap();

    let loaded = HarnessConfig::load(&path).unwrap();
    assert_eq!(loaded.vault.keep_alcx, 1500);
    assert_eq!(loaded.vault.harvest_windows, vec![Duration::from_secs(3600)]);
    assert_eq!(loaded.deployment.steps, vec![DeployStep::Token, DeployStep::Masterchef]);
}

#[test]
fn test_invalid_config_is_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harness.toml");

    let mut config = HarnessConfig::default();
    config.deployment.steps.clear();
    config.save(&path).unwrap();

    assert!(HarnessConfig::load(&path).is_err());
    assert!(HarnessConfig::load(dir.path().join("missing.toml")).is_err());

    let mut config = HarnessConfig::default();
    config.vault.harvest_windows = vec![Duration::from_millis(86_400_500)];
    config.save(&path).unwrap();
    assert!(HarnessConfig::load(&path).is_err());
}

#[test]
fn test_shipped_scenarios_resolve_by_path() {
    for name in ["harvest-rewards", "withdraw-want"] {
        let path = crate_file(&format!("scenarios/{}.toml", name));
        let from_file = Scenario::resolve(&path.to_string_lossy()).unwrap();
        let builtin = Scenario::builtin(name).unwrap();
        assert_eq!(from_file.steps, builtin.steps);
        assert!(BUILTIN_SCENARIOS.contains(&from_file.name.as_str()));
    }
    assert!(Scenario::resolve("no-such-scenario").is_err());
}

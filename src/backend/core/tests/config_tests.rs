//! Loading configuration files from disk.

use std::io::Write;
use std::time::Duration;
use warden_core::prelude::*;

#[test]
fn test_from_file_reads_toml() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
environment = "staging"

[engine]
operation_timeout = "1500ms"
auto_attach = "atomic"

[namespaces]
tenant_prefixes = ["billing", "crm"]
"#
    )
    .unwrap();

    let cfg = WardenConfig::from_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(cfg.environment, "staging");
    assert_eq!(cfg.operation_guard().timeout(), Duration::from_millis(1500));
    assert_eq!(cfg.engine.auto_attach, AutoAttachMode::Atomic);

    let namespaces: Vec<_> = cfg.namespace_policy().unwrap().tenant_namespaces().map(String::from).collect();
    assert!(namespaces.contains(&"crm".to_string()));
    assert!(namespaces.contains(&"tenant".to_string()));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(WardenConfig::from_file(path.to_str().unwrap()).is_err());
}

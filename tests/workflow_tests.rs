use anyhow::Result;
use std::fs;
use std::net::TcpListener;
use testbed::domain::ServiceAlias;
use testbed::infra::config::load_app_config_from;
use testbed::services::{ProvisionedEnvironment, TestEnvironment};
use testbed::test_support::{TestRig, test_config};
use testbed::{EnvironmentError, ServiceAddress};

/// Publishes the database port on a real listener so the socket probe passes.
fn listening_database(rig: &TestRig) -> Result<TcpListener> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    rig.runtime
        .publish("postgres:9.5.1", 5432, listener.local_addr()?.port());
    Ok(listener)
}

#[test]
fn test_database_only_environment() -> Result<()> {
    let rig = TestRig::new();
    let listener = listening_database(&rig)?;
    let config = test_config("cenario-a", &[ServiceAlias::Database]);
    let output_dir = config.output_dir.clone();

    let mut env = ProvisionedEnvironment::provision(config, &rig.collaborators())?;

    assert_eq!(env.aliases(), vec![ServiceAlias::Database]);
    assert_eq!(
        env.service_address(ServiceAlias::Database, 5432)?,
        ServiceAddress::new("127.0.0.1", listener.local_addr()?.port())
    );

    let id = env.registry().get(ServiceAlias::Database).unwrap().id.clone();
    let report = env.finish();

    assert_eq!(report.removed, vec![id.clone()]);
    assert!(report.warnings.is_empty());
    assert_eq!(rig.runtime.ids_for("remove"), vec![id]);
    assert!(output_dir.join("cenario-a.database.log").exists());
    assert!(env.registry().is_empty());

    fs::remove_dir_all(output_dir).ok();
    Ok(())
}

#[test]
fn test_core_server_sees_database_record() -> Result<()> {
    let rig = TestRig::new();
    let _listener = listening_database(&rig)?;
    rig.runtime.publish("stests/opennms", 8980, 18980);
    rig.runtime.publish("stests/opennms", 8101, 18101);

    let config = test_config("cenario-b", &[ServiceAlias::CoreServer]);
    let env = ProvisionedEnvironment::provision(config, &rig.collaborators())?;

    assert_eq!(
        rig.runtime.commands_starting_with("create:"),
        vec!["create:postgres:9.5.1", "create:stests/opennms"]
    );

    let db_name = env
        .container_info(ServiceAlias::Database)
        .unwrap()
        .short_name()
        .to_string();
    let core_id = env.registry().get(ServiceAlias::CoreServer).unwrap().id.clone();
    let spec = rig.runtime.created_spec(&core_id).unwrap();

    assert!(spec.privileged);
    assert_eq!(spec.links, vec![format!("{db_name}:postgres")]);
    assert!(
        spec.volumes
            .iter()
            .any(|v| v.ends_with(":/opennms-docker-overlay"))
    );
    assert!(rig.versions.calls() >= 1);
    assert!(rig.shell.sent_lines().contains(&"feature:list -i".to_string()));
    Ok(())
}

#[test]
fn test_default_set_spawns_in_fixed_order() -> Result<()> {
    let rig = TestRig::new();
    let _listener = listening_database(&rig)?;
    rig.runtime.publish("stests/opennms", 8980, 18980);
    rig.runtime.publish("stests/opennms", 8101, 18101);
    rig.runtime.publish("stests/minion", 8201, 18201);

    let config = test_config("padrao", &[]);
    let env = ProvisionedEnvironment::provision(config, &rig.collaborators())?;

    assert_eq!(
        rig.runtime.commands_starting_with("create:"),
        vec![
            "create:postgres:9.5.1",
            "create:stests/opennms",
            "create:stests/snmpd",
            "create:stests/tomcat",
            "create:stests/minion",
        ]
    );
    assert_eq!(env.aliases().len(), 5);
    assert!(rig.shell.sent_lines().contains(&"minion:ping".to_string()));

    let agent_id = env.registry().get(ServiceAlias::Agent).unwrap().id.clone();
    let spec = rig.runtime.created_spec(&agent_id).unwrap();
    assert!(spec.env.contains(&"MINION_ID=padrao-agent".to_string()));
    assert!(spec.env.contains(&"MINION_LOCATION=MINION".to_string()));
    assert!(spec.links.iter().any(|l| l.ends_with(":snmpd")));
    assert!(spec.links.iter().any(|l| l.ends_with(":tomcat")));
    Ok(())
}

#[test]
fn test_sentinel_spawns_after_core_server_is_ready() -> Result<()> {
    let rig = TestRig::new();
    rig.shell.journal_to(rig.runtime.clone());
    let _listener = listening_database(&rig)?;
    rig.runtime.publish("stests/opennms", 8980, 18980);
    rig.runtime.publish("stests/opennms", 8101, 18101);
    rig.runtime.publish("stests/sentinel", 8301, 18301);

    let config = test_config("sentinela", &[ServiceAlias::Sentinel]);
    let env = ProvisionedEnvironment::provision(config, &rig.collaborators())?;

    let commands = rig.runtime.get_commands();
    let position = |wanted: &str| commands.iter().position(|c| c == wanted);
    let core_created = position("create:stests/opennms").unwrap();
    let sentinel_created = position("create:stests/sentinel").unwrap();
    let first_feature_list = position("shell:feature:list -i").unwrap();
    let first_logout = position("shell:logout").unwrap();

    // The core server's shell round trip finished before the sentinel existed
    assert!(core_created < first_feature_list);
    assert!(first_logout < sentinel_created);
    // ...and the sentinel got its own round trip afterwards
    let feature_lists: Vec<usize> = commands
        .iter()
        .enumerate()
        .filter(|(_, c)| *c == "shell:feature:list -i")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(feature_lists.len(), 2);
    assert!(feature_lists[1] > sentinel_created);

    let sentinel_id = env.registry().get(ServiceAlias::Sentinel).unwrap().id.clone();
    let links = rig.runtime.created_spec(&sentinel_id).unwrap().links;
    assert!(links.iter().any(|l| l.ends_with(":postgres")));
    assert!(links.iter().any(|l| l.ends_with(":opennms")));
    Ok(())
}

#[test]
fn test_teardown_is_reverse_of_creation() -> Result<()> {
    let rig = TestRig::new();
    let config = test_config("reverso", &[ServiceAlias::SupportServer, ServiceAlias::JmxSim, ServiceAlias::TcpAgentSim]);

    let mut env = ProvisionedEnvironment::provision(config, &rig.collaborators())?;
    let created = env.registry().creation_order().to_vec();
    assert_eq!(created.len(), 3);

    env.finish();

    let mut reversed = created.clone();
    reversed.reverse();
    assert_eq!(rig.runtime.ids_for("stop"), reversed);
    assert_eq!(rig.runtime.ids_for("remove"), reversed);
    // Logs are harvested in creation order
    assert_eq!(rig.runtime.ids_for("logs"), created);
    Ok(())
}

#[test]
fn test_failed_start_still_tears_down() -> Result<()> {
    let rig = TestRig::new();
    rig.runtime.set_fail_on("start");
    let config = test_config("falha", &[ServiceAlias::JmxSim]);

    let result = ProvisionedEnvironment::provision(config, &rig.collaborators());

    assert!(matches!(
        result,
        Err(EnvironmentError::Spawn {
            alias: ServiceAlias::JmxSim,
            ..
        })
    ));
    let started = rig.runtime.ids_for("start");
    assert_eq!(started.len(), 1);
    assert_eq!(rig.runtime.ids_for("remove"), started);
    assert!(!rig.runtime.container_exists(&started[0]));
    Ok(())
}

#[test]
fn test_readiness_timeout_tears_down_partial_environment() -> Result<()> {
    let rig = TestRig::new();
    // Nobody listens here
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    rig.runtime.publish("postgres:9.5.1", 5432, closed_port);

    let config = test_config("lento", &[ServiceAlias::Database, ServiceAlias::JmxSim]);
    let result = ProvisionedEnvironment::provision(config, &rig.collaborators());

    let timeout = match result {
        Err(EnvironmentError::Timeout(timeout)) => timeout,
        Err(other) => panic!("esperava timeout, obteve {other}"),
        Ok(_) => panic!("esperava timeout"),
    };
    assert!(timeout.condition.contains("database"));
    assert!(timeout.last_failure.is_some());
    assert_eq!(rig.runtime.ids_for("remove").len(), 2);
    Ok(())
}

#[test]
fn test_keep_running_harvests_logs_only() -> Result<()> {
    let rig = TestRig::new();
    let mut config = test_config("inspecao", &[ServiceAlias::JmxSim]);
    config.skip_teardown = true;
    let output_dir = config.output_dir.clone();

    let mut env = ProvisionedEnvironment::provision(config, &rig.collaborators())?;
    let id = env.registry().get(ServiceAlias::JmxSim).unwrap().id.clone();
    rig.runtime.set_logs(&id, "tomcat iniciado\n");

    let report = env.finish();
    drop(env);

    assert!(report.kept_running);
    assert!(rig.runtime.ids_for("stop").is_empty());
    assert!(rig.runtime.ids_for("remove").is_empty());
    assert!(rig.runtime.is_running(&id));
    assert_eq!(
        fs::read_to_string(output_dir.join("inspecao.jmx-sim.log"))?,
        "tomcat iniciado\n"
    );

    fs::remove_dir_all(output_dir).ok();
    Ok(())
}

#[test]
fn test_drop_tears_down_once() -> Result<()> {
    let rig = TestRig::new();
    let config = test_config("drop", &[ServiceAlias::SupportServer]);

    {
        let _env = ProvisionedEnvironment::provision(config, &rig.collaborators())?;
    }

    assert_eq!(rig.runtime.ids_for("remove").len(), 1);
    Ok(())
}

#[test]
fn test_environment_from_config_file() -> Result<()> {
    let config_dir = tempfile::tempdir()?;
    let local_dir = tempfile::tempdir()?;
    let output_dir = tempfile::tempdir()?;

    let toml = format!(
        r#"
[environment]
name = "arquivo"
aliases = ["support-server"]
advertised_host = "127.0.0.1"

[paths]
output_dir = "{}"

[images]
support-server = "snmpd:teste"

[timeouts.port_release]
timeout = "100ms"
poll = "1ms"
"#,
        output_dir.path().display()
    );
    fs::write(config_dir.path().join("testbed.toml"), toml)?;

    let config = load_app_config_from(config_dir.path(), local_dir.path())?
        .into_environment_config()?;
    assert_eq!(config.enabled.len(), 1);

    let rig = TestRig::new();
    let mut env = ProvisionedEnvironment::provision(config, &rig.collaborators())?;
    assert_eq!(
        rig.runtime.commands_starting_with("create:"),
        vec!["create:snmpd:teste"]
    );

    let spec = rig
        .runtime
        .created_spec(&env.registry().creation_order()[0])
        .unwrap();
    assert_eq!(spec.hostname.as_deref(), Some("arquivo.local"));

    env.finish();
    assert!(output_dir.path().join("arquivo.support-server.log").exists());
    Ok(())
}

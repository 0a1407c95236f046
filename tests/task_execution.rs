//! Integration tests for task execution

mod common;

use common::{args, fake_executor, fake_executor_with_secrets, FailingSecrets, FixedSecrets};
use runbook::error::{
    ArgumentError, CycleError, DispatchError, ExecutionError, RunbookError, SecretError,
    SubstitutionError,
};
use runbook::manifest::{ManifestLoader, StepKind};
use runbook::runner::{Executor, InterpreterRegistry, RecordingReporter};
use runbook::secrets::SecretRegistry;
use runbook::Settings;
use std::collections::BTreeMap;

#[test]
fn test_execute_simple_task() {
    let (_dir, path) = common::create_test_manifest(
        r#"
tasks:
  hello:
    cmds:
      - echo ${name}
"#,
    );
    let manifest = ManifestLoader::new().unwrap().load(&path).unwrap();
    let reporter = RecordingReporter::new();
    let executor = Executor::new(manifest, Settings::default()).with_reporter(reporter.clone());

    executor.run("hello", args(&[("name", "world")])).unwrap();

    assert_eq!(reporter.output().last().unwrap(), "world");
    assert_eq!(reporter.steps(), vec!["[1/1] $ echo world"]);
}

#[test]
fn test_execute_failing_command() {
    let (executor, launcher, _) = fake_executor(
        r#"
tasks:
  build:
    cmds:
      - make deps
      - make all
      - make install
"#,
    );
    launcher.respond("make all", 2, &[]);

    let err = executor.run("build", BTreeMap::new()).unwrap_err();

    assert!(matches!(
        err.root(),
        RunbookError::Execution(ExecutionError::CommandFailed(Some(2)))
    ));
    assert_eq!(err.to_string(), "task 'build' failed at step 2/3");
    assert_eq!(launcher.commands(), vec!["make deps", "make all"]);
}

#[test]
fn test_task_not_found() {
    let (executor, _, _) = fake_executor("tasks: {}\n");
    let err = executor.run("missing", BTreeMap::new()).unwrap_err();
    assert!(matches!(err, RunbookError::TaskNotFound(name) if name == "missing"));
}

#[test]
fn test_hierarchical_step_labels() {
    let (executor, _, reporter) = fake_executor(
        r#"
tasks:
  parent:
    cmds:
      - echo first
      - task: child
      - echo last
  child:
    cmds:
      - echo c1
      - echo c2
"#,
    );

    executor.run("parent", BTreeMap::new()).unwrap();

    assert_eq!(
        reporter.steps(),
        vec![
            "[1/3] $ echo first",
            "[2/3] > task: child",
            "[2.1/2] $ echo c1",
            "[2.2/2] $ echo c2",
            "[3/3] $ echo last",
        ]
    );
}

#[test]
fn test_self_reference_is_a_cycle() {
    let (executor, launcher, _) = fake_executor(
        r#"
tasks:
  a:
    cmds:
      - echo before
      - task: a
"#,
    );

    let err = executor.run("a", BTreeMap::new()).unwrap_err();
    match err.root() {
        RunbookError::Cycle(CycleError::CircularReference { task, chain }) => {
            assert_eq!(task, "a");
            assert_eq!(chain, "a -> a");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(launcher.commands(), vec!["echo before"]);
}

#[test]
fn test_indirect_cycle() {
    let (executor, _, _) = fake_executor(
        r#"
tasks:
  a:
    cmds: [{task: b}]
  b:
    cmds: [{uses: a}]
"#,
    );

    let err = executor.run("a", BTreeMap::new()).unwrap_err();
    match err.root() {
        RunbookError::Cycle(CycleError::CircularReference { chain, .. }) => {
            assert_eq!(chain, "a -> b -> a")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_diamond_runs_shared_task_twice() {
    let (executor, launcher, reporter) = fake_executor(
        r#"
tasks:
  a:
    cmds:
      - task: b
      - task: c
  b:
    cmds: [{task: d}]
  c:
    cmds: [{task: d}]
  d:
    cmds: ["echo d"]
"#,
    );

    executor.run("a", BTreeMap::new()).unwrap();

    assert_eq!(launcher.commands(), vec!["echo d", "echo d"]);
    assert_eq!(reporter.started(), vec!["a", "b", "d", "c", "d"]);
}

#[test]
fn test_missing_required_argument() {
    let (executor, launcher, _) = fake_executor(
        r#"
tasks:
  greet:
    args:
      - name: name
    cmds:
      - echo ${name}
"#,
    );

    let err = executor.run("greet", BTreeMap::new()).unwrap_err();
    assert!(matches!(
        err.root(),
        RunbookError::Argument(ArgumentError::MissingRequired { name, .. }) if name == "name"
    ));
    assert!(launcher.launched().is_empty());
}

#[test]
fn test_supplied_argument_overrides_default() {
    let (executor, launcher, _) = fake_executor(
        r#"
tasks:
  greet:
    args:
      - name: who
        default: World
    cmds:
      - echo Hello ${who}
"#,
    );

    executor.run("greet", BTreeMap::new()).unwrap();
    executor.run("greet", args(&[("who", "Rust")])).unwrap();

    assert_eq!(launcher.commands(), vec!["echo Hello World", "echo Hello Rust"]);
}

#[test]
fn test_invalid_argument_type() {
    let (executor, _, _) = fake_executor(
        r#"
tasks:
  scale:
    args:
      - name: replicas
        type: number
    cmds: ["kubectl scale --replicas=${replicas}"]
"#,
    );

    let err = executor.run("scale", args(&[("replicas", "many")])).unwrap_err();
    assert!(matches!(
        err.root(),
        RunbookError::Argument(ArgumentError::InvalidValue { .. })
    ));
}

#[test]
fn test_subtask_inherits_arguments() {
    let (executor, launcher, _) = fake_executor(
        r#"
tasks:
  release:
    args:
      - name: version
    cmds:
      - task: tag
  tag:
    args:
      - name: version
        default: "0.0.0"
    cmds:
      - git tag v${version}
"#,
    );

    executor.run("release", args(&[("version", "1.2.3")])).unwrap();
    assert_eq!(launcher.commands(), vec!["git tag v1.2.3"]);
}

#[test]
fn test_uses_overrides_arguments() {
    let (executor, launcher, _) = fake_executor(
        r#"
tasks:
  deploy-all:
    args:
      - name: region
        default: eu
    cmds:
      - uses: deploy
        args:
          target: staging
      - uses: deploy
        args:
          target: prod-${region}
  deploy:
    args:
      - name: target
    cmds:
      - ./deploy.sh ${target} ${region}
"#,
    );

    executor.run("deploy-all", BTreeMap::new()).unwrap();
    assert_eq!(
        launcher.commands(),
        vec!["./deploy.sh staging eu", "./deploy.sh prod-eu eu"]
    );
}

#[test]
fn test_nested_variable_resolution() {
    let (executor, launcher, _) = fake_executor(
        r#"
environment:
  FOO: ${BAR}
  BAR: baz
tasks:
  show:
    cmds: ["echo ${FOO}"]
"#,
    );

    executor.run("show", BTreeMap::new()).unwrap();
    assert_eq!(launcher.commands(), vec!["echo baz"]);

    let env = &launcher.launched()[0].env;
    assert_eq!(env["FOO"], "baz");
}

#[test]
fn test_undefined_variable() {
    let (executor, launcher, _) = fake_executor(
        r#"
tasks:
  show:
    cmds: ["echo ${UNSET}"]
"#,
    );

    let err = executor.run("show", BTreeMap::new()).unwrap_err();
    assert_eq!(
        err.root().to_string(),
        SubstitutionError::UndefinedVariable("UNSET".to_string()).to_string()
    );
    assert!(matches!(
        err.root(),
        RunbookError::Substitution(SubstitutionError::UndefinedVariable(name)) if name == "UNSET"
    ));
    assert!(launcher.launched().is_empty());
}

#[test]
fn test_escaped_reference_survives_inheritance() {
    let (executor, launcher, _) = fake_executor(
        r#"
tasks:
  outer:
    environment:
      TEMPLATE: $${HOME_DIR}
    cmds:
      - task: inner
  inner:
    cmds:
      - echo $${TEMPLATE}
"#,
    );

    executor.run("outer", BTreeMap::new()).unwrap();

    let spec = &launcher.launched()[0];
    assert_eq!(spec.args.last().unwrap(), "echo ${TEMPLATE}");
    assert_eq!(spec.env["TEMPLATE"], "${HOME_DIR}");
}

#[test]
fn test_environment_layering() {
    let (executor, launcher, _) = fake_executor(
        r#"
environment:
  LEVEL: global
  KEEP: global
tasks:
  outer:
    environment:
      LEVEL: outer
      FROM_OUTER: "yes"
    cmds: [{task: inner}]
  inner:
    environment:
      LEVEL: inner
    cmds: ["env"]
"#,
    );

    executor.run("outer", BTreeMap::new()).unwrap();

    let env = &launcher.launched()[0].env;
    assert_eq!(env["LEVEL"], "inner");
    assert_eq!(env["KEEP"], "global");
    assert_eq!(env["FROM_OUTER"], "yes");
}

const VAULT_MANIFEST: &str = r#"
vaults:
  primary:
    vault: main
    secrets:
      TOKEN: api-token
  backup:
    vault: fallback
    secrets:
      TOKEN: api-token
tasks:
  leak:
    cmds:
      - echo token=${TOKEN} and ${secrets.TOKEN}
"#;

#[test]
fn test_later_vault_wins() {
    let mut secrets = SecretRegistry::new();
    secrets.register(Box::new(FixedSecrets::new("primary", &[("TOKEN", "first-value")])));
    secrets.register(Box::new(FixedSecrets::new("backup", &[("TOKEN", "second-value")])));
    let (executor, launcher, _) = fake_executor_with_secrets(VAULT_MANIFEST, secrets);

    executor.run("leak", BTreeMap::new()).unwrap();

    assert_eq!(
        launcher.commands(),
        vec!["echo token=second-value and second-value"]
    );
    assert_eq!(launcher.launched()[0].env["TOKEN"], "second-value");
}

#[test]
fn test_secrets_are_masked_in_output() {
    let mut secrets = SecretRegistry::new();
    secrets.register(Box::new(FixedSecrets::new("primary", &[("TOKEN", "hunter2")])));
    secrets.register(Box::new(FixedSecrets::new("backup", &[])));
    let (executor, launcher, reporter) = fake_executor_with_secrets(VAULT_MANIFEST, secrets);
    launcher.respond("echo token", 0, &["token=hunter2 and hunter2"]);

    executor.run("leak", BTreeMap::new()).unwrap();

    assert_eq!(
        reporter.output(),
        vec!["token=<<SENSITIVE>> and <<SENSITIVE>>"]
    );
    assert_eq!(
        reporter.steps(),
        vec!["[1/1] $ echo token=<<SENSITIVE>> and <<SENSITIVE>>"]
    );
}

#[test]
fn test_secrets_are_masked_when_command_fails() {
    let mut secrets = SecretRegistry::new();
    secrets.register(Box::new(FixedSecrets::new("primary", &[("TOKEN", "hunter2")])));
    secrets.register(Box::new(FixedSecrets::new("backup", &[])));
    let (executor, launcher, reporter) = fake_executor_with_secrets(VAULT_MANIFEST, secrets);
    launcher.respond("echo token", 1, &["rejected hunter2", "bye"]);

    let err = executor.run("leak", BTreeMap::new()).unwrap_err();

    assert!(matches!(
        err.root(),
        RunbookError::Execution(ExecutionError::CommandFailed(Some(1)))
    ));
    assert_eq!(reporter.output(), vec!["rejected <<SENSITIVE>>", "bye"]);
    assert!(!format!("{:#}", anyhow::Error::from(err)).contains("hunter2"));
}

#[test]
fn test_secret_fetch_failure_aborts() {
    let mut secrets = SecretRegistry::new();
    secrets.register(Box::new(FixedSecrets::new("primary", &[("TOKEN", "x")])));
    secrets.register(Box::new(FailingSecrets("backup")));
    let (executor, launcher, _) = fake_executor_with_secrets(VAULT_MANIFEST, secrets);

    let err = executor.run("leak", BTreeMap::new()).unwrap_err();

    assert!(matches!(
        err.root(),
        RunbookError::Secret(SecretError::Fetch { provider, .. }) if provider == "backup"
    ));
    assert!(launcher.launched().is_empty());
}

#[test]
fn test_unknown_vault_kind() {
    let (executor, _, _) = fake_executor(
        r#"
vaults:
  azure:
    keyvault_name: prod-kv
    secrets:
      DB_PASSWORD: db-password
tasks:
  migrate:
    cmds: ["./migrate"]
"#,
    );

    let err = executor.run("migrate", BTreeMap::new()).unwrap_err();
    assert!(matches!(
        err.root(),
        RunbookError::Secret(SecretError::UnknownProvider(kind)) if kind == "azure"
    ));
}

#[test]
fn test_secrets_are_masked_in_argument_errors() {
    let mut secrets = SecretRegistry::new();
    secrets.register(Box::new(FixedSecrets::new("fixed", &[("TOKEN", "s3cr3t-value")])));
    let (executor, _, _) = fake_executor_with_secrets(
        r#"
vaults:
  fixed:
    vault: main
    secrets:
      TOKEN: api-token
tasks:
  scale:
    args:
      - name: count
        type: number
    cmds: ["echo ${count}"]
  deploy:
    cmds:
      - uses: scale
        args:
          count: "${secrets.TOKEN}"
"#,
        secrets,
    );

    let err = executor.run("deploy", BTreeMap::new()).unwrap_err();

    assert!(matches!(
        err.root(),
        RunbookError::Argument(ArgumentError::InvalidValue { value, .. }) if value == "<<SENSITIVE>>"
    ));
    let text = format!("{:#}", anyhow::Error::from(err));
    assert!(!text.contains("s3cr3t-value"));
    assert!(text.contains("Invalid value '<<SENSITIVE>>' for number argument 'count'"));
}

#[test]
fn test_secret_values_are_not_expanded() {
    let manifest = r#"
vaults:
  fixed:
    vault: main
    secrets:
      PASS: db-password
tasks:
  hello:
    cmds: ["echo hi"]
  login:
    cmds: ["login --password ${PASS}"]
"#;
    let secrets = || {
        let mut secrets = SecretRegistry::new();
        secrets.register(Box::new(FixedSecrets::new("fixed", &[("PASS", "ab${cd}ef")])));
        secrets
    };

    let (executor, launcher, _) = fake_executor_with_secrets(manifest, secrets());
    executor.run("hello", BTreeMap::new()).unwrap();
    assert_eq!(launcher.commands(), vec!["echo hi"]);
    assert_eq!(launcher.launched()[0].env["PASS"], "ab${cd}ef");

    let (executor, launcher, reporter) = fake_executor_with_secrets(manifest, secrets());
    executor.run("login", BTreeMap::new()).unwrap();
    assert_eq!(launcher.commands(), vec!["login --password ab${cd}ef"]);
    assert_eq!(reporter.steps(), vec!["[1/1] $ login --password <<SENSITIVE>>"]);
}

#[test]
fn test_step_timeout() {
    let (executor, launcher, _) = fake_executor(
        r#"
tasks:
  slow:
    cmds:
      - type: shell
        content:
          command: sleep 100
          timeout: 5
      - echo unreachable
"#,
    );
    launcher.time_out("sleep");

    let err = executor.run("slow", BTreeMap::new()).unwrap_err();
    match err.root() {
        RunbookError::Execution(ExecutionError::Timeout(limit)) => assert_eq!(limit.as_secs(), 5),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(launcher.launched().len(), 1);
}

#[test]
fn test_real_timeout_kills_process() {
    let (dir, path) = common::create_test_manifest(
        r#"
tasks:
  slow:
    cmds:
      - type: shell
        content:
          command: sleep 10
          timeout: 1
"#,
    );
    let manifest = ManifestLoader::new().unwrap().load(&path).unwrap();
    let executor = Executor::new(manifest, Settings::default())
        .with_working_dir(dir.path().to_path_buf())
        .with_reporter(RecordingReporter::new());

    let started = std::time::Instant::now();
    let err = executor.run("slow", BTreeMap::new()).unwrap_err();

    assert!(matches!(
        err.root(),
        RunbookError::Execution(ExecutionError::Timeout(_))
    ));
    assert!(started.elapsed().as_secs() < 8);
}

#[test]
fn test_cancelled_before_first_step() {
    let (executor, launcher, _) = fake_executor(
        r#"
tasks:
  build:
    cmds: ["make"]
"#,
    );
    executor.cancel_flag().cancel();

    let err = executor.run("build", BTreeMap::new()).unwrap_err();
    assert!(matches!(
        err.root(),
        RunbookError::Execution(ExecutionError::Cancelled)
    ));
    assert!(launcher.launched().is_empty());
}

#[test]
fn test_container_step() {
    let (executor, launcher, reporter) = fake_executor(
        r#"
environment:
  STAGE: test
tasks:
  integration:
    cmds:
      - type: docker
        content:
          image: alpine:3.20
          command: sh -c "echo ${STAGE}"
          env:
            EXTRA: "1"
          volumes:
            ./data: /data
          network: host
"#,
    );

    executor.run("integration", BTreeMap::new()).unwrap();

    let spec = &launcher.launched()[0];
    assert_eq!(spec.program, "docker");
    assert_eq!(spec.args[..3], ["run", "--rm", "--name"]);
    assert!(spec.args[3].starts_with("runbook-"));
    assert_eq!(
        spec.args[4..],
        [
            "-e", "EXTRA", "-e", "STAGE", "-v", "./data:/data", "--network", "host",
            "alpine:3.20", "sh", "-c", "echo test",
        ]
    );
    assert_eq!(spec.env["STAGE"], "test");
    assert_eq!(spec.env["EXTRA"], "1");
    assert_eq!(reporter.steps(), vec!["[1/1] > container: alpine:3.20"]);
}

#[test]
fn test_container_removed_after_timeout() {
    let (executor, launcher, _) = fake_executor(
        r#"
tasks:
  integration:
    cmds:
      - type: container
        content:
          image: alpine:3.20
          command: sleep 60
          timeout: 1
"#,
    );
    launcher.time_out("sleep 60");

    let err = executor.run("integration", BTreeMap::new()).unwrap_err();
    assert!(matches!(
        err.root(),
        RunbookError::Execution(ExecutionError::Timeout(_))
    ));

    let launched = launcher.launched();
    assert_eq!(launched.len(), 2);
    let name = launched[0].args[3].clone();
    assert_eq!(launched[1].program, "docker");
    assert_eq!(launched[1].args, vec!["rm".to_string(), "-f".to_string(), name]);
}

#[test]
fn test_script_step() {
    let (executor, launcher, _) = fake_executor(
        r#"
tasks:
  report:
    args:
      - name: who
        default: team
    cmds:
      - type: python
        content:
          script: print("hello ${who}")
          args: ["--verbose"]
"#,
    );

    executor.run("report", BTreeMap::new()).unwrap();

    let spec = &launcher.launched()[0];
    assert_eq!(spec.program, "python3");
    assert_eq!(spec.args, vec!["-c", "print(\"hello team\")", "--verbose"]);
}

#[test]
fn test_no_interpreter_for_kind() {
    let (executor, _, _) = fake_executor(
        r#"
tasks:
  integration:
    cmds:
      - type: container
        content:
          image: alpine
"#,
    );
    let executor = executor.with_interpreters(InterpreterRegistry::new());

    let err = executor.run("integration", BTreeMap::new()).unwrap_err();
    assert!(matches!(
        err.root(),
        RunbookError::Dispatch(DispatchError::NoInterpreterForKind(StepKind::Container))
    ));
}

#[test]
fn test_local_task_beats_imported_task() {
    for imports in ["[first.yml, second.yml]", "[second.yml, first.yml]"] {
        let dir = tempfile::TempDir::new().unwrap();
        common::write_file(dir.path(), "first.yml", "tasks:\n  x:\n    cmds: [\"echo first\"]\n");
        common::write_file(dir.path(), "second.yml", "tasks:\n  x:\n    cmds: [\"echo second\"]\n");
        let root = common::write_file(
            dir.path(),
            "main.runbook.yml",
            &format!("imports: {}\ntasks:\n  x:\n    cmds: [\"echo local\"]\n", imports),
        );

        let launcher = common::FakeLauncher::new();
        let manifest = ManifestLoader::new().unwrap().load(&root).unwrap();
        let executor = Executor::new(manifest, Settings::default())
            .with_launcher(std::sync::Arc::new(launcher.clone()))
            .with_reporter(RecordingReporter::new());

        executor.run("x", BTreeMap::new()).unwrap();
        assert_eq!(launcher.commands(), vec!["echo local"]);
    }
}

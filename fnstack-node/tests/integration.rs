//! Integration tests for the Node runtime
//!
//! Builds run against the fake bundler from `fnstack-test`; workers run
//! `/bin/sh` scripts in place of the Node host.

use fnstack_core::{BuildInput, Diagnostic, FunctionId, Runtime, RuntimeError};
use fnstack_node::options::ESM_SHIM;
use fnstack_node::{Format, NodeRuntime};
use fnstack_test::{init_tracing, shell_host, FakeBundler, TestProject};
use serde_json::json;

fn runtime(project: &TestProject, bundler: &FakeBundler) -> NodeRuntime {
    init_tracing();
    NodeRuntime::with_parts(project.project(), bundler.shared(), shell_host("true"))
}

fn handler_project() -> TestProject {
    let project = TestProject::new();
    project.write(
        "handlers/a.ts",
        "import { greet } from './util.ts';\nexport const post = () => greet('a');\n",
    );
    project.write(
        "handlers/util.ts",
        "export const greet = (name: string) => `hi ${name}`;\n",
    );
    project.write("handlers/unrelated.ts", "export const x = 1;\n");
    project
}

#[tokio::test]
async fn test_build_end_to_end() {
    let project = handler_project();
    let bundler = FakeBundler::new();
    let runtime = runtime(&project, &bundler);
    let id = FunctionId::from("fnA");

    let output = runtime
        .build(&BuildInput::new("fnA", "handlers/a.post"))
        .await
        .unwrap();

    let out_dir = project.path(".fnstack/artifacts/fnA");
    assert_eq!(output.out_dir, out_dir);
    assert_eq!(output.artifact, out_dir.join("handlers/a.mjs"));
    assert!(output.artifact.is_file());
    assert!(output.diagnostics.is_empty());

    assert!(runtime.should_rebuild(&id, &project.path("handlers/util.ts")));
    assert!(runtime.should_rebuild(&id, &project.path("handlers/a.ts")));
    assert!(!runtime.should_rebuild(&id, &project.path("handlers/unrelated.ts")));
    assert!(!runtime.should_rebuild(&FunctionId::from("fnB"), &project.path("handlers/util.ts")));

    let deps = runtime.dependencies(&id).unwrap();
    assert_eq!(
        deps.into_iter().collect::<Vec<_>>(),
        vec![project.path("handlers/a.ts"), project.path("handlers/util.ts")]
    );
}

#[tokio::test]
async fn test_missing_handler_fails_without_writes() {
    let project = handler_project();
    let bundler = FakeBundler::new();
    let runtime = runtime(&project, &bundler);
    let before = project.entries();

    let result = runtime
        .build(&BuildInput::new("fnA", "handlers/missing.post"))
        .await;

    match result {
        Err(RuntimeError::HandlerNotFound(handler)) => assert_eq!(handler, "handlers/missing.post"),
        other => panic!("expected HandlerNotFound, got {other:?}"),
    }
    assert_eq!(project.entries(), before);
    assert!(bundler.contexts().is_empty());
    assert!(!runtime.should_rebuild(&FunctionId::from("fnA"), &project.path("handlers/a.ts")));
}

#[tokio::test]
async fn test_esm_output_carries_shim_before_user_banner() {
    let project = handler_project();
    let bundler = FakeBundler::new();
    let runtime = runtime(&project, &bundler);

    let output = runtime
        .build(
            &BuildInput::new("fnA", "handlers/a.post")
                .with_properties(json!({ "banner": "// user banner" })),
        )
        .await
        .unwrap();

    assert_eq!(output.artifact.extension().unwrap(), "mjs");
    let options = &bundler.contexts()[0];
    assert_eq!(options.format, Format::Esm);

    let banner = options.banner.as_deref().unwrap();
    assert!(banner.starts_with(ESM_SHIM[0]));
    let shim_end = banner.find(ESM_SHIM[4]).unwrap();
    assert!(shim_end < banner.find("// user banner").unwrap());

    let bundle = std::fs::read_to_string(&output.artifact).unwrap();
    assert!(bundle.starts_with(ESM_SHIM[0]));
}

#[tokio::test]
async fn test_cjs_output_has_no_shim() {
    let project = handler_project();
    let bundler = FakeBundler::new();
    let runtime = runtime(&project, &bundler);

    let output = runtime
        .build(
            &BuildInput::new("fnA", "handlers/a.post").with_properties(json!({ "format": "cjs" })),
        )
        .await
        .unwrap();

    assert_eq!(
        output.artifact,
        project.path(".fnstack/artifacts/fnA/handlers/a.cjs")
    );
    let options = &bundler.contexts()[0];
    assert_eq!(options.format, Format::Cjs);
    assert!(options.banner.is_none());

    let bundle = std::fs::read_to_string(&output.artifact).unwrap();
    assert!(!bundle.contains("createRequire"));
}

#[tokio::test]
async fn test_rebuild_reuses_context_and_ignores_new_properties() {
    let project = handler_project();
    let bundler = FakeBundler::new();
    let runtime = runtime(&project, &bundler);

    let first = runtime
        .build(
            &BuildInput::new("fnA", "handlers/a.post").with_properties(json!({ "format": "cjs" })),
        )
        .await
        .unwrap();

    let second = runtime
        .build(&BuildInput::new("fnA", "handlers/a.post").with_properties(json!("garbage")))
        .await
        .unwrap();

    let third = runtime
        .build(
            &BuildInput::new("fnA", "handlers/a.post")
                .with_properties(json!({ "format": 17, "minify": "maybe" })),
        )
        .await
        .unwrap();

    assert_eq!(bundler.contexts().len(), 1);
    assert_eq!(bundler.rebuilds(), 3);
    assert_eq!(first.artifact, second.artifact);
    assert_eq!(second.artifact, third.artifact);
    assert!(third.diagnostics.is_empty());
}

#[tokio::test]
async fn test_diagnostics_are_not_failures() {
    let project = handler_project();
    let bundler = FakeBundler::new();
    let runtime = runtime(&project, &bundler);
    let id = FunctionId::from("fnA");
    let input = BuildInput::new("fnA", "handlers/a.post");

    runtime.build(&input).await.unwrap();

    bundler.fail_with(vec![
        Diagnostic::error("Expected \";\" but found \"}\"").at("handlers/util.ts", 2, 14),
        Diagnostic::error("Build failed"),
    ]);
    bundler.warn_with(vec![Diagnostic::warning("Unused import")]);

    let output = runtime.build(&input).await.unwrap();
    assert!(output.has_errors());
    assert_eq!(
        output.messages(),
        vec![
            "Expected \";\" but found \"}\" [handlers/util.ts:2:14]".to_string(),
            "Build failed".to_string(),
            "Unused import".to_string(),
        ]
    );

    // The failed build leaves the last successful report in place
    assert!(runtime.should_rebuild(&id, &project.path("handlers/util.ts")));
    assert!(runtime.last_result(&id).unwrap().report.is_none());

    bundler.succeed();
    let output = runtime.build(&input).await.unwrap();
    assert!(output.diagnostics.is_empty());
}

#[tokio::test]
async fn test_unknown_loader_tags_are_dropped() {
    let project = handler_project();
    let bundler = FakeBundler::new();
    let runtime = runtime(&project, &bundler);

    let output = runtime
        .build(&BuildInput::new("fnA", "handlers/a.post").with_properties(json!({
            "loader": { ".txt": "text", ".graphql": "graphql" },
            "install": ["prisma"]
        })))
        .await
        .unwrap();

    assert!(output.diagnostics.is_empty());
    let options = &bundler.contexts()[0];
    assert_eq!(options.loader.len(), 1);
    assert_eq!(options.external, vec!["sharp", "pg-native", "prisma"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_dependency_dir_is_linked_best_effort() {
    let project = handler_project();
    project.write("node_modules/lib/index.js", "module.exports = 1;");
    let bundler = FakeBundler::new();
    let runtime = runtime(&project, &bundler);
    let input = BuildInput::new("fnA", "handlers/a.post");

    let output = runtime.build(&input).await.unwrap();
    let link = output.out_dir.join("node_modules");
    assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    assert!(link.join("lib/index.js").is_file());

    // Second link attempt fails on the existing entry and is ignored
    runtime.build(&input).await.unwrap();
}

#[tokio::test]
async fn test_functions_build_independently() {
    let project = handler_project();
    project.write("handlers/b.ts", "export const get = () => 2;\n");
    let bundler = FakeBundler::new();
    let runtime = runtime(&project, &bundler);

    let a = BuildInput::new("fnA", "handlers/a.post");
    let b = BuildInput::new("fnB", "handlers/b.get").with_properties(json!({ "format": "cjs" }));
    let (a, b) = tokio::join!(runtime.build(&a), runtime.build(&b));

    assert_eq!(a.unwrap().artifact, project.path(".fnstack/artifacts/fnA/handlers/a.mjs"));
    assert_eq!(b.unwrap().artifact, project.path(".fnstack/artifacts/fnB/handlers/b.cjs"));
    assert_eq!(bundler.contexts().len(), 2);

    let util = project.path("handlers/util.ts");
    assert!(runtime.should_rebuild(&FunctionId::from("fnA"), &util));
    assert!(!runtime.should_rebuild(&FunctionId::from("fnB"), &util));
}

#[tokio::test]
async fn test_dispose_releases_context() {
    let project = handler_project();
    let bundler = FakeBundler::new();
    let runtime = runtime(&project, &bundler);
    let id = FunctionId::from("fnA");
    let input = BuildInput::new("fnA", "handlers/a.post");

    runtime.build(&input).await.unwrap();
    assert!(runtime.dispose(&id).await);
    assert_eq!(bundler.disposed(), 1);
    assert!(!runtime.should_rebuild(&id, &project.path("handlers/util.ts")));

    runtime.build(&input).await.unwrap();
    assert_eq!(bundler.contexts().len(), 2);

    runtime.dispose_all().await;
    assert_eq!(bundler.disposed(), 2);
}

#[cfg(unix)]
mod workers {
    use super::*;
    use fnstack_core::{RunInput, Worker};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::time::Duration;
    use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
    use tokio::io::AsyncReadExt;
    use tokio_util::sync::CancellationToken;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn run_input(project: &TestProject, artifact: &str) -> RunInput {
        RunInput {
            artifact: PathBuf::from(artifact),
            work_dir: project.root().to_path_buf(),
            worker_id: "worker-1".to_string(),
            env: BTreeMap::from([("STAGE".to_string(), "dev".to_string())]),
            server: "127.0.0.1:4566".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    fn running(pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    }

    async fn gone(pid: u32) -> bool {
        for _ in 0..100 {
            if !running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_logs_merge_stdout_and_stderr() {
        let project = TestProject::new();
        let runtime = NodeRuntime::with_parts(
            project.project(),
            FakeBundler::new().shared(),
            shell_host("printf X; printf Y >&2"),
        );

        let worker = runtime.run(run_input(&project, "dist/a.mjs")).await.unwrap();
        let mut logs = worker.logs();
        let mut merged = Vec::new();
        tokio::time::timeout(TIMEOUT, logs.read_to_end(&mut merged))
            .await
            .unwrap()
            .unwrap();

        merged.sort_unstable();
        assert_eq!(merged, b"XY");
        tokio::time::timeout(TIMEOUT, worker.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_arguments_and_environment() {
        let project = TestProject::new();
        let runtime = NodeRuntime::with_parts(
            project.project(),
            FakeBundler::new().shared(),
            shell_host(r#"printf '%s|%s|%s|%s|%s' "$1" "$2" "$STAGE" "$AWS_LAMBDA_RUNTIME_API" "$PWD""#),
        );

        let worker = runtime.spawn(run_input(&project, "dist/a.mjs")).unwrap();
        let mut output = String::new();
        tokio::time::timeout(TIMEOUT, worker.log_stream().read_to_string(&mut output))
            .await
            .unwrap()
            .unwrap();

        let parts: Vec<&str> = output.split('|').collect();
        assert_eq!(parts[0], "dist/a.mjs");
        assert_eq!(parts[1], "worker-1");
        assert_eq!(parts[2], "dev");
        assert_eq!(parts[3], "127.0.0.1:4566");
        assert_eq!(PathBuf::from(parts[4]), project.root());
    }

    #[tokio::test]
    async fn test_second_logs_call_is_empty() {
        let project = TestProject::new();
        let runtime = NodeRuntime::with_parts(
            project.project(),
            FakeBundler::new().shared(),
            shell_host("printf hello"),
        );

        let worker = runtime.spawn(run_input(&project, "dist/a.mjs")).unwrap();
        let mut first = String::new();
        let mut second = String::new();
        let mut logs = worker.log_stream();
        let mut again = worker.log_stream();

        tokio::time::timeout(TIMEOUT, logs.read_to_string(&mut first))
            .await
            .unwrap()
            .unwrap();
        again.read_to_string(&mut second).await.unwrap();

        assert_eq!(first, "hello");
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_terminates_process_group() {
        let project = TestProject::new();
        let runtime = NodeRuntime::with_parts(
            project.project(),
            FakeBundler::new().shared(),
            shell_host("sleep 30 & echo $!; wait"),
        );

        let cancel = CancellationToken::new();
        let input = run_input(&project, "dist/a.mjs").with_cancel(cancel.clone());
        let worker = runtime.spawn(input).unwrap();
        let pid = worker.pid().unwrap();

        let mut logs = worker.log_stream();
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while logs.read(&mut byte).await.unwrap() == 1 && byte[0] != b'\n' {
            line.push(byte[0]);
        }
        let grandchild: u32 = String::from_utf8(line).unwrap().trim().parse().unwrap();
        assert!(running(grandchild));

        cancel.cancel();
        tokio::time::timeout(TIMEOUT, Worker::wait(&worker))
            .await
            .unwrap();

        assert!(worker.has_exited());
        assert!(gone(pid).await);
        assert!(gone(grandchild).await);
    }

    #[tokio::test]
    async fn test_stop_requests_termination() {
        let project = TestProject::new();
        let runtime = NodeRuntime::with_parts(
            project.project(),
            FakeBundler::new().shared(),
            shell_host("sleep 30"),
        );

        let worker = runtime.run(run_input(&project, "dist/a.mjs")).await.unwrap();
        worker.stop();
        tokio::time::timeout(TIMEOUT, worker.wait()).await.unwrap();

        // Stopping an exited worker is harmless
        worker.stop();
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let project = TestProject::new();
        let mut input = run_input(&project, "dist/a.mjs");
        input.work_dir = project.path("does-not-exist");
        let runtime = NodeRuntime::with_parts(
            project.project(),
            FakeBundler::new().shared(),
            shell_host("true"),
        );

        let result = runtime.run(input).await;
        assert!(matches!(result, Err(RuntimeError::Spawn(_))));
    }
}

//! End-to-end incremental build scenarios.
//!
//! Each test gets its own project and data directory, so snapshots never
//! leak between tests.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Isolated project directory with its own snapshot data dir.
struct TestEnv {
  temp: TempDir,
}

impl TestEnv {
  fn new(script: &str) -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("kiln.lua"), script).unwrap();
    Self { temp }
  }

  fn write(&self, name: &str, content: &str) {
    std::fs::write(self.temp.path().join(name), content).unwrap();
  }

  fn read(&self, name: &str) -> String {
    std::fs::read_to_string(self.temp.path().join(name)).unwrap()
  }

  fn kiln(&self, args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd
      .args(args)
      .arg("--root")
      .arg(self.temp.path())
      .arg("--data-dir")
      .arg(self.temp.path().join("data"));
    cmd
  }
}

#[test]
fn first_build_runs_second_is_a_no_op() {
  let env = TestEnv::new(
    r#"
    target("out.txt", {
      inputs  = { "in.txt" },
      outputs = { "out.txt" },
      run = function(ctx)
        ctx:shell("tr a-z A-Z < in.txt > out.txt")
      end,
    })
    "#,
  );
  env.write("in.txt", "hello");

  env
    .kiln(&["build"])
    .assert()
    .success()
    .stdout(predicate::str::contains("build complete"));
  assert_eq!(env.read("out.txt"), "HELLO");

  env
    .kiln(&["build"])
    .assert()
    .success()
    .stdout(predicate::str::contains("nothing to build"));
}

#[test]
fn changing_an_input_rebuilds() {
  let env = TestEnv::new(
    r#"
    target("out.txt", {
      inputs  = { "in.txt" },
      outputs = { "out.txt" },
      run = function(ctx)
        ctx:shell("tr a-z A-Z < in.txt > out.txt")
      end,
    })
    "#,
  );
  env.write("in.txt", "one");
  env.kiln(&["build"]).assert().success();
  assert_eq!(env.read("out.txt"), "ONE");

  env.write("in.txt", "two");
  env
    .kiln(&["build"])
    .assert()
    .success()
    .stdout(predicate::str::contains("build complete"));
  assert_eq!(env.read("out.txt"), "TWO");
}

#[test]
fn dependency_chain_builds_in_order_and_caches() {
  let env = TestEnv::new(
    r#"
    local upper = target("upper.txt", {
      inputs  = { "in.txt" },
      outputs = { "upper.txt" },
      run = function(ctx)
        ctx:shell("tr a-z A-Z < in.txt > upper.txt")
      end,
    })

    target("final.txt", {
      inputs  = { upper },
      outputs = { "final.txt" },
      run = function(ctx)
        ctx:shell("rev < upper.txt > final.txt")
      end,
    })
    "#,
  );
  env.write("in.txt", "abc");

  env.kiln(&["build", "final.txt"]).assert().success();
  assert_eq!(env.read("final.txt").trim(), "CBA");

  env
    .kiln(&["build", "final.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("nothing to build"));
}

#[test]
fn failing_command_exits_one_with_causal_error() {
  let env = TestEnv::new(
    r#"
    local bad = target("bad", {
      run = function(ctx) ctx:shell("exit 9") end,
    })
    target("good", {
      inputs = { bad },
      run = function(ctx) ctx:shell("true") end,
    })
    "#,
  );

  env
    .kiln(&["build", "good"])
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("exited with status Some(9)"))
    .stderr(predicate::str::contains("dependency error").not());
}

#[test]
fn force_rebuilds_clean_targets() {
  let env = TestEnv::new(
    r#"
    target("stamp", {
      run = function(ctx) ctx:shell("date +%s%N >> stamps.log") end,
    })
    "#,
  );

  env.kiln(&["build"]).assert().success();
  env.kiln(&["build", "--force"]).assert().success();

  let stamps = env.read("stamps.log");
  assert_eq!(stamps.lines().count(), 2, "force must re-run the command");
}

#[test]
fn command_output_is_streamed() {
  let env = TestEnv::new(
    r#"
    target("@say", {
      run = function(ctx) ctx:shell("echo streamed-line") end,
    })
    "#,
  );

  env
    .kiln(&["build"])
    .assert()
    .success()
    .stdout(predicate::str::contains("streamed-line"));
}

#[test]
fn plan_lists_dirty_targets_without_building() {
  let env = TestEnv::new(
    r#"
    target("out.txt", {
      inputs  = { "in.txt" },
      outputs = { "out.txt" },
      run = function(ctx) ctx:shell("cp in.txt out.txt") end,
    })
    "#,
  );
  env.write("in.txt", "data");

  env
    .kiln(&["plan"])
    .assert()
    .success()
    .stdout(predicate::str::contains("out.txt"));
  assert!(!env.temp.path().join("out.txt").exists());

  env.kiln(&["build"]).assert().success();
  env
    .kiln(&["plan"])
    .assert()
    .success()
    .stdout(predicate::str::contains("nothing to build"));
}

#[test]
fn plan_json_emits_target_list() {
  let env = TestEnv::new(
    r#"
    target("a", { run = function(ctx) ctx:shell("true") end })
    "#,
  );

  let output = env.kiln(&["plan", "--json"]).output().unwrap();
  assert!(output.status.success());
  let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(summary["targets"][0], "a");
}

#[test]
fn phony_target_reruns_only_when_commands_change() {
  let env = TestEnv::new(
    r#"
    target("@tick", {
      run = function(ctx) ctx:shell("echo x >> ticks.log") end,
    })
    "#,
  );

  env.kiln(&["build"]).assert().success();
  env
    .kiln(&["build"])
    .assert()
    .success()
    .stdout(predicate::str::contains("nothing to build"));
  assert_eq!(env.read("ticks.log").lines().count(), 1);

  // Changing the command text re-fires the phony target.
  std::fs::write(
    env.temp.path().join("kiln.lua"),
    r#"
    target("@tick", {
      run = function(ctx) ctx:shell("echo y >> ticks.log") end,
    })
    "#,
  )
  .unwrap();
  env.kiln(&["build"]).assert().success();
  assert_eq!(env.read("ticks.log").lines().count(), 2);
}

#[test]
fn output_as_input_builds_the_producer_first() {
  let env = TestEnv::new(
    r#"
    target("make-lib", {
      outputs = { "lib.txt" },
      run = function(ctx) ctx:shell("echo lib > lib.txt") end,
    })
    target("app.txt", {
      inputs  = { "lib.txt" },
      outputs = { "app.txt" },
      run = function(ctx) ctx:shell("cp lib.txt app.txt") end,
    })
    "#,
  );

  env.kiln(&["build", "app.txt"]).assert().success();
  assert_eq!(env.read("app.txt").trim(), "lib");
}

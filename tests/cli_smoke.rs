// End-to-end runs of the compiled `cpr` binary against temp fixtures.
use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use serde_json::Value;
use std::process::Command;

fn make_fixture() -> assert_fs::TempDir {
    let tmp = assert_fs::TempDir::new().expect("tempdir");
    tmp.child("src/lib.rs")
        .write_str("pub fn alpha() {}\n")
        .expect("write lib.rs");
    tmp.child("README.md")
        .write_str("# Demo\n")
        .expect("write README.md");
    tmp
}

fn cpr(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("cpr").expect("bin");
    cmd.current_dir(dir).env_remove("CODEPROMPT_LOG");
    cmd
}

#[test]
fn prompt_renders_tree_and_files() {
    let tmp = make_fixture();

    cpr(tmp.path())
        .args(["prompt", "."])
        .assert()
        .success()
        .stdout(predicate::str::contains("Source Tree:"))
        .stdout(predicate::str::contains("# file: src/lib.rs"))
        .stdout(predicate::str::contains("pub fn alpha() {}"));
}

#[test]
fn prompt_extension_filter_limits_files() {
    let tmp = make_fixture();

    cpr(tmp.path())
        .args(["prompt", ".", "-e", "md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("# file: README.md"))
        .stdout(predicate::str::contains("src/lib.rs").not());
}

#[test]
fn prompt_json_in_diff_mode() {
    let tmp = assert_fs::TempDir::new().unwrap();
    tmp.child("before/a.js").write_str("\"X\"\n").unwrap();
    tmp.child("after/a.js").write_str("\"Y\"\n").unwrap();

    let out = cpr(tmp.path())
        .args(["prompt", "before", "--diff-path", "after", "--json"])
        .output()
        .expect("run");
    assert!(out.status.success());

    let v: Value = serde_json::from_slice(&out.stdout).expect("json");
    let files = v["context"]["files"].as_array().expect("files");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["path"], "a.js");
    assert_eq!(files[0]["status"], "modified");
    assert!(v["context"]["diffPath"].as_str().unwrap().ends_with("after"));
    assert!(v["rendered"].as_str().unwrap().contains("Diff Path:"));
}

#[test]
fn prompt_writes_output_file_and_uses_template_vars() {
    let tmp = make_fixture();
    tmp.child("t.hbs")
        .write_str("Dear {{who}}, {{#each files}}[{{path}}]{{/each}}")
        .unwrap();

    cpr(tmp.path())
        .args(["prompt", ".", "--template", "t.hbs", "--var", "who=reviewer", "-o", "out.md", "--quiet"])
        .assert()
        .success();

    tmp.child("out.md")
        .assert("Dear reviewer, [README.md][src/lib.rs][t.hbs]");
}

#[test]
fn tree_lists_files() {
    let tmp = make_fixture();

    cpr(tmp.path())
        .args(["--no-color", "tree", "."])
        .assert()
        .success()
        .stdout(predicate::str::contains("lib.rs"))
        .stdout(predicate::str::contains("src/"));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let tmp = assert_fs::TempDir::new().unwrap();

    cpr(tmp.path()).args(["init", "."]).assert().success();
    tmp.child("codeprompt.toml")
        .assert(predicate::str::contains("max_bytes_per_file"));

    cpr(tmp.path())
        .args(["init", "."])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    cpr(tmp.path()).args(["init", ".", "--force"]).assert().success();
}

#[test]
fn config_file_extensions_apply() {
    let tmp = make_fixture();
    tmp.child("codeprompt.toml")
        .write_str("extensions = [\"rs\"]\n")
        .unwrap();

    cpr(tmp.path())
        .args(["prompt", "."])
        .assert()
        .success()
        .stdout(predicate::str::contains("# file: src/lib.rs"))
        .stdout(predicate::str::contains("README.md").not());
}

#[test]
fn bad_template_fence_is_reported() {
    let tmp = make_fixture();
    tmp.child("broken.md")
        .write_str("intro\n```js\nreturn {};\n")
        .unwrap();

    cpr(tmp.path())
        .args(["prompt", ".", "--template", "broken.md"])
        .assert()
        .failure();
}

#[test]
fn completions_to_stdout() {
    let tmp = assert_fs::TempDir::new().unwrap();

    cpr(tmp.path())
        .args(["completions", "bash", "--stdout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cpr"));
}

#[test]
fn tree_reports_broken_config() {
    let tmp = make_fixture();
    tmp.child("codeprompt.toml")
        .write_str("extensions = [\n")
        .unwrap();

    cpr(tmp.path())
        .args(["tree", "."])
        .assert()
        .failure();
}

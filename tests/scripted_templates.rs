//! Pre/post script blocks run against real interpreters. Tests return
//! early when the interpreter is not installed.

use codeprompt::core::{AssembleOptions, CodePrompt, OnError, Stage};
use codeprompt::infra::config::ScriptsConfig;
use serde_json::{Map, json};
use std::process::{Command, Stdio};

fn have(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn project() -> assert_fs::TempDir {
    let dir = assert_fs::TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.js"), "console.log(1);\n").unwrap();
    dir
}

#[test]
fn shell_pre_binding_reaches_post_block() {
    if !have("bash") {
        return;
    }
    let dir = project();
    let template = "\
```bash:pre
echo greeting=hi
```
Say {{greeting}}.
```bash:post
echo seen=\"$greeting\"
```
";
    let cp = CodePrompt::new(AssembleOptions::new(dir.path()))
        .unwrap()
        .with_template_text(template, None)
        .unwrap();

    let out = cp.run_template(None, None, Map::new()).unwrap();

    assert_eq!(out.context["greeting"], json!("hi"));
    assert_eq!(out.context["seen"], json!("hi"));
    assert_eq!(out.rendered.as_deref().map(str::trim), Some("Say hi."));
    assert_eq!(
        out.stages,
        vec![Stage::Idle, Stage::PreRun, Stage::Rendered, Stage::PostRun, Stage::Done]
    );
}

#[test]
fn node_blocks_share_context() {
    if !have("node") {
        return;
    }
    let dir = project();
    let template = "\
```js:pre
return { greeting: 'hi', count: files.length };
```
{{greeting}}
```js
return { observed: greeting };
```
";
    let cp = CodePrompt::new(AssembleOptions::new(dir.path()))
        .unwrap()
        .with_template_text(template, None)
        .unwrap();

    let out = cp.run_template(None, None, Map::new()).unwrap();

    assert_eq!(out.context["observed"], json!("hi"));
    assert_eq!(out.context["count"], json!(1));
}

#[test]
fn failing_block_aborts_or_is_skipped() {
    if !have("bash") {
        return;
    }
    let dir = project();
    let template = "\
```bash:pre
exit 3
```
```bash:post
echo after=ran
```
";
    let abort = CodePrompt::new(AssembleOptions::new(dir.path()))
        .unwrap()
        .with_template_text(template, None)
        .unwrap();
    assert!(abort.run_template(None, None, Map::new()).is_err());

    let scripts = ScriptsConfig {
        on_error: OnError::Skip,
        ..ScriptsConfig::default()
    };
    let skip = CodePrompt::new(AssembleOptions::new(dir.path()))
        .unwrap()
        .with_template_text(template, None)
        .unwrap()
        .with_scripts(scripts);
    let out = skip.run_template(None, None, Map::new()).unwrap();
    assert_eq!(out.skipped.len(), 1);
    assert_eq!(out.context["after"], json!("ran"));
}

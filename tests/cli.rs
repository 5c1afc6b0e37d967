use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn answerbot_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_answerbot"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let general = root.join("export/general");
    let help = root.join("export/help");
    fs::create_dir_all(&general).unwrap();
    fs::create_dir_all(&help).unwrap();
    fs::write(
        general.join("2020-01-01.json"),
        r#"[
          {"type": "message", "user": "U1", "ts": "1000.000100", "text": "how do I reset the vpn?",
           "replies": [{"user": "U2", "ts": "1010.000200"}]},
          {"type": "message", "user": "U2", "ts": "1010.000200", "text": "run vpn-reset from the portal",
           "thread_ts": "1000.000100"},
          {"type": "message", "subtype": "channel_join", "user": "U3", "ts": "1020.000000",
           "text": "<@U3> has joined the channel"}
        ]"#,
    )
    .unwrap();
    fs::write(
        help.join("2020-01-02.json"),
        r#"[
          {"type": "message", "user": "U3", "ts": "2000.000000", "text": "where is the printer?"},
          {"type": "message", "user": "U1", "ts": "2030.000000", "text": "second floor by the kitchen"}
        ]"#,
    )
    .unwrap();
    fs::write(root.join("export/channels.json"), "[]").unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[model]
path = "{root}/data/model.json"

[corpus]
root = "{root}/export"
"#,
        root = root.display()
    );
    let config_path = config_dir.join("answerbot.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(answerbot_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn test_corpus_stats() {
    let (_tmp, config) = setup_test_env();
    let output = run(&config, &["corpus", "stats"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    assert!(stdout.contains("Channels:      2"));
    assert!(stdout.contains("Messages:      5"));
    assert!(stdout.contains("User text:     4"));
    assert!(stdout.contains("Pairs:         5 (4 windowed, 1 thread replies)"));
    assert!(stdout.contains("general"));
    assert!(stdout.contains("help"));
    assert!(stdout.contains("not trained yet"));
}

#[test]
fn test_corpus_pairs_limit() {
    let (_tmp, config) = setup_test_env();

    let output = run(&config, &["corpus", "pairs"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("5 of 5 pairs shown"));
    assert!(stdout.contains("context: how do I reset the vpn?"));
    assert!(stdout.contains("answer:  run vpn-reset from the portal"));

    let output = run(&config, &["corpus", "pairs", "--limit", "2"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 of 5 pairs shown"));
    assert!(!stdout.contains("#3"));
}

#[test]
fn test_train_requires_embeddings() {
    let (_tmp, config) = setup_test_env();
    let output = run(&config, &["train", "slack", "--progress", "off"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Embeddings are disabled"), "stderr: {}", stderr);
}

#[test]
fn test_ask_without_model_fails() {
    let (_tmp, config) = setup_test_env();
    let output = run(&config, &["ask", "where is the printer?"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load model"), "stderr: {}", stderr);
}

#[test]
fn test_ask_requires_a_question() {
    let (_tmp, config) = setup_test_env();
    let output = run(&config, &["ask"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No questions given"), "stderr: {}", stderr);
}

#[test]
fn test_ask_reads_question_file_before_loading_model() {
    let (tmp, config) = setup_test_env();

    let output = run(&config, &["ask", "--file", tmp.path().join("missing.txt").to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read questions file"), "stderr: {}", stderr);

    let questions = tmp.path().join("questions.txt");
    fs::write(&questions, "where is the printer?\nhow do I reset the vpn?\n").unwrap();
    let output = run(&config, &["ask", "first?", "--file", questions.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load model"), "stderr: {}", stderr);
}

#[test]
fn test_ask_image_rejects_non_image() {
    let (tmp, config) = setup_test_env();
    let path = tmp.path().join("notes.txt");
    fs::write(&path, "just text").unwrap();
    let output = run(&config, &["ask-image", path.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not a supported image"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let output = run(&tmp.path().join("nope.toml"), &["corpus", "stats"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_missing_archive_root_fails() {
    let (tmp, config) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("export")).unwrap();
    let output = run(&config, &["corpus", "stats"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Archive root does not exist"));
}

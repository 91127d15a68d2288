use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn llmaps_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("llmaps");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("raw-documents")).unwrap();

    let config_content = format!(
        r#"[store]
uri = "{}/data"
database = "stores_db"
collection = "llmaps"

[embedding]
provider = "openai"
dims = 8

[server]
bind = "127.0.0.1:7341"
static_dir = "{}/static"
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("llmaps.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

/// Run the binary from the temp root with a clean environment: no `.env`,
/// no API key, no store overrides.
fn run_llmaps(root: &Path, config_path: &Path, args: &[&str], env: &[(&str, &str)]) -> (String, String, bool) {
    let binary = llmaps_binary();
    let mut cmd = Command::new(&binary);
    cmd.current_dir(root)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .env_remove("OPENAI_BASE_URL")
        .env_remove("STORE_URI")
        .env_remove("DB_NAME")
        .env_remove("COLLECTION_NAME")
        .env("RUST_LOG", "warn");
    for (k, v) in env {
        cmd.env(k, v);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run llmaps binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Single-page PDF with one line of text.
fn write_pdf(path: &Path, phrase: &str) {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>".to_string(),
        format!("<< /Length {} >> stream\n{}\nendstream", stream.len(), stream),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj {} endobj\n", i + 1, body).as_bytes());
    }
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    fs::write(path, out).unwrap();
}

#[test]
fn test_help_lists_commands() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_llmaps(tmp.path(), &config_path, &["--help"], &[]);
    assert!(success);
    for cmd in ["scrape", "build-store", "create-indexes", "serve", "chat", "extract"] {
        assert!(stdout.contains(cmd), "missing {} in help: {}", cmd, stdout);
    }
}

#[test]
fn test_build_store_missing_pdf_dir_fails_before_store() {
    let (tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_llmaps(
        tmp.path(),
        &config_path,
        &["build-store", "--pdf-dir", "does-not-exist"],
        &[],
    );
    assert!(!success);
    assert!(stderr.contains("PDF directory not found"), "stderr: {}", stderr);
    assert!(!tmp.path().join("data").join("stores_db.sqlite").exists());
}

#[test]
fn test_build_store_without_pdfs_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("raw-documents").join("notes.txt"), "not a pdf").unwrap();

    let (_, stderr, success) = run_llmaps(tmp.path(), &config_path, &["build-store"], &[]);
    assert!(!success);
    assert!(stderr.contains("No PDF files"), "stderr: {}", stderr);
}

#[test]
fn test_build_store_without_api_key_fails() {
    let (tmp, config_path) = setup_test_env();
    write_pdf(
        &tmp.path().join("raw-documents").join("Milk _ Target.pdf"),
        "Milk 3.99 at Target",
    );

    let (_, stderr, success) = run_llmaps(tmp.path(), &config_path, &["build-store"], &[]);
    assert!(!success);
    assert!(stderr.contains("OPENAI_API_KEY"), "stderr: {}", stderr);
}

#[test]
fn test_clear_only_creates_and_empties_store() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) =
        run_llmaps(tmp.path(), &config_path, &["build-store", "--clear-only"], &[]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("Vector store cleared successfully!"));
    assert!(tmp.path().join("data").join("stores_db.sqlite").exists());
}

#[test]
fn test_store_uri_env_overrides_config() {
    let (tmp, config_path) = setup_test_env();
    let other = tmp.path().join("other-store");
    let (_, stderr, success) = run_llmaps(
        tmp.path(),
        &config_path,
        &["build-store", "--clear-only"],
        &[("STORE_URI", other.to_str().unwrap()), ("DB_NAME", "stores_test")],
    );
    assert!(success, "stderr: {}", stderr);
    assert!(other.join("stores_test.sqlite").exists());
    assert!(!tmp.path().join("data").join("stores_db.sqlite").exists());
}

#[test]
fn test_create_indexes_twice_succeeds() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_llmaps(tmp.path(), &config_path, &["create-indexes"], &[]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("vector_index: created"), "stdout: {}", stdout);
    assert!(stdout.contains("search_index: created"), "stdout: {}", stdout);

    let (stdout, stderr, success) = run_llmaps(tmp.path(), &config_path, &["create-indexes"], &[]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("vector_index: skipped"), "stdout: {}", stdout);
    assert!(stdout.contains("already exists"), "stdout: {}", stdout);
}

#[test]
fn test_missing_config_file_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let (stdout, stderr, success) = run_llmaps(
        tmp.path(),
        &tmp.path().join("nope.toml"),
        &["build-store", "--clear-only"],
        &[],
    );
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("cleared"));
    // default store root is ./data relative to the working directory
    assert!(tmp.path().join("data").join("stores_db.sqlite").exists());
}

#[test]
fn test_malformed_config_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[store\nuri = ").unwrap();
    let (_, stderr, success) =
        run_llmaps(tmp.path(), &config_path, &["build-store", "--clear-only"], &[]);
    assert!(!success);
    assert!(stderr.contains("Failed to parse config file"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_chunking_config_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::write(
        &config_path,
        "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
    )
    .unwrap();
    let (_, stderr, success) = run_llmaps(tmp.path(), &config_path, &["create-indexes"], &[]);
    assert!(!success);
    assert!(stderr.contains("chunk_overlap"), "stderr: {}", stderr);
}

#[test]
fn test_extract_missing_pdf_fails() {
    let (tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_llmaps(tmp.path(), &config_path, &["extract"], &[]);
    assert!(!success);
    assert!(stderr.contains("Milk _ Target.pdf"), "stderr: {}", stderr);
    assert!(!tmp.path().join("output.csv").exists());
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn basar_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("basar");
    path
}

const LISTINGS: &str = r#"{"name": "אנטריקוט בקר טרי", "price": 130.0, "unit": "ק\"ג", "vendor": "rami-levy", "source": "scanner", "observed_at": "2025-07-03T09:00:00Z"}
{"name": "אנטריקוט בקר טרי", "price": 180.0, "unit": "ק\"ג", "vendor": "shufersal", "source": "scanner", "observed_at": "2025-07-03T11:00:00Z"}
{"name": "חלב 3%", "price": 6.5, "vendor": "shufersal", "source": "scanner"}
{"name": "מארז מיוחד לחג", "price": 99.0, "vendor": "shufersal", "source": "scanner"}
{"name": broken
"#;

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/basar.sqlite"

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );
    let config_path = config_dir.join("basar.toml");
    fs::write(&config_path, config_content).unwrap();

    let listings_path = root.join("listings.jsonl");
    fs::write(&listings_path, LISTINGS).unwrap();

    (tmp, config_path, listings_path)
}

fn run_basar(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = basar_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run basar binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn prepared() -> (TempDir, PathBuf, PathBuf) {
    let (tmp, config_path, listings) = setup_test_env();
    let (_, stderr, ok) = run_basar(&config_path, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    let (_, stderr, ok) = run_basar(&config_path, &["seed"]);
    assert!(ok, "seed failed: {}", stderr);
    (tmp, config_path, listings)
}

/// First column of the first output line containing `needle`.
fn id_on_line(stdout: &str, needle: &str) -> String {
    stdout
        .lines()
        .find(|l| l.contains(needle))
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or_else(|| panic!("no line containing {:?} in:\n{}", needle, stdout))
        .to_string()
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path, _) = setup_test_env();

    let (stdout, stderr, success1) = run_basar(&config_path, &["init"]);
    assert!(success1, "First init failed: {}", stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success2) = run_basar(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_seed_twice_does_not_duplicate() {
    let (_tmp, config_path, _) = prepared();
    let (stdout, _, ok) = run_basar(&config_path, &["seed"]);
    assert!(ok);
    assert!(stdout.contains("cuts: 13"), "got: {}", stdout);

    let (stats, _, ok) = run_basar(&config_path, &["stats"]);
    assert!(ok);
    assert!(stats.contains("Cuts:          13"), "got: {}", stats);
}

#[test]
fn test_ingest_routes_every_listing() {
    let (_tmp, config_path, listings) = prepared();
    let (stdout, stderr, ok) =
        run_basar(&config_path, &["ingest", listings.to_str().unwrap()]);
    assert!(ok, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("read: 5"));
    assert!(stdout.contains("observed: 2"), "got: {}", stdout);
    assert!(stdout.contains("queued for review: 1"));
    assert!(stdout.contains("rejected: 1"));
    assert!(stdout.contains("failed: 1"));
    assert!(stdout.contains("sha256: "));
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (_tmp, config_path, listings) = prepared();
    let (stdout, _, ok) = run_basar(
        &config_path,
        &["ingest", listings.to_str().unwrap(), "--dry-run"],
    );
    assert!(ok);
    assert!(stdout.contains("dry-run"));

    let (queue, _, _) = run_basar(&config_path, &["queue"]);
    assert!(queue.contains("No items awaiting review."));
}

#[test]
fn test_classify_rejects_dairy() {
    let (_tmp, config_path, _) = prepared();
    let (stdout, _, ok) = run_basar(&config_path, &["classify", "חלב 3%"]);
    assert!(ok);
    assert!(stdout.contains("\"is_valid_meat\": false"), "got: {}", stdout);
    assert!(stdout.contains("dairy"));
}

#[test]
fn test_validate_reports_purity() {
    let (_tmp, config_path, listings) = prepared();
    let (stdout, _, ok) = run_basar(&config_path, &["validate", listings.to_str().unwrap()]);
    assert!(ok);
    assert!(stdout.contains("products: 4"));
    assert!(stdout.contains("malformed: 1"));
    assert!(stdout.contains("dairy"));
}

#[test]
fn test_conflict_detect_and_manual_resolution() {
    let (_tmp, config_path, listings) = prepared();
    run_basar(&config_path, &["ingest", listings.to_str().unwrap()]);

    let (stdout, _, ok) = run_basar(&config_path, &["conflicts", "detect"]);
    assert!(ok);
    assert!(stdout.contains("conflicts detected: 1"), "got: {}", stdout);

    // A second pass finds the open conflict and creates nothing.
    let (again, _, _) = run_basar(&config_path, &["conflicts", "detect"]);
    assert!(again.contains("conflicts detected: 0"));

    let id = id_on_line(&stdout, "cut-entrecote");
    let (resolved, stderr, ok) = run_basar(
        &config_path,
        &["conflicts", "resolve-manual", &id, "--price", "150", "--notes", "shelf check"],
    );
    assert!(ok, "resolve-manual failed: {}", stderr);
    assert!(resolved.contains(&format!("resolved {}", id)));
    assert!(resolved.contains("price: 150.00"));

    // The resolution settles both prices; detection does not raise them again.
    let (after, _, ok) = run_basar(&config_path, &["conflicts", "detect"]);
    assert!(ok);
    assert!(after.contains("conflicts detected: 0"), "got: {}", after);

    let (repeat, _, ok) = run_basar(
        &config_path,
        &["conflicts", "resolve-manual", &id, "--price", "140"],
    );
    assert!(ok);
    assert!(repeat.contains("already resolved"));

    let (list, _, _) = run_basar(&config_path, &["conflicts", "list", "--status", "resolved"]);
    assert!(list.contains("admin_override"));
}

#[test]
fn test_approve_once() {
    let (_tmp, config_path, listings) = prepared();
    run_basar(&config_path, &["ingest", listings.to_str().unwrap()]);

    let (queue, _, ok) = run_basar(&config_path, &["queue"]);
    assert!(ok);
    let id = id_on_line(&queue, "מארז מיוחד לחג");

    let (stdout, stderr, ok) = run_basar(
        &config_path,
        &["approve", &id, "--grade", "premium", "--notes", "holiday pack"],
    );
    assert!(ok, "approve failed: {}", stderr);
    assert!(stdout.contains(&format!("approved {}", id)));
    assert!(stdout.contains("mapping: "));

    let (_, stderr, ok) = run_basar(&config_path, &["approve", &id]);
    assert!(!ok);
    assert!(stderr.contains("already reviewed"), "got: {}", stderr);

    let (queue, _, _) = run_basar(&config_path, &["queue"]);
    assert!(queue.contains("No items awaiting review."));
}

#[test]
fn test_bulk_approve_counts_failures() {
    let (_tmp, config_path, listings) = prepared();
    run_basar(&config_path, &["ingest", listings.to_str().unwrap()]);
    let (queue, _, _) = run_basar(&config_path, &["queue"]);
    let id = id_on_line(&queue, "מארז מיוחד לחג");

    let (stdout, _, ok) = run_basar(&config_path, &["bulk-approve", &id, "no-such-id"]);
    assert!(ok);
    assert!(stdout.contains("processed: 2"));
    assert!(stdout.contains("successful: 1"));
    assert!(stdout.contains("failed: 1"));
    assert!(stdout.contains("mappings created: 1"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_basar(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}

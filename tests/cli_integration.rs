use ent_finder::cache::{EntitlementDatabase, write_database};
use serde_json::Value;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(name: &str) -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "ent_finder_it_{}_{}_{}",
        std::process::id(),
        nanos,
        name
    ))
}

fn plist(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
{body}
</dict>
</plist>"#
    )
}

fn sample_db() -> EntitlementDatabase {
    let mut db = EntitlementDatabase::new();
    db.insert(
        "/System/Library/CoreServices/SpringBoard.app/SpringBoard".to_string(),
        plist(
            "<key>com.apple.private.security.no-sandbox</key><true/>\
             <key>com.apple.springboard.launchapplications</key><true/>",
        ),
    );
    db.insert(
        "/usr/libexec/backboardd".to_string(),
        plist(
            "<key>com.apple.private.security.no-sandbox</key><false/>\
             <key>com.apple.private.security.container-required</key><string>x</string>",
        ),
    );
    db.insert("/usr/lib/libunsigned.dylib".to_string(), String::new());
    db
}

fn run(args: &[&str]) -> anyhow::Result<Output> {
    let bin = env!("CARGO_BIN_EXE_ent-finder");
    Ok(Command::new(bin).args(args).output()?)
}

fn run_json(args: &[&str]) -> anyhow::Result<Value> {
    let out = run(args)?;
    if !out.status.success() {
        return Err(anyhow::anyhow!(
            "command failed: status={:?}, stderr={}",
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        ));
    }
    Ok(serde_json::from_slice(&out.stdout)?)
}

#[test]
fn file_search_uses_existing_cache_without_touching_archive() -> anyhow::Result<()> {
    let base = temp_dir("file_search");
    std::fs::create_dir_all(&base)?;
    let ipsw = base.join("iPhone_Restore.ipsw");
    let db = base.join("iPhone_Restore.entDB");
    write_database(&db, &sample_db())?;

    // The archive does not exist; the cache alone answers the query.
    let out = run(&[ipsw.to_string_lossy().as_ref(), "--file", "springboard"])?;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8(out.stdout)?;
    assert!(stdout.contains("/System/Library/CoreServices/SpringBoard.app/SpringBoard"));
    assert!(stdout.contains("com.apple.springboard.launchapplications"));
    assert!(!stdout.contains("backboardd"));

    let out = run(&[ipsw.to_string_lossy().as_ref(), "-f", "libunsigned"])?;
    assert!(String::from_utf8(out.stdout)?.contains("- no entitlements"));

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn entitlement_search_prints_aligned_true_matches() -> anyhow::Result<()> {
    let base = temp_dir("ent_search");
    std::fs::create_dir_all(&base)?;
    let ipsw = base.join("fw.ipsw");
    let db = base.join("custom.entDB");
    write_database(&db, &sample_db())?;

    let out = run(&[
        "--db",
        db.to_string_lossy().as_ref(),
        "search",
        ipsw.to_string_lossy().as_ref(),
        "--ent",
        "com.apple.private.security",
    ])?;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8(out.stdout)?;
    let rows: Vec<&str> = stdout.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(
        rows,
        vec![
            "com.apple.private.security.no-sandbox /System/Library/CoreServices/SpringBoard.app/SpringBoard"
        ]
    );

    let stderr = String::from_utf8(out.stderr)?;
    assert!(stderr.contains("unhandled entitlement kind"));

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn entitlement_search_json_reports_hits_and_unhandled() -> anyhow::Result<()> {
    let base = temp_dir("ent_json");
    std::fs::create_dir_all(&base)?;
    let ipsw = base.join("fw.ipsw");
    let db = base.join("fw.entDB");
    write_database(&db, &sample_db())?;

    let value = run_json(&[
        ipsw.to_string_lossy().as_ref(),
        "--ent",
        "com.apple.private.security",
        "--format",
        "json",
    ])?;
    assert_eq!(value["hits"].as_array().map(Vec::len), Some(1));
    assert_eq!(value["unhandled"][0]["kind"], Value::String("string".into()));
    assert_eq!(
        value["unhandled"][0]["path"],
        Value::String("/usr/libexec/backboardd".into())
    );

    let stats = run_json(&["stats", ipsw.to_string_lossy().as_ref()])?;
    assert_eq!(stats["binaries"], Value::from(3));
    assert_eq!(stats["with_entitlements"], Value::from(2));

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn usage_errors_happen_before_any_io() -> anyhow::Result<()> {
    let base = temp_dir("usage");
    std::fs::create_dir_all(&base)?;
    let ipsw = base.join("missing.ipsw");
    let db = base.join("missing.entDB");

    let neither = run(&[ipsw.to_string_lossy().as_ref()])?;
    assert_eq!(neither.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&neither.stderr).contains("you must supply a --ent OR --file"));

    let both = run(&[ipsw.to_string_lossy().as_ref(), "-e", "x", "-f", "y"])?;
    assert_eq!(both.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&both.stderr).contains("not both"));

    assert!(!db.exists());

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn corrupt_cache_fails_without_rebuilding() -> anyhow::Result<()> {
    let base = temp_dir("corrupt");
    std::fs::create_dir_all(&base)?;
    let ipsw = base.join("fw.ipsw");
    let db = base.join("fw.entDB");
    std::fs::write(&db, b"garbage")?;

    let out = run(&[ipsw.to_string_lossy().as_ref(), "--file", "x"])?;
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("failed to decode entitlement database"));
    assert_eq!(std::fs::read(&db)?, b"garbage");

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn missing_archive_without_cache_fails_and_writes_nothing() -> anyhow::Result<()> {
    let base = temp_dir("no_archive");
    std::fs::create_dir_all(&base)?;
    let ipsw = base.join("fw.ipsw");
    let db = base.join("fw.entDB");

    let out = run(&["build", ipsw.to_string_lossy().as_ref()])?;
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("failed to read build manifest"));
    assert!(!db.exists());

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn clear_removes_cache() -> anyhow::Result<()> {
    let base = temp_dir("clear");
    std::fs::create_dir_all(&base)?;
    let ipsw = base.join("fw.ipsw");
    let db = base.join("fw.entDB");
    write_database(&db, &sample_db())?;

    let out = run(&["clear", ipsw.to_string_lossy().as_ref()])?;
    assert!(out.status.success());
    assert!(!db.exists());

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

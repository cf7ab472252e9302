use assert_cmd::cargo::cargo_bin_cmd;
use pdf_engine::fixtures::{build_pdf, FixturePage};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

const HEADLINE: &str = "The harbour reopened on Monday after a week of heavy storms.";

/// Two letter pages; the first carries one line of text near the top.
fn sample_pdf(dir: &Path) -> PathBuf {
    let pages = [FixturePage::letter().with_text(40, 700, 10, HEADLINE), FixturePage::letter()];
    let path = dir.join("gazette.pdf");
    let bytes = build_pdf(&pages).expect("fixture should build");
    fs::write(&path, bytes).expect("fixture should be written");
    path
}

fn cli(sidecar_root: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("pagecarve-cli");
    cmd.arg("--sidecar-root")
        .arg(sidecar_root)
        .env("PAGECARVE_TESSERACT_BIN", "/nonexistent/tesseract")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_json(cmd: &mut assert_cmd::Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout should contain valid json")
}

/// Sidecar at 72 DPI (pixels equal points) with one article covering the headline.
fn annotated(temp: &Path) -> (PathBuf, PathBuf, String) {
    let root = temp.join("sidecars");
    let pdf = sample_pdf(temp);

    cli(&root).arg("init").arg(&pdf).arg("--dpi").arg("72").assert().success();
    cli(&root).args(["article", "add"]).arg(&pdf).assert().success();
    let added = stdout_json(
        cli(&root)
            .args(["region", "add"])
            .arg(&pdf)
            .args(["--page-index", "0", "--article", "A1", "--bbox", "20,60,570,60"]),
    );
    let region_id = added["region_id"].as_str().expect("region id").to_owned();

    (root, pdf, region_id)
}

#[test]
fn info_reports_pages_and_sidecar_state() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let root = temp.path().join("sidecars");
    let pdf = sample_pdf(temp.path());

    let value = stdout_json(cli(&root).arg("info").arg(&pdf));
    assert_eq!(value["page_count"], 2);
    assert_eq!(value["first_page_size_pt"]["width"].as_f64(), Some(612.0));
    assert_eq!(value["first_page_size_pt"]["height"].as_f64(), Some(792.0));
    assert_eq!(value["annotated"], false);

    let mirrored = root.join(temp.path().file_name().expect("temp name"));
    let expected = mirrored.join("gazette.annotations.json");
    assert_eq!(value["sidecar"].as_str(), expected.to_str());
}

#[cfg(target_os = "linux")]
#[test]
fn central_flag_keeps_sidecars_in_the_user_data_directory() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = sample_pdf(temp.path());
    let data_home = temp.path().join("data");

    let value = stdout_json(
        cargo_bin_cmd!("pagecarve-cli")
            .arg("info")
            .arg(&pdf)
            .arg("--central")
            .env("XDG_DATA_HOME", &data_home)
            .env_remove("RUST_LOG"),
    );
    let sidecar = PathBuf::from(value["sidecar"].as_str().expect("sidecar path"));
    assert!(sidecar.starts_with(&data_home), "{} is outside the data home", sidecar.display());
    assert!(sidecar.ends_with("gazette.annotations.json"));

    cargo_bin_cmd!("pagecarve-cli")
        .args(["info", "--central", "--sidecar-root"])
        .arg(temp.path())
        .arg(&pdf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn article_commands_maintain_the_sidecar() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let root = temp.path().join("sidecars");
    let pdf = sample_pdf(temp.path());

    let first =
        stdout_json(cli(&root).args(["article", "add"]).arg(&pdf).args(["--title", "Harbour"]));
    assert_eq!(first["article_id"], "A1");
    cli(&root).args(["article", "add"]).arg(&pdf).assert().success();
    cli(&root)
        .args(["article", "update"])
        .arg(&pdf)
        .args(["A2", "--author", "Staff reporter", "--reading-hint", "columns"])
        .assert()
        .success();

    let value = stdout_json(cli(&root).args(["article", "list"]).arg(&pdf));
    insta::assert_json_snapshot!("article_list_after_edits", value);

    cli(&root)
        .args(["article", "update"])
        .arg(&pdf)
        .args(["A9", "--title", "Missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown article A9"));
}

#[test]
fn deleting_an_article_removes_its_regions() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let (root, pdf, region_id) = annotated(temp.path());

    let deleted = stdout_json(cli(&root).args(["article", "delete"]).arg(&pdf).arg("A1"));
    assert_eq!(deleted["removed_regions"][0].as_str(), Some(region_id.as_str()));

    let regions = stdout_json(cli(&root).args(["region", "list"]).arg(&pdf));
    assert_eq!(regions, Value::Array(Vec::new()));
}

#[test]
fn region_add_rejects_pages_beyond_the_document() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let (root, pdf, _) = annotated(temp.path());

    cli(&root)
        .args(["region", "add"])
        .arg(&pdf)
        .args(["--page-index", "5", "--article", "A1", "--bbox", "0,0,10,10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("page 5 out of range (page_count=2)"));

    cli(&root)
        .args(["region", "add"])
        .arg(&pdf)
        .args(["--page-index", "0", "--article", "A1", "--bbox", "0,0,-10,10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid geometry"));
}

#[test]
fn region_order_conflicts_fail_and_auto_order_renumbers() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let (root, pdf, first) = annotated(temp.path());

    let second = stdout_json(cli(&root).args(["region", "add"]).arg(&pdf).args([
        "--page-index",
        "0",
        "--article",
        "A1",
        "--bbox",
        "20,10,570,30",
        "--type",
        "header",
    ]));
    let second = second["region_id"].as_str().expect("region id").to_owned();

    cli(&root)
        .args(["region", "order"])
        .arg(&pdf)
        .args([second.as_str(), "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("order 1 is already used"));

    cli(&root).args(["region", "auto-order"]).arg(&pdf).arg("A1").assert().success();

    let regions =
        stdout_json(cli(&root).args(["region", "list"]).arg(&pdf).args(["--article", "A1"]));
    let listed: Vec<(&str, u64, &str)> = regions
        .as_array()
        .expect("array")
        .iter()
        .map(|row| {
            (
                row["region_id"].as_str().unwrap_or_default(),
                row["order"].as_u64().unwrap_or_default(),
                row["type"].as_str().unwrap_or_default(),
            )
        })
        .collect();
    assert_eq!(listed, vec![(second.as_str(), 1, "header"), (first.as_str(), 2, "body")]);
}

#[test]
fn extract_writes_payload_with_native_text() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let (root, pdf, region_id) = annotated(temp.path());

    let summary = stdout_json(cli(&root).arg("extract").arg(&pdf));
    assert_eq!(summary["articles"], 1);
    assert_eq!(summary["methods"]["native_text"], 1);
    assert_eq!(summary["methods"]["ocr_failed"], 0);

    let payload_path = PathBuf::from(summary["payload"].as_str().expect("payload path"));
    assert!(payload_path.ends_with("gazette.articles.json"));
    let bytes = fs::read(&payload_path).expect("payload exists");
    let payload: Value = serde_json::from_slice(&bytes).expect("payload json");

    let article = &payload["articles"][0];
    assert_eq!(article["article_id"], "A1");
    assert_eq!(article["text"], HEADLINE);
    assert_eq!(article["regions_metadata"][0]["region_id"].as_str(), Some(region_id.as_str()));
    assert_eq!(article["regions_metadata"][0]["method"], "native_text");
    assert_eq!(payload["dpi"], 72);
}

#[test]
fn extract_print_and_explicit_output() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let (root, pdf, _) = annotated(temp.path());
    let output = temp.path().join("out").join("payload.json");

    cli(&root)
        .arg("extract")
        .arg(&pdf)
        .args(["--article", "A1", "--print", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("== A1 ==").and(predicate::str::contains(HEADLINE)));

    assert!(output.is_file(), "payload should be written to --output");

    cli(&root)
        .arg("extract")
        .arg(&pdf)
        .args(["--article", "A7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown article A7"));
}

#[test]
fn forced_ocr_without_a_rasterizer_reports_failure_in_metadata() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let (root, pdf, region_id) = annotated(temp.path());

    let native = stdout_json(cli(&root).arg("extract-region").arg(&pdf).arg(&region_id));
    assert_eq!(native["text"], HEADLINE);
    assert_eq!(native["metadata"]["method"], "native_text");

    let forced =
        stdout_json(cli(&root).arg("extract-region").arg(&pdf).arg(&region_id).arg("--force-ocr"));
    assert_eq!(forced["text"], "");
    assert_eq!(forced["metadata"]["method"], "ocr_failed");
    assert!(forced["metadata"]["error"]
        .as_str()
        .is_some_and(|error| error.contains("pdfium")));

    cli(&root)
        .arg("extract-region")
        .arg(&pdf)
        .arg("no-such-region")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown region no-such-region"));
}

#[test]
fn validate_reports_clean_sidecar_and_needs_one() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let root = temp.path().join("sidecars");
    let pdf = sample_pdf(temp.path());

    cli(&root)
        .arg("validate")
        .arg(&pdf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no annotation sidecar"));

    cli(&root).arg("init").arg(&pdf).assert().success();
    let value = stdout_json(cli(&root).arg("validate").arg(&pdf).arg("--strict"));
    assert_eq!(value["warnings"], Value::Array(Vec::new()));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let root = temp.path().join("sidecars");
    let pdf = sample_pdf(temp.path());

    cli(&root).arg("init").arg(&pdf).args(["--ocr-lang", "deu"]).assert().success();
    cli(&root)
        .arg("init")
        .arg(&pdf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("pass --force"));
    cli(&root).arg("init").arg(&pdf).arg("--force").assert().success();
}

#[test]
fn init_rejects_zero_dpi() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let root = temp.path().join("sidecars");
    let pdf = sample_pdf(temp.path());

    cli(&root)
        .arg("init")
        .arg(&pdf)
        .args(["--dpi", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--dpi must be >= 1"));

    let value = stdout_json(cli(&root).arg("info").arg(&pdf));
    assert_eq!(value["annotated"], false);
}

#[test]
fn render_page_needs_a_rasterizing_backend() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let root = temp.path().join("sidecars");
    let pdf = sample_pdf(temp.path());
    let output_path = temp.path().join("page.png");

    cli(&root)
        .arg("render-page")
        .arg(&pdf)
        .args(["--page-index", "1", "--dpi", "36", "--output"])
        .arg(&output_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("rasterization requires the pdfium backend"));
    assert!(!output_path.exists(), "no image should be written");

    cli(&root)
        .arg("render-page")
        .arg(&pdf)
        .args(["--page-index", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn missing_file_is_reported() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cli(temp.path())
        .arg("info")
        .arg(temp.path().join("absent.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn version_prints_package_version() {
    cargo_bin_cmd!("pagecarve-cli")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

// tests/qemu_recipe.rs

//! The qemu recipe: the largest real-world recipe we carry

mod common;

use common::{kitchen, EventLog, FakeFetcher};
use sous::livecheck::{check, scan_versions};
use sous::recipe::format::{DependencyPhase, StepPhase};
use sous::recipe::parse_recipe_file;
use sous::{CancelToken, CpuFamily, HostInfo, HostOs, Kitchen, KitchenConfig, Recipe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/qemu.toml")
}

fn qemu() -> Recipe {
    parse_recipe_file(&fixture()).unwrap()
}

fn kitchen_on(dir: &Path, cpu: CpuFamily, os: HostOs) -> Kitchen {
    let config = KitchenConfig::default()
        .with_prefix(dir.join("prefix"))
        .with_work_dir(dir.join("work"))
        .with_source_cache(None)
        .with_jobs(8);
    Kitchen::with_fetcher(
        config,
        HostInfo::new(cpu, os, "clang"),
        Arc::new(FakeFetcher::new()),
    )
}

#[test]
fn test_metadata_and_version_inference() {
    let recipe = qemu();
    assert_eq!(recipe.name(), "qemu");
    assert_eq!(recipe.version(), "9.1.2");
    assert_eq!(recipe.license(), Some("GPL-2.0-only"));

    let source = recipe.source().unwrap();
    assert_eq!(source.filename(), "qemu-9.1.2.tar.xz");
    assert_eq!(
        source.checksum().digest(),
        "19fd9d7535a54d6e044e186402aa3b3b1bdfa87c392ec8884855592c8510c96f"
    );

    let head = recipe.head().unwrap();
    assert!(head.url.ends_with("qemu.git"));
    assert_eq!(head.branch.as_deref(), Some("master"));
}

#[test]
fn test_dependencies_provided_by_macos_are_dropped() {
    let recipe = qemu();
    let linux = recipe.dependency_names(HostOs::Linux);
    let macos = recipe.dependency_names(HostOs::Macos);

    assert_eq!(linux.len(), 10);
    for provided in ["bison", "flex", "bzip2", "zlib"] {
        assert!(linux.contains(&provided));
        assert!(!macos.contains(&provided));
    }
    assert_eq!(macos, vec!["libtool", "meson", "ninja", "pkgconf", "glib", "libslirp"]);

    let build_only: Vec<&str> = recipe
        .dependencies()
        .iter()
        .filter(|d| d.phase() == DependencyPhase::Build)
        .map(|d| d.name())
        .collect();
    assert_eq!(build_only, vec!["libtool", "meson", "ninja", "pkgconf", "bison", "flex"]);
}

#[test]
fn test_step_phases_are_inferred() {
    let recipe = qemu();
    let phases: Vec<StepPhase> = recipe.steps().iter().map(|s| s.phase()).collect();
    assert_eq!(phases, vec![StepPhase::Configure, StepPhase::Install]);
}

#[test]
fn test_target_list_follows_host_cpu() {
    let dir = TempDir::new().unwrap();
    let recipe = qemu();

    let arm = kitchen_on(dir.path(), CpuFamily::Arm, HostOs::Macos)
        .plan(&recipe)
        .unwrap();
    let configure = &arm.steps[0];
    assert!(configure.args.contains(&"--target-list=aarch64-softmmu".to_string()));
    assert!(configure.args.contains(&"--cc=clang".to_string()));
    let prefix = format!("--prefix={}", dir.path().join("prefix").display());
    assert!(configure.args.contains(&prefix));

    let intel = kitchen_on(dir.path(), CpuFamily::Intel, HostOs::Linux)
        .plan(&recipe)
        .unwrap();
    assert!(intel.steps[0]
        .args
        .contains(&"--target-list=x86_64-softmmu".to_string()));

    assert_eq!(intel.env.get("LIBTOOL").map(String::as_str), Some("glibtool"));
    assert_eq!(intel.env.get("MAKEFLAGS").map(String::as_str), Some("-j8"));
    assert_eq!(intel.steps[1].command_line(), "make V=1 install");
    assert_eq!(intel.urls, vec!["https://download.qemu.org/qemu-9.1.2.tar.xz"]);
}

#[test]
fn test_livecheck_against_download_page() {
    let recipe = qemu();
    let page = r#"
        <a HREF="https://download.qemu.org/qemu-9.0.4.tar.xz">qemu-9.0.4</a>
        <a href="https://download.qemu.org/qemu-9.1.2.tar.xz">qemu-9.1.2</a>
        <a href="https://download.qemu.org/qemu-9.2.0-rc1.tar.xz">qemu-9.2.0-rc1</a>
        <a href="https://download.qemu.org/qemu-9.2.0.tar.xz">qemu-9.2.0</a>
    "#;

    let pattern = recipe.livecheck().unwrap().pattern();
    let versions = scan_versions(page, pattern);
    assert!(versions.contains(&"9.0.4".to_string()));
    assert!(versions.contains(&"9.2.0".to_string()));

    let dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new().serve("https://www.qemu.org/download/", page.as_bytes().to_vec());
    let result = check(&recipe, &fetcher, &CancelToken::new()).unwrap();
    assert_eq!(result.current, "9.1.2");
    assert_eq!(result.latest.as_deref(), Some("9.2.0"));
    assert!(result.outdated);

    // the kitchen helper is shared with the pipeline tests; make sure a
    // qemu plan does not touch the work directory
    let kitchen = kitchen(dir.path(), Arc::new(FakeFetcher::new()), Arc::new(EventLog::default()));
    kitchen.plan(&recipe).unwrap();
    assert!(!dir.path().join("work").exists());
}

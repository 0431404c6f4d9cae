// src/recipe/format.rs

//! Recipe file format definitions
//!
//! Recipes are TOML files, one per software unit. These types mirror the
//! file layout one to one; [`super::model::Recipe`] is the validated form
//! the rest of the engine works with.
//!
//! ```toml
//! name = "qemu"
//! description = "Generic machine emulator and virtualizer"
//! homepage = "https://www.qemu.org/"
//! license = "GPL-2.0-only"
//!
//! [source]
//! url = "https://download.qemu.org/qemu-9.1.2.tar.xz"
//! checksum = "sha256:19fd9d75..."
//!
//! [[dependency]]
//! name = "meson"
//! phase = "build"
//!
//! [[step]]
//! program = "./configure"
//! args = ["--prefix=$PREFIX", "--target-list=${ARCH}-softmmu"]
//! ```

use crate::host::{CpuFamily, HostOs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

/// A recipe exactly as written on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeFile {
    /// Recipe identifier
    pub name: String,

    /// Short human description
    #[serde(default, alias = "desc")]
    pub description: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    /// Version; inferred from the source file name when omitted
    #[serde(default)]
    pub version: Option<String>,

    /// License identifier (SPDX)
    #[serde(default)]
    pub license: Option<String>,

    /// Bumped to force a rebuild without a version change
    #[serde(default)]
    pub revision: u32,

    /// Fixed environment variables for every install step
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Custom interpolation variables
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default)]
    pub source: Option<SourceSection>,

    /// Development branch location (informational)
    #[serde(default)]
    pub head: Option<HeadSection>,

    /// Upstream version discovery (informational)
    #[serde(default)]
    pub livecheck: Option<LivecheckSection>,

    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<DependencySpec>,

    #[serde(default, rename = "patch")]
    pub patches: Vec<PatchSpec>,

    #[serde(default, rename = "transform")]
    pub transforms: Vec<TransformSpec>,

    /// Install procedure, in order
    #[serde(default, rename = "step")]
    pub steps: Vec<StepSpec>,
}

/// Source archive section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSection {
    /// Primary archive URL
    #[serde(default)]
    pub url: Option<String>,

    /// Checksum for the archive (`sha256:...`)
    #[serde(default)]
    pub checksum: Option<String>,

    /// Alternate locations for the same archive, tried in order
    #[serde(default)]
    pub mirrors: Vec<String>,

    /// Directory name after extraction (if different from the single top-level dir)
    #[serde(default)]
    pub extract_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeadSection {
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LivecheckSection {
    /// Page listing upstream releases
    pub url: String,
    /// Regex whose first capture group is a version string
    pub regex: String,
}

/// When a dependency is needed
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
pub enum DependencyPhase {
    /// Needed only while building
    #[serde(rename = "build", alias = "build-only")]
    #[strum(serialize = "build")]
    Build,
    /// Needed while building and at runtime
    #[default]
    #[serde(rename = "run", alias = "build-and-run")]
    #[strum(serialize = "run")]
    Run,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencySpec {
    pub name: String,

    #[serde(default)]
    pub phase: DependencyPhase,

    /// Host operating systems that already provide this dependency
    ///
    /// On those hosts the edge is dropped from resolution.
    #[serde(default)]
    pub provided_on: Vec<HostOs>,
}

/// A patch: exactly one of `inline`, `file` or `url`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchSpec {
    /// Display name (defaults to the file name or `inline-N`)
    #[serde(default)]
    pub name: Option<String>,

    /// Unified diff text embedded in the recipe
    #[serde(default)]
    pub inline: Option<String>,

    /// Path relative to the recipe file
    #[serde(default)]
    pub file: Option<String>,

    /// Remote patch location
    #[serde(default)]
    pub url: Option<String>,

    /// Checksum for remote patches
    #[serde(default)]
    pub checksum: Option<String>,

    /// Leading path components to strip (default: 1)
    #[serde(default = "default_strip")]
    pub strip: u32,
}

fn default_strip() -> u32 {
    1
}

/// A source transform hook invocation
///
/// Every key other than `hook`, `file` and `only_on` is passed to the hook
/// as a parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSpec {
    #[serde(default = "default_hook")]
    pub hook: String,

    /// File relative to the source root
    pub file: String,

    /// Only run on hosts with this CPU family
    #[serde(default)]
    pub only_on: Option<CpuFamily>,

    #[serde(flatten)]
    pub params: BTreeMap<String, String>,
}

fn default_hook() -> String {
    "replace".to_string()
}

/// Which part of the install procedure a step belongs to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StepPhase {
    Configure,
    Build,
    Install,
}

/// One process invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Inferred from the program and arguments when omitted
    #[serde(default)]
    pub phase: Option<StepPhase>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RECIPE: &str = r#"
name = "pkg"
description = "Sample package"
homepage = "https://example.org"
license = "MIT"

[env]
LIBTOOL = "glibtool"

[source]
url = "https://example.org/pkg-1.0.tar.xz"
checksum = "sha256:abc"
mirrors = ["https://mirror.example.org/pkg-1.0.tar.xz"]

[livecheck]
url = "https://example.org/download/"
regex = 'pkg-(\d+(?:\.\d+)+)\.t'

[[dependency]]
name = "libfoo"
phase = "build"

[[dependency]]
name = "zlib"
provided_on = ["macos"]

[[patch]]
file = "fix.diff"

[[transform]]
file = "src/cpu.c"
find = "FEATURE_A |"
replace = ""
only_on = "arm"

[[step]]
program = "./configure"
args = ["--prefix=$PREFIX"]

[[step]]
program = "make"
args = ["install"]
"#;

    #[test]
    fn test_parse_recipe_file() {
        let recipe: RecipeFile = toml::from_str(SAMPLE_RECIPE).unwrap();

        assert_eq!(recipe.name, "pkg");
        assert_eq!(recipe.revision, 0);
        assert_eq!(recipe.env.get("LIBTOOL").map(String::as_str), Some("glibtool"));

        let source = recipe.source.as_ref().unwrap();
        assert_eq!(source.mirrors.len(), 1);

        assert_eq!(recipe.dependencies.len(), 2);
        assert_eq!(recipe.dependencies[0].phase, DependencyPhase::Build);
        assert_eq!(recipe.dependencies[1].phase, DependencyPhase::Run);
        assert_eq!(recipe.dependencies[1].provided_on, vec![HostOs::Macos]);

        assert_eq!(recipe.patches[0].strip, 1);
        assert_eq!(recipe.steps.len(), 2);
        assert!(recipe.steps[0].phase.is_none());
    }

    #[test]
    fn test_transform_params_are_flattened() {
        let recipe: RecipeFile = toml::from_str(SAMPLE_RECIPE).unwrap();
        let transform = &recipe.transforms[0];

        assert_eq!(transform.hook, "replace");
        assert_eq!(transform.only_on, Some(CpuFamily::Arm));
        assert_eq!(transform.params.get("find").map(String::as_str), Some("FEATURE_A |"));
        assert_eq!(transform.params.get("replace").map(String::as_str), Some(""));
        assert!(!transform.params.contains_key("file"));
    }

    #[test]
    fn test_phase_aliases() {
        let toml = r#"
name = "x"

[[dependency]]
name = "a"
phase = "build-only"

[[dependency]]
name = "b"
phase = "build-and-run"
"#;
        let recipe: RecipeFile = toml::from_str(toml).unwrap();
        assert_eq!(recipe.dependencies[0].phase, DependencyPhase::Build);
        assert_eq!(recipe.dependencies[1].phase, DependencyPhase::Run);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
name = "x"
sha256 = "abc"
"#;
        assert!(toml::from_str::<RecipeFile>(toml).is_err());
    }

    #[test]
    fn test_step_phase_order() {
        assert!(StepPhase::Configure < StepPhase::Build);
        assert!(StepPhase::Build < StepPhase::Install);
        assert_eq!("install".parse::<StepPhase>().unwrap(), StepPhase::Install);
    }
}

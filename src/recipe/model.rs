// src/recipe/model.rs

//! Validated, immutable recipes
//!
//! [`Recipe::from_file`] turns a [`RecipeFile`] into a [`Recipe`], enforcing
//! every rule that can be checked without touching the network or the
//! filesystem beyond the recipe itself. Once built, a recipe only exposes
//! read accessors.

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::host::{CpuFamily, HostOs};
use crate::recipe::format::{
    DependencyPhase, PatchSpec, RecipeFile, StepPhase, StepSpec, TransformSpec,
};
use crate::recipe::interpolate::{BUILTIN_VARIABLES, referenced_variables};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Version embedded in an archive name: `qemu-9.1.2.tar.xz` -> `9.1.2`
static VERSION_IN_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-_.]v?(\d+(?:\.\d+)*[a-z]?)(?:\.tar)?\.(?:gz|tgz|xz|txz|bz2|tbz2|zst|tar|zip)$")
        .expect("version pattern is valid")
});

/// Verified source archive location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    urls: Vec<String>,
    checksum: Checksum,
    extract_dir: Option<String>,
}

impl Source {
    /// Primary URL followed by mirrors
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn primary_url(&self) -> &str {
        &self.urls[0]
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    pub fn extract_dir(&self) -> Option<&str> {
        self.extract_dir.as_deref()
    }

    /// Archive file name taken from the primary URL
    pub fn filename(&self) -> String {
        file_name_from_url(self.primary_url()).unwrap_or_else(|| "source.tar.gz".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    pub url: String,
    pub branch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Livecheck {
    url: String,
    pattern: Regex,
}

impl Livecheck {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }
}

/// A dependency edge from the owning recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    name: String,
    phase: DependencyPhase,
    provided_on: Vec<HostOs>,
}

impl Dependency {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> DependencyPhase {
        self.phase
    }

    /// Whether the edge participates in resolution on this host
    pub fn provided_on(&self) -> &[HostOs] {
        &self.provided_on
    }

    pub fn applies_on(&self, os: HostOs) -> bool {
        !self.provided_on.contains(&os)
    }
}

/// Where a patch's text comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOrigin {
    Inline(String),
    File(PathBuf),
    Remote { url: String, checksum: Checksum },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    name: String,
    origin: PatchOrigin,
    strip: u32,
}

impl Patch {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &PatchOrigin {
        &self.origin
    }

    pub fn strip(&self) -> u32 {
        self.strip
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    hook: String,
    file: String,
    only_on: Option<CpuFamily>,
    params: BTreeMap<String, String>,
}

impl Transform {
    pub fn hook(&self) -> &str {
        &self.hook
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Whether the transform runs on a host with this CPU family
    pub fn only_on(&self) -> Option<CpuFamily> {
        self.only_on
    }

    pub fn applies_to(&self, cpu: CpuFamily) -> bool {
        self.only_on.is_none_or(|family| family == cpu)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
    program: String,
    args: Vec<String>,
    phase: StepPhase,
}

impl InstallStep {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }
}

/// A validated recipe
#[derive(Debug, Clone)]
pub struct Recipe {
    name: String,
    version: String,
    description: Option<String>,
    homepage: Option<String>,
    license: Option<String>,
    revision: u32,
    source: Option<Source>,
    head: Option<Head>,
    livecheck: Option<Livecheck>,
    dependencies: Vec<Dependency>,
    patches: Vec<Patch>,
    transforms: Vec<Transform>,
    env: BTreeMap<String, String>,
    variables: BTreeMap<String, String>,
    steps: Vec<InstallStep>,
}

impl Recipe {
    /// Validate a parsed recipe file
    ///
    /// `base_dir` is the directory local patch files are resolved against.
    pub fn from_file(file: RecipeFile, base_dir: &Path) -> Result<Self> {
        let name = file.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::validation("<unnamed>", "recipe name cannot be empty"));
        }
        if name.contains('/') || name.contains(char::is_whitespace) {
            return Err(Error::validation(
                &name,
                "recipe name cannot contain '/' or whitespace",
            ));
        }
        let invalid = |message: String| Error::validation(&name, message);

        let source = match file.source {
            None => None,
            Some(section) => match (section.url, section.checksum) {
                (None, None) => {
                    if !section.mirrors.is_empty() {
                        return Err(invalid("source mirrors given without a url".to_string()));
                    }
                    None
                }
                (Some(url), None) => {
                    return Err(invalid(format!("source url {} has no checksum", url)));
                }
                (None, Some(_)) => {
                    return Err(invalid("source checksum given without a url".to_string()));
                }
                (Some(url), Some(checksum)) => {
                    let checksum = Checksum::parse(&checksum)
                        .map_err(|e| invalid(format!("source checksum: {}", e)))?;
                    let mut urls = vec![url];
                    urls.extend(section.mirrors);
                    if urls.iter().any(|u| u.trim().is_empty()) {
                        return Err(invalid("source url cannot be empty".to_string()));
                    }
                    Some(Source {
                        urls,
                        checksum,
                        extract_dir: section.extract_dir,
                    })
                }
            },
        };

        let version = match file.version {
            Some(version) if !version.trim().is_empty() => version.trim().to_string(),
            _ => source
                .as_ref()
                .and_then(|s| infer_version(&s.filename()))
                .ok_or_else(|| {
                    invalid("version not given and cannot be inferred from the source url".into())
                })?,
        };

        let livecheck = file
            .livecheck
            .map(|section| {
                Regex::new(&section.regex)
                    .map(|pattern| Livecheck {
                        url: section.url,
                        pattern,
                    })
                    .map_err(|e| invalid(format!("livecheck regex: {}", e)))
            })
            .transpose()?;

        let mut dependencies: Vec<Dependency> = Vec::with_capacity(file.dependencies.len());
        for spec in file.dependencies {
            if spec.name == name {
                return Err(invalid("recipe cannot depend on itself".to_string()));
            }
            if dependencies.iter().any(|d| d.name == spec.name) {
                return Err(invalid(format!("duplicate dependency '{}'", spec.name)));
            }
            dependencies.push(Dependency {
                name: spec.name,
                phase: spec.phase,
                provided_on: spec.provided_on,
            });
        }

        let patches = file
            .patches
            .into_iter()
            .enumerate()
            .map(|(index, spec)| build_patch(index, spec, base_dir).map_err(&invalid))
            .collect::<Result<Vec<_>>>()?;

        let transforms = file
            .transforms
            .into_iter()
            .map(|spec| build_transform(spec).map_err(&invalid))
            .collect::<Result<Vec<_>>>()?;

        for key in file.variables.keys() {
            if BUILTIN_VARIABLES.contains(&key.as_str()) {
                return Err(invalid(format!("variable '{}' shadows a built-in", key)));
            }
        }

        let mut steps = Vec::with_capacity(file.steps.len());
        let mut last_phase = StepPhase::Configure;
        for spec in file.steps {
            let step = build_step(spec);
            if step.phase < last_phase {
                return Err(invalid(format!(
                    "step '{}' is a {} step after a {} step",
                    step.program, step.phase, last_phase
                )));
            }
            last_phase = step.phase;
            steps.push(step);
        }

        let recipe = Self {
            name,
            version,
            description: file.description,
            homepage: file.homepage,
            license: file.license,
            revision: file.revision,
            source,
            head: file.head.map(|h| Head {
                url: h.url,
                branch: h.branch,
            }),
            livecheck,
            dependencies,
            patches,
            transforms,
            env: file.env,
            variables: file.variables,
            steps,
        };

        recipe.check_interpolations()?;
        Ok(recipe)
    }

    /// Every `$VAR` used in steps and env must be declared
    fn check_interpolations(&self) -> Result<()> {
        let templates = self
            .steps
            .iter()
            .flat_map(|step| std::iter::once(&step.program).chain(step.args.iter()))
            .chain(self.env.values());

        for template in templates {
            let names = referenced_variables(template)
                .map_err(|e| Error::validation(&self.name, e))?;
            for var in names {
                if !self.is_declared_variable(&var) {
                    return Err(Error::validation(
                        &self.name,
                        format!("'{}' references undeclared variable ${}", template, var),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn is_declared_variable(&self, var: &str) -> bool {
        BUILTIN_VARIABLES.contains(&var) || self.variables.contains_key(var)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Version including the revision suffix when non-zero (`9.1.2_1`)
    pub fn full_version(&self) -> String {
        if self.revision > 0 {
            format!("{}_{}", self.version, self.revision)
        } else {
            self.version.clone()
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn homepage(&self) -> Option<&str> {
        self.homepage.as_deref()
    }

    pub fn license(&self) -> Option<&str> {
        self.license.as_deref()
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn head(&self) -> Option<&Head> {
        self.head.as_ref()
    }

    pub fn livecheck(&self) -> Option<&Livecheck> {
        self.livecheck.as_ref()
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Names of dependencies that take part in resolution on this host
    pub fn dependency_names(&self, os: HostOs) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|d| d.applies_on(os))
            .map(|d| d.name())
            .collect()
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    pub fn steps(&self) -> &[InstallStep] {
        &self.steps
    }
}

fn build_patch(index: usize, spec: PatchSpec, base_dir: &Path) -> std::result::Result<Patch, String> {
    let origins = [spec.inline.is_some(), spec.file.is_some(), spec.url.is_some()]
        .iter()
        .filter(|set| **set)
        .count();
    if origins != 1 {
        return Err(format!(
            "patch #{} must set exactly one of inline, file or url",
            index + 1
        ));
    }

    let (default_name, origin) = if let Some(text) = spec.inline {
        (format!("inline-{}", index + 1), PatchOrigin::Inline(text))
    } else if let Some(file) = spec.file {
        let path = Path::new(&file);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.clone());
        (name, PatchOrigin::File(base_dir.join(path)))
    } else {
        let url = spec.url.unwrap_or_default();
        let checksum = spec
            .checksum
            .as_deref()
            .ok_or_else(|| format!("remote patch {} has no checksum", url))
            .and_then(|c| Checksum::parse(c).map_err(|e| format!("patch checksum: {}", e)))?;
        let name = file_name_from_url(&url).unwrap_or_else(|| format!("patch-{}", index + 1));
        (name, PatchOrigin::Remote { url, checksum })
    };

    if spec.checksum.is_some() && !matches!(origin, PatchOrigin::Remote { .. }) {
        return Err(format!("patch '{}' has a checksum but is not remote", default_name));
    }

    let name = spec.name.unwrap_or(default_name);
    check_patch_name(&name)?;

    Ok(Patch {
        name,
        origin,
        strip: spec.strip,
    })
}

/// Patch names end up as file names under the working directory
fn check_patch_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains(['/', '\\'])
        || Path::new(name).is_absolute()
    {
        return Err(format!(
            "patch name '{}' must be a plain file name without path separators",
            name
        ));
    }
    Ok(())
}

fn build_transform(spec: TransformSpec) -> std::result::Result<Transform, String> {
    let file = Path::new(&spec.file);
    if spec.file.is_empty()
        || file.is_absolute()
        || file.components().any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(format!(
            "transform file '{}' must be a relative path inside the source tree",
            spec.file
        ));
    }

    Ok(Transform {
        hook: spec.hook,
        file: spec.file,
        only_on: spec.only_on,
        params: spec.params,
    })
}

fn build_step(spec: StepSpec) -> InstallStep {
    let phase = spec
        .phase
        .unwrap_or_else(|| infer_step_phase(&spec.program, &spec.args));
    InstallStep {
        program: spec.program,
        args: spec.args,
        phase,
    }
}

/// Guess the phase of a step that does not declare one
///
/// Configure scripts and build-system generators configure; any step with
/// an `install` argument installs; everything else builds.
pub fn infer_step_phase(program: &str, args: &[String]) -> StepPhase {
    let base = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let configures = base == "configure"
        || base == "cmake" && !args.iter().any(|a| a == "--build" || a == "--install")
        || base == "meson" && args.first().is_some_and(|a| a == "setup");

    if configures {
        StepPhase::Configure
    } else if args.iter().any(|a| a == "install" || a == "--install") {
        StepPhase::Install
    } else {
        StepPhase::Build
    }
}

/// Infer a version from an archive file name
pub fn infer_version(filename: &str) -> Option<String> {
    VERSION_IN_FILENAME
        .captures(filename)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn file_name_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "19fd9d7535a54d6e044e186402aa3b3b1bdfa87c392ec8884855592c8510c96f";

    fn parse(toml: &str) -> Result<Recipe> {
        let file: RecipeFile = toml::from_str(toml).unwrap();
        Recipe::from_file(file, Path::new("/recipes"))
    }

    fn minimal(extra: &str) -> String {
        format!(
            r#"
name = "pkg"
{extra}

[source]
url = "https://example.org/pkg-1.0.tar.xz"
checksum = "sha256:{DIGEST}"
"#
        )
    }

    #[test]
    fn test_version_inferred_from_url() {
        let recipe = parse(&minimal("")).unwrap();
        assert_eq!(recipe.version(), "1.0");
        assert_eq!(recipe.source().unwrap().filename(), "pkg-1.0.tar.xz");
    }

    #[test]
    fn test_explicit_version_and_revision() {
        let recipe = parse(&minimal("version = \"2.0\"\nrevision = 3")).unwrap();
        assert_eq!(recipe.version(), "2.0");
        assert_eq!(recipe.full_version(), "2.0_3");
    }

    #[test]
    fn test_infer_version() {
        assert_eq!(infer_version("qemu-9.1.2.tar.xz").as_deref(), Some("9.1.2"));
        assert_eq!(infer_version("zlib-1.3.1.tar.gz").as_deref(), Some("1.3.1"));
        assert_eq!(infer_version("pkgconf_v2.3.tgz").as_deref(), Some("2.3"));
        assert_eq!(infer_version("README"), None);
    }

    #[test]
    fn test_url_without_checksum_rejected() {
        let err = parse(
            r#"
name = "pkg"
version = "1.0"

[source]
url = "https://example.org/pkg-1.0.tar.xz"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("no checksum"));
    }

    #[test]
    fn test_checksum_without_url_rejected() {
        let err = parse(&format!(
            r#"
name = "pkg"
version = "1.0"

[source]
checksum = "sha256:{DIGEST}"
"#
        ))
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_no_source_needs_version() {
        assert!(parse("name = \"meta\"").is_err());
        let recipe = parse("name = \"meta\"\nversion = \"1\"").unwrap();
        assert!(recipe.source().is_none());
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let err = parse(
            r#"
name = "pkg"

[source]
url = "https://example.org/pkg-1.0.tar.xz"
checksum = "md5:abc"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unsupported checksum algorithm"));
    }

    #[test]
    fn test_undeclared_variable_rejected() {
        let toml = minimal("") + "\n[[step]]\nprogram = \"./configure\"\nargs = [\"--with=$LIBDIR\"]\n";
        let err = parse(&toml).unwrap_err();
        assert!(err.to_string().contains("undeclared variable $LIBDIR"));
    }

    #[test]
    fn test_undeclared_variable_in_env_rejected() {
        let toml = minimal("") + "\n[env]\nPKG_CONFIG_PATH = \"$PKGCONF\"\n";
        let err = parse(&toml).unwrap_err();
        assert!(err.to_string().contains("$PKGCONF"));
    }

    #[test]
    fn test_custom_variables_are_declared() {
        let toml = minimal("") + r#"
[variables]
LIBDIR = "lib64"

[[step]]
program = "./configure"
args = ["--libdir=$PREFIX/$LIBDIR"]
"#;
        let recipe = parse(&toml).unwrap();
        assert!(recipe.is_declared_variable("LIBDIR"));
    }

    #[test]
    fn test_variable_shadowing_builtin_rejected() {
        let toml = minimal("") + "\n[variables]\nPREFIX = \"/nope\"\n";
        assert!(parse(&toml).is_err());
    }

    #[test]
    fn test_step_phase_inference() {
        let args = |a: &[&str]| a.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(infer_step_phase("./configure", &args(&["--prefix=/x"])), StepPhase::Configure);
        assert_eq!(infer_step_phase("meson", &args(&["setup", "build"])), StepPhase::Configure);
        assert_eq!(infer_step_phase("cmake", &args(&["--build", "b"])), StepPhase::Build);
        assert_eq!(infer_step_phase("make", &args(&["V=1", "install"])), StepPhase::Install);
        assert_eq!(infer_step_phase("make", &args(&[])), StepPhase::Build);
    }

    #[test]
    fn test_step_phases_must_not_go_backwards() {
        let toml = minimal("") + r#"
[[step]]
program = "make"
args = ["install"]

[[step]]
program = "./configure"
"#;
        let err = parse(&toml).unwrap_err();
        assert!(err.to_string().contains("configure step after a install step"));
    }

    #[test]
    fn test_patch_origins() {
        let toml = minimal("") + &format!(
            r#"
[[patch]]
file = "patches/fix.diff"
strip = 0

[[patch]]
inline = "--- a/x\n+++ b/x\n"

[[patch]]
url = "https://example.org/fix-2.patch"
checksum = "sha256:{DIGEST}"
"#
        );
        let recipe = parse(&toml).unwrap();
        let patches = recipe.patches();
        assert_eq!(patches[0].name(), "fix.diff");
        assert_eq!(patches[0].strip(), 0);
        assert_eq!(
            patches[0].origin(),
            &PatchOrigin::File(PathBuf::from("/recipes/patches/fix.diff"))
        );
        assert_eq!(patches[1].name(), "inline-2");
        assert_eq!(patches[2].name(), "fix-2.patch");
    }

    #[test]
    fn test_remote_patch_requires_checksum() {
        let toml = minimal("") + "\n[[patch]]\nurl = \"https://example.org/fix.patch\"\n";
        assert!(parse(&toml).is_err());
    }

    #[test]
    fn test_patch_with_two_origins_rejected() {
        let toml = minimal("") + "\n[[patch]]\nfile = \"a.diff\"\ninline = \"x\"\n";
        assert!(parse(&toml).is_err());
    }

    #[test]
    fn test_patch_name_with_path_rejected() {
        for name in ["../../../ESCAPED.diff", "sub/fix.diff", "/tmp/fix.diff", "..", ""] {
            let toml = minimal("") + &format!(
                "\n[[patch]]\nname = \"{name}\"\nurl = \"https://example.org/fix.patch\"\nchecksum = \"sha256:{DIGEST}\"\n"
            );
            let err = parse(&toml).unwrap_err();
            assert!(matches!(err, Error::Validation { .. }), "{name}: {err}");
            assert!(err.to_string().contains("plain file name"), "{name}: {err}");
        }
    }

    #[test]
    fn test_transform_escaping_tree_rejected() {
        let toml = minimal("") + "\n[[transform]]\nfile = \"../etc/passwd\"\nfind = \"a\"\nreplace = \"b\"\n";
        assert!(parse(&toml).is_err());
    }

    #[test]
    fn test_bad_livecheck_regex_rejected() {
        let toml = minimal("") + "\n[livecheck]\nurl = \"https://example.org\"\nregex = \"(unclosed\"\n";
        assert!(parse(&toml).is_err());
    }

    #[test]
    fn test_dependency_applies_on_host() {
        let toml = minimal("") + r#"
[[dependency]]
name = "glib"

[[dependency]]
name = "bison"
phase = "build"
provided_on = ["macos"]
"#;
        let recipe = parse(&toml).unwrap();
        assert_eq!(recipe.dependency_names(HostOs::Linux), vec!["glib", "bison"]);
        assert_eq!(recipe.dependency_names(HostOs::Macos), vec!["glib"]);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let toml = minimal("") + "\n[[dependency]]\nname = \"pkg\"\n";
        assert!(parse(&toml).is_err());
    }
}

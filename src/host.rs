// src/host.rs

//! Host identification
//!
//! Everything a recipe build needs to know about the machine it runs on
//! (CPU family, operating system, C compiler) is collected once into a
//! [`HostInfo`] and passed explicitly to the kitchen. Nothing here reads
//! process-wide state after construction.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum_macros::{Display, EnumString};
use tracing::debug;

/// CPU family reported by the host
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CpuFamily {
    Arm,
    Intel,
    PowerPc,
    RiscV,
    Other,
}

impl CpuFamily {
    /// Classify an architecture name as reported by `std::env::consts::ARCH` or `uname -m`
    pub fn from_arch(arch: &str) -> Self {
        match arch {
            "aarch64" | "arm64" | "arm" | "armv7" | "armv7l" => Self::Arm,
            "x86_64" | "x86" | "i386" | "i686" | "amd64" => Self::Intel,
            "powerpc" | "powerpc64" | "ppc64le" => Self::PowerPc,
            "riscv64" | "riscv32" => Self::RiscV,
            _ => Self::Other,
        }
    }
}

/// Host operating system
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    Linux,
    Macos,
    Other,
}

impl HostOs {
    pub fn from_os(os: &str) -> Self {
        match os {
            "linux" => Self::Linux,
            "macos" | "darwin" => Self::Macos,
            _ => Self::Other,
        }
    }
}

/// Emulation target selected for the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
pub enum TargetArch {
    #[strum(serialize = "aarch64")]
    #[serde(rename = "aarch64")]
    Aarch64,
    #[strum(serialize = "x86_64")]
    #[serde(rename = "x86_64")]
    X86_64,
}

impl TargetArch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aarch64 => "aarch64",
            Self::X86_64 => "x86_64",
        }
    }

    /// System-emulation target name (`aarch64-softmmu`)
    pub fn softmmu_target(&self) -> String {
        format!("{}-softmmu", self.as_str())
    }
}

/// Select the target architecture for a host CPU family.
///
/// ARM hosts build the `aarch64` target; every other family builds `x86_64`.
pub fn select_target(cpu: CpuFamily) -> TargetArch {
    match cpu {
        CpuFamily::Arm => TargetArch::Aarch64,
        CpuFamily::Intel | CpuFamily::PowerPc | CpuFamily::RiscV | CpuFamily::Other => {
            TargetArch::X86_64
        }
    }
}

/// Explicit description of the build host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub cpu: CpuFamily,
    pub os: HostOs,
    /// C compiler exported as `CC` and `$CC`
    pub cc: String,
}

impl HostInfo {
    pub fn new(cpu: CpuFamily, os: HostOs, cc: impl Into<String>) -> Self {
        Self {
            cpu,
            os,
            cc: cc.into(),
        }
    }

    /// Detect the running host
    ///
    /// The compiler is taken from `CC` when set, otherwise the first of
    /// `cc`, `clang`, `gcc` found on `PATH`.
    pub fn detect() -> Self {
        let cpu = CpuFamily::from_arch(std::env::consts::ARCH);
        let os = HostOs::from_os(std::env::consts::OS);
        let cc = std::env::var("CC")
            .ok()
            .filter(|cc| !cc.is_empty())
            .or_else(find_compiler)
            .unwrap_or_else(|| "cc".to_string());

        debug!("Detected host: cpu={} os={} cc={}", cpu, os, cc);
        Self { cpu, os, cc }
    }

    pub fn target(&self) -> TargetArch {
        select_target(self.cpu)
    }
}

fn find_compiler() -> Option<String> {
    ["cc", "clang", "gcc"]
        .iter()
        .find_map(|name| which::which(name).ok())
        .map(|path: PathBuf| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_selects_aarch64() {
        assert_eq!(select_target(CpuFamily::Arm), TargetArch::Aarch64);
        assert_eq!(
            select_target(CpuFamily::Arm).softmmu_target(),
            "aarch64-softmmu"
        );
    }

    #[test]
    fn test_non_arm_selects_x86_64() {
        for cpu in [
            CpuFamily::Intel,
            CpuFamily::PowerPc,
            CpuFamily::RiscV,
            CpuFamily::Other,
        ] {
            assert_eq!(select_target(cpu), TargetArch::X86_64);
            assert_eq!(select_target(cpu).softmmu_target(), "x86_64-softmmu");
        }
    }

    #[test]
    fn test_cpu_family_from_arch() {
        assert_eq!(CpuFamily::from_arch("aarch64"), CpuFamily::Arm);
        assert_eq!(CpuFamily::from_arch("arm64"), CpuFamily::Arm);
        assert_eq!(CpuFamily::from_arch("x86_64"), CpuFamily::Intel);
        assert_eq!(CpuFamily::from_arch("riscv64"), CpuFamily::RiscV);
        assert_eq!(CpuFamily::from_arch("sparc64"), CpuFamily::Other);
    }

    #[test]
    fn test_family_names_round_trip() {
        assert_eq!("arm".parse::<CpuFamily>().unwrap(), CpuFamily::Arm);
        assert_eq!(CpuFamily::PowerPc.to_string(), "powerpc");
        assert_eq!("macos".parse::<HostOs>().unwrap(), HostOs::Macos);
    }

    #[test]
    fn test_host_info_target() {
        let host = HostInfo::new(CpuFamily::Arm, HostOs::Macos, "clang");
        assert_eq!(host.target(), TargetArch::Aarch64);
    }
}

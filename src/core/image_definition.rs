//! Classic image definition
//!
//! A TOML document describing how a classic image is assembled: where the
//! gadget tree comes from, how the root filesystem is built, how it is
//! customized and which artifacts are produced.
//!
//! ```toml
//! name = "ubuntu-server-amd64"
//! architecture = "amd64"
//! series = "noble"
//!
//! [gadget]
//! dir = "pc-gadget"
//!
//! [rootfs]
//! tarball = "rootfs.tar.gz"
//!
//! [customization]
//! hostname = "ubuntu"
//!
//! [artifacts]
//! img = { pc = "ubuntu.img" }
//! qcow2 = true
//! manifest = "ubuntu.manifest"
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ImageDefinitionError;

/// Classic image definition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageDefinition {
    /// Image name
    pub name: String,
    /// Target architecture
    pub architecture: String,
    /// Distribution series
    #[serde(default)]
    pub series: Option<String>,
    /// Gadget tree source; images without one produce no disk
    #[serde(default)]
    pub gadget: Option<GadgetSource>,
    /// Root filesystem source
    pub rootfs: RootfsSource,
    /// Changes applied to the built rootfs
    #[serde(default)]
    pub customization: Customization,
    /// Artifacts to produce
    #[serde(default)]
    pub artifacts: Artifacts,
}

/// Where the gadget tree comes from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GadgetSource {
    /// Directory holding the gadget tree sources
    pub dir: PathBuf,
    /// Run `make` in the copied tree before using it
    #[serde(default)]
    pub make: bool,
}

/// How the root filesystem is built
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RootfsSource {
    /// Pre-built rootfs tarball
    #[serde(default)]
    pub tarball: Option<PathBuf>,
    /// Bootstrap from an archive with `debootstrap`
    #[serde(default)]
    pub archive: Option<ArchiveSource>,
}

/// Package archive used to bootstrap the rootfs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArchiveSource {
    /// Mirror URL
    pub mirror: String,
    /// Archive components
    #[serde(default)]
    pub components: Vec<String>,
}

/// Customization of the built rootfs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Customization {
    /// Hostname written to `/etc/hostname`
    #[serde(default)]
    pub hostname: Option<String>,
    /// Files copied into the rootfs
    #[serde(default)]
    pub files: Vec<CopyFile>,
    /// Commands executed inside the rootfs
    #[serde(default)]
    pub execute: Vec<Vec<String>>,
}

/// A file copied into the rootfs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CopyFile {
    /// Host path
    pub source: PathBuf,
    /// Absolute path inside the rootfs
    pub destination: PathBuf,
}

/// Artifacts produced by a classic build
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Artifacts {
    /// Raw image names per volume
    #[serde(default)]
    pub img: IndexMap<String, String>,
    /// Also produce a qcow2 image per volume
    #[serde(default)]
    pub qcow2: bool,
    /// Package manifest file name
    #[serde(default)]
    pub manifest: Option<String>,
    /// Rootfs tarball file name
    #[serde(default)]
    pub rootfs_tarball: Option<String>,
}

impl ImageDefinition {
    /// Parse a definition from TOML
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load, validate and resolve relative paths against the file's directory
    pub fn load(path: &Path) -> Result<Self, ImageDefinitionError> {
        let content = std::fs::read_to_string(path).map_err(|e| ImageDefinitionError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        let mut definition = Self::from_toml(&content).map_err(|e| ImageDefinitionError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        definition.validate()?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        definition.resolve_paths(base);
        Ok(definition)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ImageDefinitionError> {
        if self.rootfs.tarball.is_some() == self.rootfs.archive.is_some() {
            return Err(ImageDefinitionError::RootfsSource);
        }
        if self.gadget.is_none() {
            if !self.artifacts.img.is_empty() {
                return Err(ImageDefinitionError::ArtifactNeedsGadget {
                    artifact: "img".to_string(),
                });
            }
            if self.artifacts.qcow2 {
                return Err(ImageDefinitionError::ArtifactNeedsGadget {
                    artifact: "qcow2".to_string(),
                });
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(gadget) = &mut self.gadget {
            resolve(&mut gadget.dir);
        }
        if let Some(tarball) = &mut self.rootfs.tarball {
            resolve(tarball);
        }
        for file in &mut self.customization.files {
            resolve(&mut file.source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    const SERVER: &str = r#"
name = "ubuntu-server-amd64"
architecture = "amd64"
series = "noble"

[gadget]
dir = "pc-gadget"
make = true

[rootfs]
tarball = "rootfs.tar.gz"

[customization]
hostname = "server"
files = [{ source = "motd", destination = "/etc/motd" }]
execute = [["systemctl", "enable", "ssh"]]

[artifacts]
img = { pc = "server.img" }
qcow2 = true
manifest = "server.manifest"
rootfs-tarball = "server.tar.gz"
"#;

    #[test]
    fn test_parse_full_definition() {
        let definition = ImageDefinition::from_toml(SERVER).unwrap();
        assert_eq!(definition.name, "ubuntu-server-amd64");
        assert!(definition.gadget.as_ref().unwrap().make);
        assert_eq!(definition.customization.hostname.as_deref(), Some("server"));
        assert_eq!(definition.customization.execute[0][0], "systemctl");
        assert_eq!(definition.artifacts.img["pc"], "server.img");
        assert_eq!(
            definition.artifacts.rootfs_tarball.as_deref(),
            Some("server.tar.gz")
        );
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = assert_fs::TempDir::new().unwrap();
        let file = dir.child("server.toml");
        file.write_str(SERVER).unwrap();

        let definition = ImageDefinition::load(file.path()).unwrap();
        assert_eq!(definition.gadget.unwrap().dir, dir.path().join("pc-gadget"));
        assert_eq!(
            definition.rootfs.tarball.unwrap(),
            dir.path().join("rootfs.tar.gz")
        );
        assert_eq!(
            definition.customization.files[0].source,
            dir.path().join("motd")
        );
        // Destinations are rootfs paths and stay absolute
        assert_eq!(
            definition.customization.files[0].destination,
            PathBuf::from("/etc/motd")
        );
    }

    #[test]
    fn test_rootfs_needs_exactly_one_source() {
        let neither = "name = \"x\"\narchitecture = \"amd64\"\n[rootfs]\n";
        let definition = ImageDefinition::from_toml(neither).unwrap();
        assert!(matches!(
            definition.validate(),
            Err(ImageDefinitionError::RootfsSource)
        ));

        let both = "name = \"x\"\narchitecture = \"amd64\"\n[rootfs]\ntarball = \"a.tar\"\n\
                    archive = { mirror = \"http://archive.ubuntu.com/ubuntu\" }\n";
        let definition = ImageDefinition::from_toml(both).unwrap();
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_disk_artifacts_need_gadget() {
        let definition = ImageDefinition::from_toml(
            "name = \"x\"\narchitecture = \"amd64\"\n[rootfs]\ntarball = \"a.tar\"\n\
             [artifacts]\nqcow2 = true\n",
        )
        .unwrap();
        assert!(matches!(
            definition.validate(),
            Err(ImageDefinitionError::ArtifactNeedsGadget { artifact }) if artifact == "qcow2"
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ImageDefinition::load(Path::new("/nonexistent/definition.toml")),
            Err(ImageDefinitionError::Read { .. })
        ));
    }
}

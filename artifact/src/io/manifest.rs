//! Capability manifest stored in a TOML file (`manifest.toml` by default).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::manifest::CapabilityManifest;
use crate::core::validator::Validator;
use crate::io::config::write_atomic;

/// Load a manifest, checking that every pattern compiles.
///
/// If the file is missing, returns the WebContainer manifest.
pub fn load_manifest(path: &Path) -> Result<CapabilityManifest> {
    if !path.exists() {
        return Ok(CapabilityManifest::webcontainer());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let manifest: CapabilityManifest =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Validator::from_manifest(&manifest).with_context(|| format!("validate {}", path.display()))?;
    Ok(manifest)
}

/// Atomically write `manifest` with every default spelled out.
pub fn write_manifest(path: &Path, manifest: &CapabilityManifest) -> Result<()> {
    Validator::from_manifest(manifest).context("validate manifest")?;
    let mut buf = toml::to_string_pretty(&manifest.explicit()).context("serialize manifest toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

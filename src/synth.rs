//! Writing synthesized stacks to disk
//!
//! Output layout:
//!
//! ```text
//! <out_dir>/
//! ├── <stack_name>.template.json
//! └── manifest.json
//! ```
//!
//! The manifest tells the deploy step which template to submit and which
//! local artifacts to upload once the bucket exists.

use crate::compose::{ArtifactSeed, ComposedStack, StackSummary};
use crate::error::{SynthError, SynthResult};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Deployment manifest written next to the template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub template_file: String,
    pub summary: StackSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seeds: Vec<ArtifactSeed>,
}

/// Paths of the files produced by [`write_stack`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthOutput {
    pub template: PathBuf,
    pub manifest: PathBuf,
}

pub fn template_file_name(stack_name: &str) -> String {
    format!("{}.template.json", stack_name)
}

/// Render the template JSON
pub fn render_template(stack: &ComposedStack) -> SynthResult<String> {
    stack
        .template
        .to_json_pretty()
        .map_err(|source| SynthError::Serialize {
            what: "template",
            source,
        })
}

/// Write template and manifest into `out_dir`, creating it if needed
pub fn write_stack(stack: &ComposedStack, out_dir: &Path) -> SynthResult<SynthOutput> {
    std::fs::create_dir_all(out_dir).map_err(|source| SynthError::Write {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let template_file = template_file_name(&stack.summary.stack_name);
    let template_path = out_dir.join(&template_file);
    write_atomic(&template_path, &render_template(stack)?)?;

    let manifest = Manifest {
        template_file,
        summary: stack.summary.clone(),
        seeds: stack.seeds.clone(),
    };
    let manifest_json =
        serde_json::to_string_pretty(&manifest).map_err(|source| SynthError::Serialize {
            what: "manifest",
            source,
        })?;
    let manifest_path = out_dir.join(MANIFEST_FILE);
    write_atomic(&manifest_path, &manifest_json)?;

    tracing::info!(
        template = ?template_path,
        manifest = ?manifest_path,
        seeds = manifest.seeds.len(),
        "Wrote synthesized stack"
    );

    Ok(SynthOutput {
        template: template_path,
        manifest: manifest_path,
    })
}

/// Read a manifest written by [`write_stack`]
pub fn read_manifest(out_dir: &Path) -> anyhow::Result<Manifest> {
    use anyhow::Context;

    let path = out_dir.join(MANIFEST_FILE);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read manifest: {:?}", path))?;
    serde_json::from_str(&content).context("Failed to parse manifest")
}

/// Write to a temp file, sync, then rename over `path`
///
/// The temp file is removed again if any step after its creation fails.
fn write_atomic(path: &Path, content: &str) -> SynthResult<()> {
    let temp_file = path.with_extension("tmp");

    let mut file = std::fs::File::create(&temp_file).map_err(|source| SynthError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    let result = file
        .write_all(content.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .and_then(|()| file.sync_all())
        .and_then(|()| {
            drop(file);
            std::fs::rename(&temp_file, path)
        });

    if let Err(source) = result {
        if let Err(e) = std::fs::remove_file(&temp_file) {
            tracing::warn!(path = ?temp_file, error = %e, "Failed to remove temp file");
        }
        return Err(SynthError::Write {
            path: path.to_path_buf(),
            source,
        });
    }

    Ok(())
}

//! Typed view over ComfyUI history records.
//!
//! A finished prompt's record lists, per output node, the files it wrote
//! under `videos`, `gifs` or `images`. Only the fields needed to locate
//! those files on disk are modelled; everything else is ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Output listing keys, in the order they are searched.
pub const OUTPUT_KINDS: &[&str] = &["videos", "gifs", "images"];

/// One entry of `/history/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryRecord {
    /// Node id to that node's raw output listing, in document order.
    #[serde(default)]
    pub outputs: serde_json::Map<String, serde_json::Value>,
}

/// A file written by an output node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputFile {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub subfolder: Option<String>,
}

impl OutputFile {
    /// Where this file lands under `output_dir`, or `None` without a filename.
    pub fn path_in(&self, output_dir: &Path) -> Option<PathBuf> {
        let filename = self.filename.as_deref().filter(|f| !f.is_empty())?;
        let mut path = output_dir.to_path_buf();
        if let Some(subfolder) = self.subfolder.as_deref().filter(|s| !s.is_empty()) {
            path.push(subfolder);
        }
        path.push(filename);
        Some(path)
    }
}

impl HistoryRecord {
    /// Every listed output file, node by node, videos before gifs before
    /// images. Listings that do not parse as file arrays are skipped.
    pub fn output_files(&self) -> Vec<OutputFile> {
        let mut files = Vec::new();
        for node_output in self.outputs.values() {
            for &kind in OUTPUT_KINDS {
                let Some(listing) = node_output.get(kind) else {
                    continue;
                };
                if let Ok(entries) = serde_json::from_value::<Vec<OutputFile>>(listing.clone()) {
                    files.extend(entries);
                }
            }
        }
        files
    }

    /// First listed output file that already exists under `output_dir`.
    pub fn find_artifact(&self, output_dir: &Path) -> Option<PathBuf> {
        self.output_files()
            .iter()
            .filter_map(|file| file.path_in(output_dir))
            .find(|path| path.is_file())
    }
}

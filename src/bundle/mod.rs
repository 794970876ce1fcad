//! Runner bundles
//!
//! A runner bundle is a tar archive holding a stack of layers plus a
//! `runner.json` manifest. Archives are built deterministically: entries in
//! a fixed order with normalized timestamps, owners and modes. Loading a
//! bundle checks every layer against the digest recorded in the manifest.

mod manifest;

pub use manifest::{LayerEntry, RunnerManifest};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};

use qemu_layer::{parse_layer, Layer};

use crate::locator::{load_layer, LayerSources, LocateError};

/// Schema version for runner.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "qemu-runner/runner_manifest@1";

/// Manifest path within the archive
pub const MANIFEST_PATH: &str = "runner.json";

/// Directory holding the layer texts within the archive
pub const LAYERS_DIR: &str = "layers";

/// Errors for bundle operations
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Manifest error: {0}")]
    ManifestError(#[from] serde_json::Error),

    #[error("Bundle has no {}", MANIFEST_PATH)]
    MissingManifest,

    #[error("Unsupported manifest schema version {found} (expected {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },

    #[error("Bundle entry missing: {0}")]
    MissingEntry(String),

    #[error("Digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Layer {path} is not valid UTF-8")]
    InvalidText { path: String },

    #[error("Invalid layer {name}: {source}")]
    InvalidLayer {
        name: String,
        #[source]
        source: qemu_layer::Error,
    },

    #[error(transparent)]
    Locate(#[from] LocateError),
}

/// A layer stored in a runner bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedLayer {
    /// Path within the archive (`layers/NNN.ini`)
    pub path: String,
    /// Name the layer was requested by when the bundle was made
    pub name: String,
    /// Layer text
    pub text: String,
}

impl EmbeddedLayer {
    pub fn parse(&self) -> Result<Layer, BundleError> {
        parse_layer(&self.text).map_err(|source| BundleError::InvalidLayer {
            name: self.name.clone(),
            source,
        })
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn append_file<W: io::Write>(builder: &mut Builder<W>, path: &str, contents: &[u8]) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_path(path)?;
    header.set_size(contents.len() as u64);
    header.set_mtime(0); // Epoch
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, contents)
}

/// Builds runner bundle archives
#[derive(Debug, Clone, Default)]
pub struct BundleBuilder {
    /// (name, text) in application order
    layers: Vec<(String, String)>,
    script_bases: Vec<String>,
    search_paths: Vec<String>,
    created_at: Option<DateTime<Utc>>,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer
    pub fn with_layer(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.layers.push((name.into(), text.into()));
        self
    }

    /// Add files whose directories are searched for QEMU
    pub fn with_script_bases<I, P>(mut self, bases: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.script_bases
            .extend(bases.into_iter().map(|p| p.as_ref().to_string_lossy().into_owned()));
        self
    }

    /// Add directories searched for QEMU
    pub fn with_search_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.search_paths
            .extend(paths.into_iter().map(|p| p.as_ref().to_string_lossy().into_owned()));
        self
    }

    /// Pin the manifest timestamp; defaults to the build time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Validate the layers and create the archive
    pub fn build(&self) -> Result<BundleResult, BundleError> {
        let mut entries = Vec::with_capacity(self.layers.len());

        for (index, (name, text)) in self.layers.iter().enumerate() {
            parse_layer(text).map_err(|source| BundleError::InvalidLayer {
                name: name.clone(),
                source,
            })?;

            entries.push(LayerEntry {
                path: format!("{}/{:03}.ini", LAYERS_DIR, index),
                name: name.clone(),
                sha256: sha256_hex(text.as_bytes()),
            });
        }

        let manifest = RunnerManifest {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            layers: entries,
            script_bases: self.script_bases.clone(),
            search_paths: self.search_paths.clone(),
        };

        let mut tar_buffer = Vec::new();
        {
            let mut builder = Builder::new(&mut tar_buffer);

            append_file(&mut builder, MANIFEST_PATH, manifest.to_json()?.as_bytes())?;
            for (entry, (_, text)) in manifest.layers.iter().zip(&self.layers) {
                tracing::debug!(path = %entry.path, layer = %entry.name, "adding layer to bundle");
                append_file(&mut builder, &entry.path, text.as_bytes())?;
            }

            builder.finish()?;
        }

        let bundle_sha256 = sha256_hex(&tar_buffer);

        Ok(BundleResult {
            tar_bytes: tar_buffer,
            bundle_sha256,
            manifest,
        })
    }
}

/// Result of building a bundle
#[derive(Debug)]
pub struct BundleResult {
    /// The archive bytes
    pub tar_bytes: Vec<u8>,
    /// SHA-256 of the archive bytes
    pub bundle_sha256: String,
    /// Manifest stored in the archive
    pub manifest: RunnerManifest,
}

impl BundleResult {
    /// Write the archive to a file
    pub fn write(&self, path: &Path) -> io::Result<()> {
        fs::write(path, &self.tar_bytes)
    }

    /// Archive size in bytes
    pub fn size(&self) -> u64 {
        self.tar_bytes.len() as u64
    }
}

/// A loaded and verified runner bundle
#[derive(Debug, Clone)]
pub struct RunnerBundle {
    location: Option<PathBuf>,
    manifest: RunnerManifest,
    layers: Vec<EmbeddedLayer>,
}

impl RunnerBundle {
    /// Load a bundle from disk
    pub fn load(path: &Path) -> Result<Self, BundleError> {
        let bytes = fs::read(path)?;
        let location = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        tracing::debug!(path = %location.display(), "loading runner bundle");
        Self::from_bytes(&bytes, Some(location))
    }

    /// Read a bundle from archive bytes
    pub fn from_bytes(bytes: &[u8], location: Option<PathBuf>) -> Result<Self, BundleError> {
        let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();

        let mut archive = Archive::new(bytes);
        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path()?.to_string_lossy().into_owned();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            files.insert(path, contents);
        }

        let manifest_bytes = files.get(MANIFEST_PATH).ok_or(BundleError::MissingManifest)?;
        let manifest_text = std::str::from_utf8(manifest_bytes).map_err(|_| BundleError::InvalidText {
            path: MANIFEST_PATH.to_string(),
        })?;
        let manifest = RunnerManifest::from_json(manifest_text)?;
        if manifest.schema_version != SCHEMA_VERSION {
            return Err(BundleError::UnsupportedSchema {
                found: manifest.schema_version,
                expected: SCHEMA_VERSION,
            });
        }

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for entry in &manifest.layers {
            let contents = files
                .remove(&entry.path)
                .ok_or_else(|| BundleError::MissingEntry(entry.path.clone()))?;

            let actual = sha256_hex(&contents);
            if actual != entry.sha256 {
                return Err(BundleError::DigestMismatch {
                    path: entry.path.clone(),
                    expected: entry.sha256.clone(),
                    actual,
                });
            }

            let text = String::from_utf8(contents).map_err(|_| BundleError::InvalidText {
                path: entry.path.clone(),
            })?;

            layers.push(EmbeddedLayer {
                path: entry.path.clone(),
                name: entry.name.clone(),
                text,
            });
        }

        Ok(Self {
            location,
            manifest,
            layers,
        })
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn manifest(&self) -> &RunnerManifest {
        &self.manifest
    }

    /// Embedded layers in application order
    pub fn layers(&self) -> &[EmbeddedLayer] {
        &self.layers
    }

    /// Parse every embedded layer
    pub fn parse_layers(&self) -> Result<Vec<Layer>, BundleError> {
        self.layers.iter().map(EmbeddedLayer::parse).collect()
    }

    /// The bundle's own location followed by the tracked base bundles
    pub fn script_bases(&self) -> Vec<PathBuf> {
        self.location
            .iter()
            .cloned()
            .chain(self.manifest.script_bases.iter().map(PathBuf::from))
            .collect()
    }

    /// QEMU search directories recorded in the manifest
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.manifest.search_paths.iter().map(PathBuf::from).collect()
    }

    /// Human-readable listing of the embedded layers
    pub fn inspect(&self) -> String {
        let mut out = String::new();
        for layer in &self.layers {
            out.push_str(&format!("# Layer {}:\n", layer.path));
            out.push_str(layer.text.trim());
            out.push_str("\n\n");
        }
        out
    }
}

fn load_named_layers(names: &[String], sources: &LayerSources) -> Result<Vec<(String, String)>, BundleError> {
    names
        .iter()
        .map(|name| {
            let located = load_layer(name, sources)?;
            Ok((located.name, located.text))
        })
        .collect()
}

/// Build a bundle from layers found through the locator
pub fn make_bundle(
    names: &[String],
    sources: &LayerSources,
    search_paths: &[PathBuf],
) -> Result<BundleResult, BundleError> {
    let mut builder = BundleBuilder::new().with_search_paths(search_paths);
    for (name, text) in load_named_layers(names, sources)? {
        builder = builder.with_layer(name, text);
    }
    builder.build()
}

/// Options for [`derive_bundle`]
#[derive(Debug, Clone, Default)]
pub struct DeriveOptions {
    /// Search for QEMU relative to the base bundle's location
    pub track_qemu: bool,
    /// Extra QEMU search directory
    pub qemu_dir: Option<PathBuf>,
}

/// Build a bundle holding `base`'s layers followed by more layers
pub fn derive_bundle(
    base: &RunnerBundle,
    names: &[String],
    sources: &LayerSources,
    options: &DeriveOptions,
) -> Result<BundleResult, BundleError> {
    let mut builder = BundleBuilder::new();

    for layer in base.layers() {
        builder = builder.with_layer(layer.name.clone(), layer.text.clone());
    }
    for (name, text) in load_named_layers(names, sources)? {
        builder = builder.with_layer(name, text);
    }

    if options.track_qemu {
        builder = builder.with_script_bases(base.script_bases());
    }

    builder
        .with_search_paths(base.search_paths())
        .with_search_paths(options.qemu_dir.iter())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const BOARD: &str = "[general]\nengine = qemu-system-arm\n\n[machine]\n@ = virt\n";
    const DEVICE: &str = "[device:edi]\n@ = kp-edi-group\n";

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(0, 0).unwrap()
    }

    fn sample() -> BundleResult {
        BundleBuilder::new()
            .with_layer("board.ini", BOARD)
            .with_layer("device.ini", DEVICE)
            .with_search_paths(["/opt/qemu"])
            .with_created_at(epoch())
            .build()
            .unwrap()
    }

    fn rebuild_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buffer = Vec::new();
        {
            let mut builder = Builder::new(&mut buffer);
            for (path, contents) in files {
                append_file(&mut builder, path, contents).unwrap();
            }
            builder.finish().unwrap();
        }
        buffer
    }

    #[test]
    fn test_build_and_load() {
        let result = sample();
        assert_eq!(result.manifest.layers.len(), 2);
        assert_eq!(result.manifest.layers[0].path, "layers/000.ini");
        assert_eq!(result.manifest.layers[1].path, "layers/001.ini");
        assert_eq!(result.manifest.layers[1].name, "device.ini");

        let bundle = RunnerBundle::from_bytes(&result.tar_bytes, None).unwrap();
        assert_eq!(bundle.manifest(), &result.manifest);
        assert_eq!(bundle.layers()[0].text, BOARD);
        assert_eq!(bundle.layers()[1].text, DEVICE);
        assert_eq!(bundle.search_paths(), vec![PathBuf::from("/opt/qemu")]);
        assert!(bundle.script_bases().is_empty());

        let layers = bundle.parse_layers().unwrap();
        assert_eq!(layers[0].general().engine, "qemu-system-arm");
    }

    #[test]
    fn test_deterministic_archive() {
        let first = sample();
        let second = sample();
        assert_eq!(first.tar_bytes, second.tar_bytes);
        assert_eq!(first.bundle_sha256, second.bundle_sha256);
        assert_eq!(first.bundle_sha256.len(), 64);
    }

    #[test]
    fn test_archive_headers_normalized() {
        let result = sample();
        let mut archive = Archive::new(result.tar_bytes.as_slice());
        let mut paths = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let header = entry.header();
            assert_eq!(header.mtime().unwrap(), 0);
            assert_eq!(header.uid().unwrap(), 0);
            assert_eq!(header.gid().unwrap(), 0);
            assert_eq!(header.mode().unwrap(), 0o644);
            paths.push(entry.path().unwrap().to_string_lossy().into_owned());
        }
        assert_eq!(paths, vec!["runner.json", "layers/000.ini", "layers/001.ini"]);
    }

    #[test]
    fn test_invalid_layer_rejected() {
        let result = BundleBuilder::new().with_layer("bad.ini", "engine = x\n").build();
        assert!(matches!(result, Err(BundleError::InvalidLayer { name, .. }) if name == "bad.ini"));
    }

    #[test]
    fn test_digest_mismatch() {
        let result = sample();
        let manifest = result.manifest.to_json().unwrap();
        let tampered = rebuild_tar(&[
            ("runner.json", manifest.as_bytes()),
            ("layers/000.ini", b"[general]\nengine = evil\n"),
            ("layers/001.ini", DEVICE.as_bytes()),
        ]);

        let err = RunnerBundle::from_bytes(&tampered, None).unwrap_err();
        assert!(matches!(err, BundleError::DigestMismatch { ref path, .. } if path == "layers/000.ini"));
    }

    #[test]
    fn test_missing_manifest() {
        let tar = rebuild_tar(&[("layers/000.ini", BOARD.as_bytes())]);
        assert!(matches!(RunnerBundle::from_bytes(&tar, None), Err(BundleError::MissingManifest)));
    }

    #[test]
    fn test_manifest_not_utf8() {
        let tar = rebuild_tar(&[("runner.json", &[0xff, 0xfe, b'{'][..])]);
        let err = RunnerBundle::from_bytes(&tar, None).unwrap_err();
        assert!(matches!(err, BundleError::InvalidText { path } if path == "runner.json"));
    }

    #[test]
    fn test_missing_entry() {
        let result = sample();
        let manifest = result.manifest.to_json().unwrap();
        let tar = rebuild_tar(&[("runner.json", manifest.as_bytes()), ("layers/000.ini", BOARD.as_bytes())]);

        let err = RunnerBundle::from_bytes(&tar, None).unwrap_err();
        assert!(matches!(err, BundleError::MissingEntry(path) if path == "layers/001.ini"));
    }

    #[test]
    fn test_unsupported_schema() {
        let mut manifest = sample().manifest;
        manifest.schema_version = 99;
        let json = manifest.to_json().unwrap();
        let tar = rebuild_tar(&[("runner.json", json.as_bytes())]);

        let err = RunnerBundle::from_bytes(&tar, None).unwrap_err();
        assert!(matches!(err, BundleError::UnsupportedSchema { found: 99, expected: 1 }));
    }

    #[test]
    fn test_inspect() {
        let bundle = RunnerBundle::from_bytes(&sample().tar_bytes, None).unwrap();
        assert_eq!(
            bundle.inspect(),
            "# Layer layers/000.ini:\n[general]\nengine = qemu-system-arm\n\n[machine]\n@ = virt\n\n\
             # Layer layers/001.ini:\n[device:edi]\n@ = kp-edi-group\n\n"
        );
    }

    #[test]
    fn test_load_records_location() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("base.tar");
        sample().write(&path).unwrap();

        let bundle = RunnerBundle::load(&path).unwrap();
        let location = path.canonicalize().unwrap();
        assert_eq!(bundle.location(), Some(location.as_path()));
        assert_eq!(bundle.script_bases(), vec![location]);
    }

    #[test]
    fn test_make_bundle_from_locator() {
        let cwd = TempDir::new().unwrap();
        fs::write(cwd.path().join("device.ini"), DEVICE).unwrap();
        let sources = LayerSources::new(cwd.path());

        let names = vec!["virt-cortex-m.ini".to_string(), "device.ini".to_string()];
        let result = make_bundle(&names, &sources, &[PathBuf::from("/opt/qemu")]).unwrap();

        let bundle = RunnerBundle::from_bytes(&result.tar_bytes, None).unwrap();
        assert_eq!(bundle.layers()[0].name, "virt-cortex-m.ini");
        assert_eq!(bundle.layers()[1].text, DEVICE);
        assert_eq!(bundle.manifest().search_paths, vec!["/opt/qemu"]);
    }

    #[test]
    fn test_make_bundle_missing_layer() {
        let cwd = TempDir::new().unwrap();
        let result = make_bundle(&["nope.ini".to_string()], &LayerSources::new(cwd.path()), &[]);
        assert!(matches!(result, Err(BundleError::Locate(LocateError::NotFound(_)))));
    }

    #[test]
    fn test_derive_bundle() {
        let tmp = TempDir::new().unwrap();
        let base_path = tmp.path().join("base.tar");
        BundleBuilder::new()
            .with_layer("board.ini", BOARD)
            .with_script_bases(["/origin/runner.tar"])
            .with_search_paths(["/opt/qemu"])
            .build()
            .unwrap()
            .write(&base_path)
            .unwrap();
        fs::write(tmp.path().join("device.ini"), DEVICE).unwrap();

        let base = RunnerBundle::load(&base_path).unwrap();
        let sources = LayerSources::new(tmp.path());
        let names = vec!["device.ini".to_string()];

        let untracked = derive_bundle(
            &base,
            &names,
            &sources,
            &DeriveOptions {
                track_qemu: false,
                qemu_dir: Some(PathBuf::from("/extra/qemu")),
            },
        )
        .unwrap();
        let derived = RunnerBundle::from_bytes(&untracked.tar_bytes, None).unwrap();
        let names: Vec<&str> = derived.layers().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["board.ini", "device.ini"]);
        assert!(derived.manifest().script_bases.is_empty());
        assert_eq!(derived.manifest().search_paths, vec!["/opt/qemu", "/extra/qemu"]);

        let tracked = derive_bundle(
            &base,
            &["device.ini".to_string()],
            &sources,
            &DeriveOptions {
                track_qemu: true,
                qemu_dir: None,
            },
        )
        .unwrap();
        let base_location = base_path.canonicalize().unwrap().to_string_lossy().into_owned();
        assert_eq!(
            tracked.manifest.script_bases,
            vec![base_location, "/origin/runner.tar".to_string()]
        );
    }
}

//! Packagers standing in for the external tool in tests
//!
//! Enabled for this crate's unit tests and, through the `testing` feature,
//! for the integration tests of this crate and the server.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{PackagingError, PackagingResult};
use crate::packager::{MeshPackager, PackagedTile};
use crate::tileset::{system_transform, Tileset};

/// Writes a minimal Y-up tileset to `Batched<stem>/tileset.json` next to
/// each mesh, like the real tool does
#[derive(Debug, Default)]
pub struct FakePackager {
    calls: AtomicUsize,
    fail_on: Option<String>,
}

impl FakePackager {
    /// Packager failing on the mesh with file stem `stem`
    pub fn failing_on(stem: impl Into<String>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Some(stem.into()),
        }
    }

    /// Number of packaging runs so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MeshPackager for FakePackager {
    fn probe(&self) -> PackagingResult<String> {
        Ok("fake-packager 0.0".to_string())
    }

    fn package(&self, mesh_path: &Path) -> PackagingResult<PackagedTile> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stem = mesh_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.fail_on.as_deref() == Some(stem.as_str()) {
            return Err(PackagingError::Failed {
                status: "exit status: 1".to_string(),
                stderr: format!("cannot convert {}", stem),
            });
        }

        let dir = mesh_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(format!("Batched{}", stem));
        std::fs::create_dir_all(&dir)?;
        let mut tileset = Tileset::with_root(system_transform([0.0; 3]), [0.0; 12], 1.0, 1.0, Vec::new());
        tileset.asset.gltf_up_axis = Some("Y".to_string());
        tileset.root.transform = None;
        let tileset_path = dir.join("tileset.json");
        tileset.save(&tileset_path)?;
        Ok(PackagedTile {
            tileset_path,
            tileset,
        })
    }
}

/// Packager whose tool is not installed
#[derive(Debug, Default)]
pub struct MissingPackager;

impl MeshPackager for MissingPackager {
    fn probe(&self) -> PackagingResult<String> {
        Err(PackagingError::Unavailable {
            message: "obj23dtiles: not found".to_string(),
        })
    }

    fn package(&self, _mesh_path: &Path) -> PackagingResult<PackagedTile> {
        Err(PackagingError::Unavailable {
            message: "obj23dtiles: not found".to_string(),
        })
    }
}

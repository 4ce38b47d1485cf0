//! External mesh packager
//!
//! Binary tile encoding is delegated to a command-line tool that turns a
//! wavefront mesh into a batched tile plus a local tileset. The
//! `MeshPackager` trait is the seam; `CommandPackager` drives the real tool
//! and bounds every run with a timeout.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::PackagerConfig;
use crate::error::{PackagingError, PackagingResult};
use crate::tileset::Tileset;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Output of one packaging run
#[derive(Debug, Clone, PartialEq)]
pub struct PackagedTile {
    /// Location of the tile's local tileset
    pub tileset_path: PathBuf,
    /// Parsed local tileset
    pub tileset: Tileset,
}

/// Converts a wavefront mesh into a renderer-ready tile
pub trait MeshPackager: Send + Sync {
    /// Check that the packager can run; returns its version text
    fn probe(&self) -> PackagingResult<String>;

    /// Package the mesh at `mesh_path`
    fn package(&self, mesh_path: &Path) -> PackagingResult<PackagedTile>;
}

/// Packager backed by an external command
#[derive(Debug, Clone)]
pub struct CommandPackager {
    program: String,
    args: Vec<String>,
    version_args: Vec<String>,
    tileset_pattern: String,
    timeout: Duration,
}

impl CommandPackager {
    pub fn new(config: &PackagerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            version_args: config.version_args.clone(),
            tileset_pattern: config.tileset_pattern.clone(),
            timeout: Duration::from_secs_f64(config.timeout_secs.max(0.0)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Where the tileset for `mesh_path` is expected
    pub fn tileset_path_for(&self, mesh_path: &Path) -> PathBuf {
        let stem = mesh_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = mesh_path.parent().unwrap_or_else(|| Path::new(""));
        dir.join(self.tileset_pattern.replace("{stem}", &stem))
    }

    /// Run the program to completion or until the timeout expires
    fn run(&self, args: &[String], cwd: Option<&Path>) -> PackagingResult<String> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| PackagingError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        // On expiry the readers are left detached: grandchildren may still
        // hold the pipes open
        let Some(status) = wait_with_deadline(&mut child, self.timeout)? else {
            return Err(PackagingError::Timeout {
                seconds: self.timeout.as_secs_f64(),
            });
        };
        let stdout = join_drain(stdout);
        let stderr = join_drain(stderr);

        if status.success() {
            Ok(stdout)
        } else {
            Err(PackagingError::Failed {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

impl MeshPackager for CommandPackager {
    fn probe(&self) -> PackagingResult<String> {
        self.run(&self.version_args, None)
            .map(|out| out.trim().to_string())
            .map_err(|e| PackagingError::Unavailable {
                message: e.to_string(),
            })
    }

    /// The tool runs inside the mesh directory and is handed the bare file
    /// name, so relative output directories resolve the same way for both.
    fn package(&self, mesh_path: &Path) -> PackagingResult<PackagedTile> {
        let input = mesh_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PackagingError::Output {
                path: mesh_path.to_path_buf(),
                message: "mesh path has no file name".to_string(),
            })?;
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{input}", &input))
            .collect();
        let cwd = mesh_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());

        tracing::debug!("Packaging {} with {}", mesh_path.display(), self.program);
        self.run(&args, cwd)?;

        let tileset_path = self.tileset_path_for(mesh_path);
        let tileset = Tileset::load(&tileset_path)?;
        Ok(PackagedTile {
            tileset_path,
            tileset,
        })
    }
}

/// Poll `child` until it exits; kills it and returns `None` on expiry
fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> PackagingResult<Option<std::process::ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            tracing::warn!("Packager exceeded {:?}, killing pid {}", timeout, child.id());
            // The child may exit between try_wait and kill
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Read a pipe on its own thread so a chatty child cannot block on a full pipe
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str, timeout_secs: f64) -> CommandPackager {
        CommandPackager::new(&PackagerConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            version_args: vec!["-c".to_string(), "echo packager 1.2.3".to_string()],
            tileset_pattern: "Batched{stem}/tileset.json".to_string(),
            timeout_secs,
        })
    }

    #[test]
    fn test_probe_reports_version() {
        assert_eq!(shell("true", 5.0).probe().unwrap(), "packager 1.2.3");
    }

    #[test]
    fn test_probe_missing_program() {
        let packager = CommandPackager::new(&PackagerConfig {
            program: "definitely-not-an-installed-packager".to_string(),
            ..PackagerConfig::default()
        });
        assert!(matches!(
            packager.probe(),
            Err(PackagingError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_tileset_path_pattern() {
        let packager = shell("true", 5.0);
        assert_eq!(
            packager.tileset_path_for(Path::new("/out/tile_0/isosurf_0.obj")),
            PathBuf::from("/out/tile_0/Batchedisosurf_0/tileset.json")
        );
    }

    #[test]
    fn test_package_reads_tileset() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = dir.path().join("isosurf_0.obj");
        std::fs::write(&mesh, "o isosurf_0\n").unwrap();

        let script = r#"test -f "{input}" && mkdir -p Batchedisosurf_0 && printf '%s' '{"asset":{"version":"0.0"},"geometricError":1,"root":{"boundingVolume":{"box":[0,0,0,1,0,0,0,1,0,0,0,1]},"geometricError":0,"content":{"url":"isosurf_0.b3dm"}}}' > Batchedisosurf_0/tileset.json"#;
        let tile = shell(script, 5.0).package(&mesh).unwrap();
        assert_eq!(
            tile.tileset_path,
            dir.path().join("Batchedisosurf_0").join("tileset.json")
        );
        assert_eq!(
            tile.tileset.root.content.as_ref().map(|c| c.uri.as_str()),
            Some("isosurf_0.b3dm")
        );
    }

    #[test]
    fn test_package_relative_mesh_path() {
        let dir = tempfile::tempdir_in(".").unwrap();
        assert!(dir.path().is_relative());
        let tile_dir = dir.path().join("tile_0");
        std::fs::create_dir_all(&tile_dir).unwrap();
        let mesh = tile_dir.join("isosurf_0.obj");
        std::fs::write(&mesh, "o isosurf_0\n").unwrap();

        let script = r#"test -f "{input}" || { echo "no such input {input}" >&2; exit 1; }; mkdir -p Batchedisosurf_0 && printf '%s' '{"asset":{"version":"0.0"},"geometricError":1,"root":{"boundingVolume":{"box":[0,0,0,1,0,0,0,1,0,0,0,1]},"geometricError":0}}' > Batchedisosurf_0/tileset.json"#;
        let tile = shell(script, 5.0).package(&mesh).unwrap();
        assert_eq!(tile.tileset_path, tile_dir.join("Batchedisosurf_0").join("tileset.json"));
        assert!(tile.tileset_path.exists());
    }

    #[test]
    fn test_package_failure_status() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = dir.path().join("m.obj");
        std::fs::write(&mesh, "").unwrap();
        let err = shell("echo broken >&2; exit 3", 5.0).package(&mesh).unwrap_err();
        match err {
            PackagingError::Failed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_package_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = dir.path().join("m.obj");
        std::fs::write(&mesh, "").unwrap();
        assert!(matches!(
            shell("true", 5.0).package(&mesh),
            Err(PackagingError::Output { .. })
        ));
    }

    #[test]
    fn test_package_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = dir.path().join("m.obj");
        std::fs::write(&mesh, "").unwrap();
        let started = Instant::now();
        let err = shell("sleep 5", 0.2).package(&mesh).unwrap_err();
        assert!(matches!(err, PackagingError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}

//! Triangle meshes and their wavefront hand-off format

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Smallest diagonal the normalization divides by
pub const NORMALIZATION_EPSILON: f64 = 1e-12;

/// Indexed triangle mesh with per-vertex normals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the mesh has no triangles
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Bounds of the vertex positions, `None` for a mesh without vertices
    pub fn bounds(&self) -> Option<Aabb> {
        let mut positions = self.positions.iter();
        let first = positions.next()?;
        let mut bounds = Aabb::from_point(to_f64(*first));
        for p in positions {
            bounds.include(to_f64(*p));
        }
        Some(bounds)
    }

    /// Copy of the mesh with `transform` applied to every position
    ///
    /// A uniform scale leaves normals unchanged.
    pub fn transformed(&self, transform: &Normalization) -> Mesh {
        Mesh {
            positions: self
                .positions
                .iter()
                .map(|p| {
                    let q = transform.apply(to_f64(*p));
                    [q[0] as f32, q[1] as f32, q[2] as f32]
                })
                .collect(),
            normals: self.normals.clone(),
            triangles: self.triangles.clone(),
        }
    }

    /// Write the mesh as wavefront text with 1-based `v//vn` faces
    pub fn write_obj<W: Write>(&self, out: &mut W, name: &str) -> std::io::Result<()> {
        writeln!(out, "o {}", name)?;
        for v in &self.positions {
            writeln!(out, "v {} {} {}", v[0], v[1], v[2])?;
        }
        for n in &self.normals {
            writeln!(out, "vn {} {} {}", n[0], n[1], n[2])?;
        }
        for t in &self.triangles {
            let (a, b, c) = (t[0] + 1, t[1] + 1, t[2] + 1);
            writeln!(out, "f {}//{} {}//{} {}//{}", a, a, b, b, c, c)?;
        }
        Ok(())
    }

    pub fn to_obj_string(&self, name: &str) -> String {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_obj(&mut out, name);
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Write the mesh to a wavefront file, replacing any existing file
    pub fn save_obj(&self, path: &Path, name: &str) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_obj(&mut out, name)?;
        out.flush()
    }
}

fn to_f64(p: [f32; 3]) -> [f64; 3] {
    [p[0] as f64, p[1] as f64, p[2] as f64]
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Aabb {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    pub fn from_point(p: [f64; 3]) -> Self {
        Self { min: p, max: p }
    }

    /// Grow the box to contain `p`
    pub fn include(&mut self, p: [f64; 3]) {
        for a in 0..3 {
            self.min[a] = self.min[a].min(p[a]);
            self.max[a] = self.max[a].max(p[a]);
        }
    }

    /// Smallest box containing both
    pub fn union(&self, other: &Aabb) -> Aabb {
        let mut out = *self;
        out.include(other.min);
        out.include(other.max);
        out
    }

    pub fn center(&self) -> [f64; 3] {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ]
    }

    pub fn half_extents(&self) -> [f64; 3] {
        [
            0.5 * (self.max[0] - self.min[0]),
            0.5 * (self.max[1] - self.min[1]),
            0.5 * (self.max[2] - self.min[2]),
        ]
    }

    /// Length of the min-max diagonal
    pub fn diagonal(&self) -> f64 {
        (0..3)
            .map(|a| (self.max[a] - self.min[a]).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Oriented box form: center followed by the x, y and z half-axes
    pub fn to_oriented_box(&self) -> [f64; 12] {
        let c = self.center();
        let h = self.half_extents();
        [
            c[0], c[1], c[2], //
            h[0], 0.0, 0.0, //
            0.0, h[1], 0.0, //
            0.0, 0.0, h[2],
        ]
    }

    /// Box mapped through `transform`
    pub fn transformed(&self, transform: &Normalization) -> Aabb {
        let mut out = Aabb::from_point(transform.apply(self.min));
        out.include(transform.apply(self.max));
        out
    }
}

/// Uniform scale followed by a translation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub scale: f64,
    pub translate: [f64; 3],
}

impl Normalization {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            translate: [0.0; 3],
        }
    }

    /// Map `bounds` into a cube of edge `target_span` centred on the origin
    pub fn fit(bounds: &Aabb, target_span: f64) -> Self {
        let scale = target_span / bounds.diagonal().max(NORMALIZATION_EPSILON);
        let center = bounds.center();
        Self {
            scale,
            translate: [-center[0] * scale, -center[1] * scale, -center[2] * scale],
        }
    }

    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        [
            p[0] * self.scale + self.translate[0],
            p[1] * self.scale + self.translate[1],
            p[2] * self.scale + self.translate[2],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Mesh {
        Mesh {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 2.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            triangles: vec![[0, 1, 2]],
        }
    }

    #[test]
    fn test_obj_text() {
        let text = triangle().to_obj_string("isosurf_0");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "o isosurf_0");
        assert_eq!(lines[1], "v 0 0 0");
        assert_eq!(lines[4], "vn 0 0 1");
        assert_eq!(lines[7], "f 1//1 2//2 3//3");
        assert_eq!(lines.len(), 8);
    }

    #[test]
    fn test_save_obj() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.obj");
        triangle().save_obj(&path, "m").unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("o m\n"));
    }

    #[test]
    fn test_bounds() {
        assert!(Mesh::new().bounds().is_none());
        let bounds = triangle().bounds().unwrap();
        assert_eq!(bounds.min, [0.0, 0.0, 0.0]);
        assert_eq!(bounds.max, [1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_oriented_box() {
        let b = Aabb::new([0.0, 0.0, 0.0], [2.0, 4.0, 6.0]);
        let obb = b.to_oriented_box();
        assert_eq!(&obb[0..3], &[1.0, 2.0, 3.0]);
        assert_eq!(obb[3], 1.0);
        assert_eq!(obb[7], 2.0);
        assert_eq!(obb[11], 3.0);
    }

    #[test]
    fn test_fit_maps_into_target_span() {
        let b = Aabb::new([10.0, 10.0, 10.0], [13.0, 14.0, 10.0]);
        let n = Normalization::fit(&b, 1.0);
        assert!((n.scale - 0.2).abs() < 1e-12);
        let mapped = b.transformed(&n);
        assert!((mapped.diagonal() - 1.0).abs() < 1e-12);
        for c in mapped.center() {
            assert!(c.abs() < 1e-12);
        }
    }

    #[test]
    fn test_fit_degenerate_bounds() {
        let b = Aabb::from_point([1.0, 1.0, 1.0]);
        let n = Normalization::fit(&b, 1.0);
        assert!(n.scale.is_finite());
    }

    #[test]
    fn test_union() {
        let a = Aabb::new([0.0; 3], [1.0; 3]);
        let b = Aabb::new([-1.0, 0.5, 0.5], [0.5, 2.0, 0.5]);
        let u = a.union(&b);
        assert_eq!(u.min, [-1.0, 0.0, 0.0]);
        assert_eq!(u.max, [1.0, 2.0, 1.0]);
    }
}

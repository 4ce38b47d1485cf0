//! Volume snapshot representation
//!
//! A `VolumeSample` is one timestep of a structured, axis-aligned 3-D grid.
//! Samples are stored row-major with x varying fastest, and the components of
//! a vector sample are interleaved per grid point.

use serde::{Deserialize, Serialize};

use crate::codec::{IoError, IoResult};

/// On-disk numeric precision of a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Single,
    Double,
}

impl Precision {
    /// Size in bytes of one stored value
    pub fn byte_size(&self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }
}

/// One snapshot of a volumetric field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSample {
    /// Grid dimensions (nx, ny, nz)
    pub dims: [usize; 3],

    /// Position of the first grid point
    pub origin: [f64; 3],

    /// Per-axis sample spacing
    pub pitch: [f64; 3],

    /// Components per grid point; 0 is legacy scalar data
    pub veclen: usize,

    /// Precision the snapshot was stored with
    pub precision: Precision,

    /// Simulation step number
    pub step: i64,

    /// Simulation time
    pub time: f64,

    /// Flat sample buffer, `nx * ny * nz * datalen` values
    pub samples: Vec<f64>,

    /// Per-component minimum
    pub min: Vec<f64>,

    /// Per-component maximum
    pub max: Vec<f64>,
}

impl VolumeSample {
    /// Build a sample from a flat buffer, validating its length and computing
    /// the per-component value range.
    pub fn from_samples(
        dims: [usize; 3],
        origin: [f64; 3],
        pitch: [f64; 3],
        veclen: usize,
        samples: Vec<f64>,
    ) -> IoResult<Self> {
        if dims.iter().any(|&d| d == 0) {
            return Err(IoError::InvalidFormat(format!(
                "grid dimensions must be positive: {:?}",
                dims
            )));
        }
        if pitch.iter().any(|&p| p.is_nan() || p <= 0.0) {
            return Err(IoError::InvalidFormat(format!(
                "grid pitch must be positive: {:?}",
                pitch
            )));
        }

        let datalen = veclen.max(1);
        let expected = dims[0] * dims[1] * dims[2] * datalen;
        if samples.len() != expected {
            return Err(IoError::InvalidFormat(format!(
                "sample buffer holds {} values, grid {:?} x {} needs {}",
                samples.len(),
                dims,
                datalen,
                expected
            )));
        }

        let mut sample = Self {
            dims,
            origin,
            pitch,
            veclen,
            precision: Precision::Single,
            step: 0,
            time: 0.0,
            samples,
            min: Vec::new(),
            max: Vec::new(),
        };
        sample.recompute_min_max();
        Ok(sample)
    }

    /// Set the precision
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Set the step number and time
    pub fn with_step(mut self, step: i64, time: f64) -> Self {
        self.step = step;
        self.time = time;
        self
    }

    /// Number of values stored per grid point
    pub fn datalen(&self) -> usize {
        self.veclen.max(1)
    }

    /// Number of grid points
    pub fn point_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Flat index of the first component of grid point (i, j, k)
    #[inline]
    pub fn point_index(&self, i: usize, j: usize, k: usize) -> usize {
        ((k * self.dims[1] + j) * self.dims[0] + i) * self.datalen()
    }

    /// Component `c` of grid point (i, j, k)
    #[inline]
    pub fn value(&self, i: usize, j: usize, k: usize, c: usize) -> f64 {
        self.samples[self.point_index(i, j, k) + c]
    }

    /// Position of the last grid point
    pub fn far_corner(&self) -> [f64; 3] {
        let mut corner = self.origin;
        for a in 0..3 {
            corner[a] += self.pitch[a] * (self.dims[a].saturating_sub(1)) as f64;
        }
        corner
    }

    /// Axis-aligned extent of the grid as `[min_corner, max_corner]`
    pub fn bbox(&self) -> [[f64; 3]; 2] {
        [self.origin, self.far_corner()]
    }

    /// Recompute per-component min/max from the sample buffer
    pub fn recompute_min_max(&mut self) {
        let datalen = self.datalen();
        let mut min = vec![f64::INFINITY; datalen];
        let mut max = vec![f64::NEG_INFINITY; datalen];
        for point in self.samples.chunks_exact(datalen) {
            for (c, &v) in point.iter().enumerate() {
                if v < min[c] {
                    min[c] = v;
                }
                if v > max[c] {
                    max[c] = v;
                }
            }
        }
        self.min = min;
        self.max = max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(dims: [usize; 3], veclen: usize) -> VolumeSample {
        let n = dims[0] * dims[1] * dims[2] * veclen.max(1);
        let data = (0..n).map(|v| v as f64).collect();
        VolumeSample::from_samples(dims, [0.0; 3], [1.0; 3], veclen, data).unwrap()
    }

    #[test]
    fn test_from_samples_computes_range() {
        let s = ramp([2, 3, 4], 1);
        assert_eq!(s.min, vec![0.0]);
        assert_eq!(s.max, vec![23.0]);
        assert_eq!(s.point_count(), 24);
    }

    #[test]
    fn test_from_samples_rejects_bad_length() {
        let err = VolumeSample::from_samples([2, 2, 2], [0.0; 3], [1.0; 3], 3, vec![0.0; 8])
            .unwrap_err();
        assert!(err.to_string().contains("needs 24"));
    }

    #[test]
    fn test_from_samples_rejects_zero_pitch() {
        let result = VolumeSample::from_samples([1, 1, 1], [0.0; 3], [1.0, 0.0, 1.0], 1, vec![0.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_legacy_veclen_zero_is_scalar() {
        let s = ramp([2, 2, 2], 0);
        assert_eq!(s.datalen(), 1);
        assert_eq!(s.min.len(), 1);
    }

    #[test]
    fn test_vector_components_interleaved() {
        let s = ramp([2, 2, 1], 3);
        assert_eq!(s.value(1, 0, 0, 0), 3.0);
        assert_eq!(s.value(0, 1, 0, 2), 8.0);
        assert_eq!(s.min, vec![0.0, 1.0, 2.0]);
        assert_eq!(s.max, vec![9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_far_corner() {
        let s = VolumeSample::from_samples([3, 2, 5], [1.0, 2.0, 3.0], [0.5, 1.0, 2.0], 1, vec![0.0; 30])
            .unwrap();
        assert_eq!(s.far_corner(), [2.0, 3.0, 11.0]);
    }
}

//! Test fixtures: synthetic snapshots and series on disk

use std::path::{Path, PathBuf};

use isotile_core::isotile_io::{SphCodec, VolumeCodec, VolumeSample};
use isotile_core::AxisSplit;

/// Scalar snapshot whose value at (i, j, k) is `f(i, j, k)`
pub fn scalar_field<F: Fn(usize, usize, usize) -> f64>(dims: [usize; 3], f: F) -> VolumeSample {
    let mut data = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
    for k in 0..dims[2] {
        for j in 0..dims[1] {
            for i in 0..dims[0] {
                data.push(f(i, j, k));
            }
        }
    }
    VolumeSample::from_samples(dims, [0.0; 3], [1.0; 3], 1, data).unwrap()
}

/// Write one SPH file per `(step, time)` and return the file names
#[allow(dead_code)]
pub fn write_series(dir: &Path, dims: [usize; 3], stamps: &[(i64, f64)]) -> Vec<PathBuf> {
    stamps
        .iter()
        .enumerate()
        .map(|(n, &(step, time))| {
            let sample = scalar_field(dims, |i, j, k| (i + j + k + n) as f64).with_step(step, time);
            let name = PathBuf::from(format!("snap_{:03}.sph", n));
            SphCodec.save(&dir.join(&name), &sample).unwrap();
            name
        })
        .collect()
}

/// Reassemble decomposed pieces into a full grid
#[allow(dead_code)]
pub fn stitch(pieces: &[VolumeSample], layout: &[AxisSplit; 3], datalen: usize) -> Vec<f64> {
    let dims = [layout[0].len, layout[1].len, layout[2].len];
    let mut out = vec![f64::NAN; dims[0] * dims[1] * dims[2] * datalen];
    let mut n = 0;
    for kz in 0..layout[2].divisor {
        for jy in 0..layout[1].divisor {
            for ix in 0..layout[0].divisor {
                let piece = &pieces[n];
                let start = [layout[0].start(ix), layout[1].start(jy), layout[2].start(kz)];
                for k in 0..piece.dims[2] {
                    for j in 0..piece.dims[1] {
                        for i in 0..piece.dims[0] {
                            let (gi, gj, gk) = (start[0] + i, start[1] + j, start[2] + k);
                            let dst = ((gk * dims[1] + gj) * dims[0] + gi) * datalen;
                            for c in 0..datalen {
                                out[dst + c] = piece.value(i, j, k, c);
                            }
                        }
                    }
                }
                n += 1;
            }
        }
    }
    out
}

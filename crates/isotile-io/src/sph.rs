//! SPH volumetric file codec
//!
//! SPH files are Fortran unformatted sequential files: every record is
//! framed by a 4-byte length marker before and after its payload. A file holds
//! six records:
//!
//! 1. `svType` (1 = scalar, 2 = 3-vector) and `dType` (1 = single, 2 = double)
//! 2. grid dimensions (`i32` for single files, `i64` for double files)
//! 3. origin
//! 4. pitch
//! 5. step number and time
//! 6. samples, components interleaved per grid point
//!
//! Both byte orders are accepted when reading; the order is detected from the
//! first marker, which must be 8. Files are always written little endian.

use std::io::Cursor;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::{IoError, IoResult, VolumeCodec};
use crate::sample::{Precision, VolumeSample};

const SV_SCALAR: i32 = 1;
const SV_VECTOR: i32 = 2;
const DT_SINGLE: i32 = 1;
const DT_DOUBLE: i32 = 2;
const HEADER_LEN: i32 = 8;

/// Codec for the SPH format
#[derive(Debug, Clone, Copy, Default)]
pub struct SphCodec;

impl SphCodec {
    /// Decode an SPH image held in memory
    pub fn decode_bytes(bytes: &[u8]) -> IoResult<VolumeSample> {
        if bytes.len() < 4 {
            return Err(truncated());
        }
        if LittleEndian::read_i32(&bytes[..4]) == HEADER_LEN {
            decode::<LittleEndian>(bytes)
        } else if BigEndian::read_i32(&bytes[..4]) == HEADER_LEN {
            decode::<BigEndian>(bytes)
        } else {
            Err(IoError::InvalidFormat(
                "not an SPH file: bad leading record marker".to_string(),
            ))
        }
    }

    /// Encode a snapshot as a little-endian SPH image
    pub fn encode_bytes(sample: &VolumeSample) -> IoResult<Vec<u8>> {
        let sv_type = match sample.veclen {
            0 | 1 => SV_SCALAR,
            3 => SV_VECTOR,
            n => {
                return Err(IoError::Unsupported(format!(
                    "SPH stores scalar or 3-vector data, got veclen {}",
                    n
                )))
            }
        };
        let expected = sample.point_count() * sample.datalen();
        if sample.samples.len() != expected {
            return Err(IoError::InvalidFormat(format!(
                "sample buffer holds {} values, expected {}",
                sample.samples.len(),
                expected
            )));
        }

        let width = sample.precision.byte_size();
        let data_len = i32::try_from(expected * width).map_err(|_| {
            IoError::Unsupported("sample record exceeds the 2 GiB SPH record limit".to_string())
        })?;

        let mut out = Vec::with_capacity(expected * width + 128);
        let d_type = match sample.precision {
            Precision::Single => DT_SINGLE,
            Precision::Double => DT_DOUBLE,
        };

        write_record(&mut out, HEADER_LEN, |w| {
            w.write_i32::<LittleEndian>(sv_type)?;
            w.write_i32::<LittleEndian>(d_type)
        })?;

        match sample.precision {
            Precision::Single => {
                let mut dims = [0i32; 3];
                for (d, &n) in dims.iter_mut().zip(&sample.dims) {
                    *d = i32::try_from(n).map_err(|_| {
                        IoError::InvalidFormat(format!(
                            "grid dimension {} does not fit a single-precision header",
                            n
                        ))
                    })?;
                }
                let step = i32::try_from(sample.step).map_err(|_| {
                    IoError::InvalidFormat(format!(
                        "step {} does not fit a single-precision header",
                        sample.step
                    ))
                })?;

                write_record(&mut out, 12, |w| {
                    for d in dims {
                        w.write_i32::<LittleEndian>(d)?;
                    }
                    Ok(())
                })?;
                write_record(&mut out, 12, |w| write_f32s(w, &sample.origin))?;
                write_record(&mut out, 12, |w| write_f32s(w, &sample.pitch))?;
                write_record(&mut out, 8, |w| {
                    w.write_i32::<LittleEndian>(step)?;
                    w.write_f32::<LittleEndian>(sample.time as f32)
                })?;
                write_record(&mut out, data_len, |w| write_f32s(w, &sample.samples))?;
            }
            Precision::Double => {
                let mut dims = [0i64; 3];
                for (d, &n) in dims.iter_mut().zip(&sample.dims) {
                    *d = i64::try_from(n).map_err(|_| {
                        IoError::InvalidFormat(format!("grid dimension {} does not fit i64", n))
                    })?;
                }
                write_record(&mut out, 24, |w| {
                    for d in dims {
                        w.write_i64::<LittleEndian>(d)?;
                    }
                    Ok(())
                })?;
                write_record(&mut out, 24, |w| write_f64s(w, &sample.origin))?;
                write_record(&mut out, 24, |w| write_f64s(w, &sample.pitch))?;
                write_record(&mut out, 16, |w| {
                    w.write_i64::<LittleEndian>(sample.step)?;
                    w.write_f64::<LittleEndian>(sample.time)
                })?;
                write_record(&mut out, data_len, |w| write_f64s(w, &sample.samples))?;
            }
        }

        Ok(out)
    }
}

impl VolumeCodec for SphCodec {
    fn load(&self, path: &Path) -> IoResult<VolumeSample> {
        if !path.exists() {
            return Err(IoError::FileNotFound(path.display().to_string()));
        }
        let bytes = std::fs::read(path)?;
        Self::decode_bytes(&bytes)
    }

    fn save(&self, path: &Path, sample: &VolumeSample) -> IoResult<()> {
        let bytes = Self::encode_bytes(sample)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn format_name(&self) -> &'static str {
        "SPH"
    }
}

fn truncated() -> IoError {
    IoError::InvalidFormat("truncated SPH record".to_string())
}

fn eof_as_truncated(e: std::io::Error) -> IoError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        truncated()
    } else {
        IoError::Io(e)
    }
}

/// Read one framed record and return its payload
fn read_record<'a, B: ByteOrder>(cursor: &mut Cursor<&'a [u8]>) -> IoResult<&'a [u8]> {
    let len = cursor.read_i32::<B>().map_err(eof_as_truncated)?;
    if len < 0 {
        return Err(IoError::InvalidFormat(format!("negative record length {}", len)));
    }
    let start = cursor.position() as usize;
    let end = start + len as usize;
    let buf: &'a [u8] = *cursor.get_ref();
    if end > buf.len() {
        return Err(truncated());
    }
    cursor.set_position(end as u64);
    let trailer = cursor.read_i32::<B>().map_err(eof_as_truncated)?;
    if trailer != len {
        return Err(IoError::InvalidFormat(format!(
            "record marker mismatch: {} != {}",
            len, trailer
        )));
    }
    Ok(&buf[start..end])
}

fn expect_len(payload: &[u8], expected: usize, what: &str) -> IoResult<()> {
    if payload.len() != expected {
        return Err(IoError::InvalidFormat(format!(
            "{} record is {} bytes, expected {}",
            what,
            payload.len(),
            expected
        )));
    }
    Ok(())
}

fn read_triple<B: ByteOrder>(payload: &[u8], precision: Precision) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (a, v) in out.iter_mut().enumerate() {
        *v = match precision {
            Precision::Single => B::read_f32(&payload[a * 4..]) as f64,
            Precision::Double => B::read_f64(&payload[a * 8..]),
        };
    }
    out
}

/// Value count and byte length of the data record; the header is untrusted
fn data_size(dims: [usize; 3], veclen: usize, width: usize) -> IoResult<(usize, usize)> {
    let count = dims
        .iter()
        .try_fold(veclen, |acc, &d| acc.checked_mul(d));
    let bytes = count.and_then(|c| c.checked_mul(width));
    match (count, bytes) {
        (Some(count), Some(bytes)) => Ok((count, bytes)),
        _ => Err(IoError::InvalidFormat(format!(
            "grid {:?} x {} is too large",
            dims, veclen
        ))),
    }
}

fn decode<B: ByteOrder>(bytes: &[u8]) -> IoResult<VolumeSample> {
    let mut cursor = Cursor::new(bytes);

    let header = read_record::<B>(&mut cursor)?;
    expect_len(header, HEADER_LEN as usize, "header")?;
    let sv_type = B::read_i32(&header[0..4]);
    let d_type = B::read_i32(&header[4..8]);
    let veclen = match sv_type {
        SV_SCALAR => 1,
        SV_VECTOR => 3,
        other => {
            return Err(IoError::InvalidFormat(format!("unknown svType {}", other)));
        }
    };
    let precision = match d_type {
        DT_SINGLE => Precision::Single,
        DT_DOUBLE => Precision::Double,
        other => {
            return Err(IoError::InvalidFormat(format!("unknown dType {}", other)));
        }
    };
    let width = precision.byte_size();

    let dims_rec = read_record::<B>(&mut cursor)?;
    expect_len(dims_rec, 3 * width, "dims")?;
    let mut dims = [0usize; 3];
    for (a, d) in dims.iter_mut().enumerate() {
        let raw = match precision {
            Precision::Single => B::read_i32(&dims_rec[a * 4..]) as i64,
            Precision::Double => B::read_i64(&dims_rec[a * 8..]),
        };
        if raw < 1 {
            return Err(IoError::InvalidFormat(format!("non-positive grid dimension {}", raw)));
        }
        *d = usize::try_from(raw)
            .map_err(|_| IoError::InvalidFormat(format!("grid dimension {} too large", raw)))?;
    }

    let org_rec = read_record::<B>(&mut cursor)?;
    expect_len(org_rec, 3 * width, "origin")?;
    let origin = read_triple::<B>(org_rec, precision);

    let pitch_rec = read_record::<B>(&mut cursor)?;
    expect_len(pitch_rec, 3 * width, "pitch")?;
    let pitch = read_triple::<B>(pitch_rec, precision);

    let time_rec = read_record::<B>(&mut cursor)?;
    expect_len(time_rec, 2 * width, "step/time")?;
    let (step, time) = match precision {
        Precision::Single => (
            B::read_i32(&time_rec[0..4]) as i64,
            B::read_f32(&time_rec[4..8]) as f64,
        ),
        Precision::Double => (B::read_i64(&time_rec[0..8]), B::read_f64(&time_rec[8..16])),
    };

    let (count, data_bytes) = data_size(dims, veclen, width)?;
    let data_rec = read_record::<B>(&mut cursor)?;
    expect_len(data_rec, data_bytes, "data")?;
    let samples: Vec<f64> = match precision {
        Precision::Single => {
            let mut values = vec![0f32; count];
            B::read_f32_into(data_rec, &mut values);
            values.into_iter().map(f64::from).collect()
        }
        Precision::Double => {
            let mut values = vec![0f64; count];
            B::read_f64_into(data_rec, &mut values);
            values
        }
    };

    Ok(VolumeSample::from_samples(dims, origin, pitch, veclen, samples)?
        .with_precision(precision)
        .with_step(step, time))
}

fn write_record<F>(out: &mut Vec<u8>, len: i32, body: F) -> IoResult<()>
where
    F: FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
{
    out.write_i32::<LittleEndian>(len)?;
    body(out)?;
    out.write_i32::<LittleEndian>(len)?;
    Ok(())
}

fn write_f32s(w: &mut Vec<u8>, values: &[f64]) -> std::io::Result<()> {
    for &v in values {
        w.write_f32::<LittleEndian>(v as f32)?;
    }
    Ok(())
}

fn write_f64s(w: &mut Vec<u8>, values: &[f64]) -> std::io::Result<()> {
    for &v in values {
        w.write_f64::<LittleEndian>(v)?;
    }
    Ok(())
}

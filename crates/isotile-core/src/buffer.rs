//! Temporal snapshot buffer
//!
//! A `TemporalBuffer` holds one time series of volumetric snapshots that all
//! share a grid and vector length. It keeps:
//! - The per-snapshot step numbers and times, strictly increasing
//! - Aggregate bounding box and per-component value range
//! - Either every snapshot (eager) or only the last one used (lazy)
//!
//! Ingestion is all-or-nothing: any failure leaves the buffer empty.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use isotile_io::{SeriesEntry, SphCodec, VolumeCodec, VolumeSample};
use serde::{Deserialize, Serialize};

use crate::error::{IsotileError, IsotileResult, LoadError, LoadResult, RangeError};

/// How many snapshots stay in memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidencyMode {
    /// Every snapshot is kept after ingest
    #[default]
    Eager,
    /// Only the most recently used snapshot is kept; others are reloaded
    Lazy,
}

/// Ingest progress, shared with pollers outside the buffer lock
#[derive(Debug, Default)]
pub struct IngestProgress {
    busy: AtomicBool,
    loaded: AtomicUsize,
    total: AtomicUsize,
}

impl IngestProgress {
    /// Whether an ingest is running
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Snapshots loaded so far in the current ingest
    pub fn loaded(&self) -> usize {
        self.loaded.load(Ordering::Acquire)
    }

    /// Snapshots the current ingest will load
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    fn begin(&self, total: usize) {
        self.loaded.store(0, Ordering::Release);
        self.total.store(total, Ordering::Release);
        self.busy.store(true, Ordering::Release);
    }

    fn advance(&self) {
        self.loaded.fetch_add(1, Ordering::AcqRel);
    }

    fn finish(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Where one snapshot came from and its repaired step/time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Source file; `None` for snapshots handed over in memory
    pub path: Option<PathBuf>,
    pub step: i64,
    pub time: f64,
}

impl SampleRecord {
    /// Printable origin for log and error messages
    pub fn origin(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => format!("in-memory snapshot at step {}", self.step),
        }
    }
}

/// Dataset description served at the root of the HTTP surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferMetadata {
    pub id: String,
    pub uri: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub dims: [usize; 3],
    pub datalen: usize,
    pub bbox: [[f64; 3]; 2],
    /// Number of snapshots
    pub steps: usize,
    /// Step number of every snapshot, in buffer order
    pub step_numbers: Vec<i64>,
    pub timerange: [f64; 2],
    /// Range of the isosurface input over the whole series
    pub vrange: [f64; 2],
}

/// Snapshots kept once an ingest has gone through every entry
enum Retained {
    All(Vec<VolumeSample>),
    Last(VolumeSample),
}

/// Ordered buffer of volumetric snapshots
pub struct TemporalBuffer {
    residency: ResidencyMode,
    codec: Arc<dyn VolumeCodec>,
    records: Vec<SampleRecord>,
    resident: Vec<Arc<VolumeSample>>,
    lazy_slot: Mutex<Option<(usize, Arc<VolumeSample>)>>,
    dims: [usize; 3],
    datalen: usize,
    bbox: [[f64; 3]; 2],
    min: Vec<f64>,
    max: Vec<f64>,
    vrange: [f64; 2],
    id: Option<String>,
    progress: Arc<IngestProgress>,
}

impl std::fmt::Debug for TemporalBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalBuffer")
            .field("residency", &self.residency)
            .field("format", &self.codec.format_name())
            .field("len", &self.records.len())
            .field("dims", &self.dims)
            .field("datalen", &self.datalen)
            .field("id", &self.id)
            .finish()
    }
}

impl TemporalBuffer {
    /// Empty buffer reading SPH files
    pub fn new(residency: ResidencyMode) -> Self {
        Self::with_codec(residency, Arc::new(SphCodec))
    }

    /// Empty buffer reading files through `codec`
    pub fn with_codec(residency: ResidencyMode, codec: Arc<dyn VolumeCodec>) -> Self {
        Self {
            residency,
            codec,
            records: Vec::new(),
            resident: Vec::new(),
            lazy_slot: Mutex::new(None),
            dims: [0; 3],
            datalen: 0,
            bbox: [[0.0; 3]; 2],
            min: Vec::new(),
            max: Vec::new(),
            vrange: [0.0; 2],
            id: None,
            progress: Arc::new(IngestProgress::default()),
        }
    }

    /// Drop every snapshot and statistic
    pub fn reset(&mut self) {
        self.records.clear();
        self.resident.clear();
        *self.lazy_slot.get_mut().unwrap_or_else(|e| e.into_inner()) = None;
        self.dims = [0; 3];
        self.datalen = 0;
        self.bbox = [[0.0; 3]; 2];
        self.min.clear();
        self.max.clear();
        self.vrange = [0.0; 2];
        self.id = None;
    }

    /// Ingest plain files with no step/time overrides
    pub fn ingest_files<P: AsRef<Path>>(&mut self, files: &[P], base_dir: &Path) -> LoadResult<()> {
        let entries: Vec<SeriesEntry> = files
            .iter()
            .map(|f| SeriesEntry::new(f.as_ref()))
            .collect();
        self.ingest(&entries, base_dir)
    }

    /// Replace the buffer contents with a series of files
    ///
    /// Entry overrides are applied before step/time are forced to be strictly
    /// increasing. In lazy mode each file is folded into the aggregates and
    /// dropped, so at most two snapshots are in memory at any time. On
    /// failure the buffer is left empty.
    pub fn ingest(&mut self, entries: &[SeriesEntry], base_dir: &Path) -> LoadResult<()> {
        let codec = Arc::clone(&self.codec);
        let residency = self.residency;
        self.run_ingest(entries.len(), |buffer| {
            let mut kept = Vec::new();
            let mut last = None;
            for entry in entries {
                let path = entry.resolve(base_dir);
                let sample = codec.load(&path).map_err(|e| LoadError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                buffer.absorb(&sample, Some(path), entry.step, entry.time)?;
                match residency {
                    ResidencyMode::Eager => kept.push(sample),
                    ResidencyMode::Lazy => last = Some(sample),
                }
            }
            Ok(match last {
                Some(sample) => Retained::Last(sample),
                None => Retained::All(kept),
            })
        })
    }

    /// Replace the buffer contents with snapshots already in memory
    ///
    /// There is no file to reload them from, so they stay resident whatever
    /// the residency mode.
    pub fn ingest_samples(&mut self, samples: Vec<VolumeSample>) -> LoadResult<()> {
        self.run_ingest(samples.len(), |buffer| {
            for sample in &samples {
                buffer.absorb(sample, None, None, None)?;
            }
            Ok(Retained::All(samples))
        })
    }

    fn run_ingest<F>(&mut self, total: usize, load: F) -> LoadResult<()>
    where
        F: FnOnce(&mut Self) -> LoadResult<Retained>,
    {
        self.reset();
        self.progress.begin(total);
        let result = if total == 0 {
            Err(LoadError::Empty)
        } else {
            load(self).map(|retained| self.finish_series(retained))
        };
        if let Err(e) = &result {
            tracing::warn!("Ingest failed, buffer reset: {}", e);
            self.reset();
        }
        self.progress.finish();
        result
    }

    /// Check one snapshot against the series and fold it into the aggregates
    fn absorb(
        &mut self,
        sample: &VolumeSample,
        path: Option<PathBuf>,
        step: Option<i64>,
        time: Option<f64>,
    ) -> LoadResult<()> {
        let record = SampleRecord {
            path,
            step: step.unwrap_or(sample.step),
            time: time.unwrap_or(sample.time),
        };
        let [lo, hi] = value_range(sample);

        if self.records.is_empty() {
            self.dims = sample.dims;
            self.datalen = sample.datalen();
            self.bbox = sample.bbox();
            self.min = sample.min.clone();
            self.max = sample.max.clone();
            self.vrange = [lo, hi];
        } else {
            self.check_shape(&record.origin(), sample)?;
            let far = sample.far_corner();
            for a in 0..3 {
                self.bbox[0][a] = self.bbox[0][a].min(sample.origin[a]);
                self.bbox[1][a] = self.bbox[1][a].max(far[a]);
            }
            for c in 0..self.datalen {
                self.min[c] = self.min[c].min(sample.min[c]);
                self.max[c] = self.max[c].max(sample.max[c]);
            }
            self.vrange = [self.vrange[0].min(lo), self.vrange[1].max(hi)];
        }

        self.records.push(record);
        self.progress.advance();
        Ok(())
    }

    /// Repair the step/time sequence and install the retained snapshots
    fn finish_series(&mut self, retained: Retained) {
        let repaired = repair_monotonic(&mut self.records);
        if repaired > 0 {
            tracing::warn!("Repaired {} non-increasing step/time values", repaired);
        }

        match retained {
            Retained::All(samples) => {
                self.resident = samples
                    .into_iter()
                    .zip(&self.records)
                    .map(|(s, r)| Arc::new(s.with_step(r.step, r.time)))
                    .collect();
            }
            Retained::Last(sample) => {
                let last = self.records.len() - 1;
                let record = &self.records[last];
                let sample = Arc::new(sample.with_step(record.step, record.time));
                *self.lazy_slot.get_mut().unwrap_or_else(|e| e.into_inner()) = Some((last, sample));
            }
        }

        self.id = Some(uuid::Uuid::new_v4().to_string());
        tracing::info!(
            "Ingested {} snapshots of {:?} x {} ({})",
            self.records.len(),
            self.dims,
            self.datalen,
            self.codec.format_name()
        );
    }

    fn check_shape(&self, origin: &str, sample: &VolumeSample) -> LoadResult<()> {
        if sample.dims != self.dims {
            return Err(LoadError::DimsMismatch {
                origin: origin.to_string(),
                expected: self.dims,
                actual: sample.dims,
            });
        }
        if sample.datalen() != self.datalen {
            return Err(LoadError::DatalenMismatch {
                origin: origin.to_string(),
                expected: self.datalen,
                actual: sample.datalen(),
            });
        }
        Ok(())
    }

    /// Index of the latest snapshot whose step does not exceed `step`
    ///
    /// `None` if the buffer is empty or `step` precedes the first snapshot.
    pub fn step_to_index(&self, step: i64) -> Option<usize> {
        if !self.is_ready() {
            return None;
        }
        self.records
            .partition_point(|r| r.step <= step)
            .checked_sub(1)
    }

    /// Snapshot at `index`, reloading it in lazy mode
    pub fn sample_at(&self, index: usize) -> IsotileResult<Arc<VolumeSample>> {
        if !self.is_ready() {
            return Err(IsotileError::no_data("no series has been ingested"));
        }
        let record = self.records.get(index).ok_or(RangeError::IndexOutOfRange {
            index,
            len: self.records.len(),
        })?;

        if let Some(sample) = self.resident.get(index) {
            return Ok(Arc::clone(sample));
        }

        let mut slot = self.lazy_slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((resident, sample)) = slot.as_ref() {
            if *resident == index {
                return Ok(Arc::clone(sample));
            }
        }

        let path = record.path.as_ref().ok_or_else(|| {
            IsotileError::no_data(format!("snapshot {} is neither resident nor on disk", index))
        })?;
        tracing::debug!("Reloading snapshot {} from {}", index, path.display());
        let sample = self.codec.load(path).map_err(|e| LoadError::Io {
            path: path.clone(),
            source: e,
        })?;
        self.check_shape(&record.origin(), &sample)?;
        let sample = Arc::new(sample.with_step(record.step, record.time));
        *slot = Some((index, Arc::clone(&sample)));
        Ok(sample)
    }

    /// Number of snapshots held in memory right now
    pub fn resident_count(&self) -> usize {
        let slot = self.lazy_slot.lock().unwrap_or_else(|e| e.into_inner());
        self.resident.len() + usize::from(slot.is_some())
    }

    /// Description of the ingested series
    pub fn metadata(&self, uri: &str) -> IsotileResult<BufferMetadata> {
        let id = self
            .id
            .clone()
            .ok_or_else(|| IsotileError::no_data("no series has been ingested"))?;
        let first = self.records.first().map(|r| r.time).unwrap_or(0.0);
        let last = self.records.last().map(|r| r.time).unwrap_or(first);
        Ok(BufferMetadata {
            id,
            uri: uri.to_string(),
            kind: self.codec.format_name().to_string(),
            dims: self.dims,
            datalen: self.datalen,
            bbox: self.bbox,
            steps: self.records.len(),
            step_numbers: self.steps(),
            timerange: [first, last],
            vrange: self.vrange,
        })
    }

    /// Whether a series has been ingested successfully
    pub fn is_ready(&self) -> bool {
        self.id.is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn residency(&self) -> ResidencyMode {
        self.residency
    }

    /// Data type tag of the snapshots
    pub fn dtype(&self) -> &'static str {
        self.codec.format_name()
    }

    /// Dataset id issued by the last successful ingest
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn datalen(&self) -> usize {
        self.datalen
    }

    /// Union of all snapshot extents as `[min_corner, max_corner]`
    pub fn bbox(&self) -> [[f64; 3]; 2] {
        self.bbox
    }

    /// Per-component `(min, max)` over the whole series
    pub fn min_max(&self) -> Vec<(f64, f64)> {
        self.min
            .iter()
            .copied()
            .zip(self.max.iter().copied())
            .collect()
    }

    /// Range of the values isosurfaces are drawn on: the scalar itself, or
    /// the vector magnitude
    pub fn vrange(&self) -> [f64; 2] {
        self.vrange
    }

    pub fn steps(&self) -> Vec<i64> {
        self.records.iter().map(|r| r.step).collect()
    }

    pub fn times(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.time).collect()
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    /// Progress handle that stays valid across ingests
    pub fn progress(&self) -> Arc<IngestProgress> {
        Arc::clone(&self.progress)
    }
}

/// Bump every step/time that does not exceed its predecessor to
/// predecessor + 1; returns how many values were changed
pub fn repair_monotonic(records: &mut [SampleRecord]) -> usize {
    let mut repaired = 0;
    for i in 1..records.len() {
        let (prev_step, prev_time) = (records[i - 1].step, records[i - 1].time);
        let record = &mut records[i];
        if record.step <= prev_step {
            tracing::warn!(
                "Step {} of {} does not follow {}, using {}",
                record.step,
                record.origin(),
                prev_step,
                prev_step + 1
            );
            record.step = prev_step + 1;
            repaired += 1;
        }
        if record.time <= prev_time {
            tracing::warn!(
                "Time {} of {} does not follow {}, using {}",
                record.time,
                record.origin(),
                prev_time,
                prev_time + 1.0
            );
            record.time = prev_time + 1.0;
            repaired += 1;
        }
    }
    repaired
}

/// Range of the isosurface input of one snapshot
fn value_range(sample: &VolumeSample) -> [f64; 2] {
    if sample.datalen() == 1 {
        return [sample.min[0], sample.max[0]];
    }
    sample
        .samples
        .chunks_exact(sample.datalen())
        .map(|v| v.iter().map(|c| c * c).sum::<f64>().sqrt())
        .fold([f64::INFINITY, f64::NEG_INFINITY], |[lo, hi], m| {
            [lo.min(m), hi.max(m)]
        })
}

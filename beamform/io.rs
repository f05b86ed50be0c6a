// ========================================================================================
//
//                     Dataset manifests and raw buffer I/O
//
// ========================================================================================
//
// A dataset on disk is a small TOML manifest plus one raw little-endian binary file per
// array. The manifest carries the dimensions and scalars; the binary files are
// memory-mapped and decoded into owned arrays so the reconstruction can borrow them.

use crate::types::{BeamformError, COMPLEX_STRIDE, DelayAndSumInputs, DelayAndSumOutput, ScanlinePairs};
use log::info;
use memmap2::Mmap;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The file name `Dataset::save` gives the manifest.
pub const MANIFEST_FILE_NAME: &str = "dataset.toml";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize manifest: {0}")]
    ManifestSerialize(#[from] toml::ser::Error),
    #[error("{path} holds {bytes} bytes, which is not a whole number of {width}-byte values")]
    RaggedBuffer { path: PathBuf, bytes: u64, width: usize },
    #[error("{path} holds {found} values, expected {expected}")]
    LengthMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("manifest {path} declares dimensions {dims:?} that are too large to address")]
    DimensionOverflow { path: PathBuf, dims: Vec<usize> },
    #[error("buffer does not fit the declared dimensions: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("{path} already exists and will not be overwritten")]
    OutputExists { path: PathBuf },
    #[error(transparent)]
    Beamform(#[from] BeamformError),
}

/// The number of values in an array of shape `dims`, or `None` if it cannot be
/// allocated.
fn element_count(dims: &[usize]) -> Option<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .filter(|&n| n <= isize::MAX as usize)
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> DatasetError + '_ {
    move |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ========================================================================================
//                                     Manifest
// ========================================================================================

/// Paths of the raw buffers, relative to the manifest's directory unless absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetFiles {
    pub scanlines: PathBuf,
    pub tx: PathBuf,
    pub rx: PathBuf,
    pub lookup_times_tx: PathBuf,
    pub lookup_times_rx: PathBuf,
    pub amplitudes_tx: PathBuf,
    pub amplitudes_rx: PathBuf,
}

impl Default for DatasetFiles {
    fn default() -> Self {
        Self {
            scanlines: "scanlines.f32".into(),
            tx: "tx.u32".into(),
            rx: "rx.u32".into(),
            lookup_times_tx: "lookup_times_tx.f32".into(),
            lookup_times_rx: "lookup_times_rx.f32".into(),
            amplitudes_tx: "amplitudes_tx.f32".into(),
            amplitudes_rx: "amplitudes_rx.f32".into(),
        }
    }
}

/// The TOML description of a dataset. `numscanlines` is implied by the length of `tx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub numpoints: usize,
    pub numelements: usize,
    pub numsamples: usize,
    pub invdt: f32,
    pub t0: f32,
    #[serde(default)]
    pub fillvalue: f32,
    #[serde(default)]
    pub files: DatasetFiles,
}

impl DatasetManifest {
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let text = fs::read_to_string(path).map_err(io_error(path))?;
        toml::from_str(&text).map_err(|source| DatasetError::ManifestParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ========================================================================================
//                                   Raw buffers
// ========================================================================================

/// A fixed-width little-endian value stored in a raw buffer file.
trait RawValue: Sized {
    const WIDTH: usize;
    fn from_le(bytes: &[u8]) -> Self;
    fn write_le(&self, out: &mut Vec<u8>);
}

impl RawValue for f32 {
    const WIDTH: usize = 4;
    #[inline]
    fn from_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
    #[inline]
    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl RawValue for u32 {
    const WIDTH: usize = 4;
    #[inline]
    fn from_le(bytes: &[u8]) -> Self {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
    #[inline]
    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// Memory-maps `path` and decodes it as a sequence of `T`.
fn read_raw<T: RawValue>(path: &Path) -> Result<Vec<T>, DatasetError> {
    let file = File::open(path).map_err(io_error(path))?;
    let bytes = file.metadata().map_err(io_error(path))?.len();
    if bytes % T::WIDTH as u64 != 0 {
        return Err(DatasetError::RaggedBuffer {
            path: path.to_path_buf(),
            bytes,
            width: T::WIDTH,
        });
    }
    if bytes == 0 {
        return Ok(Vec::new());
    }

    // SAFETY: the file is opened read-only and only read for the lifetime of the map.
    // Concurrent truncation by another process is outside this program's control.
    let mmap = unsafe { Mmap::map(&file) }.map_err(io_error(path))?;
    Ok(mmap.chunks_exact(T::WIDTH).map(T::from_le).collect())
}

fn read_raw_exact<T: RawValue>(path: &Path, expected: usize) -> Result<Vec<T>, DatasetError> {
    let values = read_raw::<T>(path)?;
    if values.len() != expected {
        return Err(DatasetError::LengthMismatch {
            path: path.to_path_buf(),
            expected,
            found: values.len(),
        });
    }
    Ok(values)
}

fn write_raw<'v, T: RawValue + 'v>(
    path: &Path,
    values: impl ExactSizeIterator<Item = &'v T>,
) -> Result<(), DatasetError> {
    let mut bytes = Vec::with_capacity(values.len() * T::WIDTH);
    for value in values {
        value.write_le(&mut bytes);
    }
    fs::write(path, bytes).map_err(io_error(path))
}

// ========================================================================================
//                                     Dataset
// ========================================================================================

/// An owned, validated set of reconstruction inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub scanlines: Array3<f32>,
    pub pairs: ScanlinePairs,
    pub lookup_times_tx: Array2<f32>,
    pub lookup_times_rx: Array2<f32>,
    pub amplitudes_tx: Array2<f32>,
    pub amplitudes_rx: Array2<f32>,
    pub invdt: f32,
    pub t0: f32,
    pub fillvalue: f32,
}

impl Dataset {
    /// Loads the dataset described by the manifest at `manifest_path`.
    pub fn load(manifest_path: &Path) -> Result<Self, DatasetError> {
        let manifest = DatasetManifest::load(manifest_path)?;
        let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        let resolve = |p: &Path| -> PathBuf {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        let files = &manifest.files;
        let checked_len = |dims: &[usize]| {
            element_count(dims).ok_or_else(|| DatasetError::DimensionOverflow {
                path: manifest_path.to_path_buf(),
                dims: dims.to_vec(),
            })
        };
        let table_len = checked_len(&[manifest.numpoints, manifest.numelements])?;
        // The result buffer is allocated later; make sure it is addressable.
        checked_len(&[manifest.numpoints, COMPLEX_STRIDE])?;

        let tx = read_raw::<u32>(&resolve(files.tx.as_path()))?;
        let rx = read_raw_exact::<u32>(&resolve(files.rx.as_path()), tx.len())?;
        let num_scanlines = tx.len();
        let pairs = ScanlinePairs::new(tx, rx, manifest.numelements)?;

        let scanlines_len = checked_len(&[num_scanlines, manifest.numsamples, COMPLEX_STRIDE])?;
        let scanlines = read_raw_exact::<f32>(&resolve(files.scanlines.as_path()), scanlines_len)?;
        let table = |path: &Path| -> Result<Array2<f32>, DatasetError> {
            let values = read_raw_exact::<f32>(&resolve(path), table_len)?;
            Ok(Array2::from_shape_vec(
                (manifest.numpoints, manifest.numelements),
                values,
            )?)
        };

        let dataset = Self {
            scanlines: Array3::from_shape_vec(
                (num_scanlines, manifest.numsamples, COMPLEX_STRIDE),
                scanlines,
            )?,
            pairs,
            lookup_times_tx: table(files.lookup_times_tx.as_path())?,
            lookup_times_rx: table(files.lookup_times_rx.as_path())?,
            amplitudes_tx: table(files.amplitudes_tx.as_path())?,
            amplitudes_rx: table(files.amplitudes_rx.as_path())?,
            invdt: manifest.invdt,
            t0: manifest.t0,
            fillvalue: manifest.fillvalue,
        };
        // Reject degenerate scalars here rather than at reconstruction time.
        dataset.inputs()?;

        info!(
            "Loaded dataset {}: {} points, {} elements, {} scanlines x {} samples",
            manifest_path.display(),
            manifest.numpoints,
            manifest.numelements,
            num_scanlines,
            manifest.numsamples
        );
        Ok(dataset)
    }

    /// Writes the dataset as raw buffers plus `dataset.toml` into `dir`, returning the
    /// manifest path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, DatasetError> {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
        let files = DatasetFiles::default();
        let (numpoints, numelements) = self.lookup_times_tx.dim();

        write_raw(&dir.join(&files.scanlines), self.scanlines.iter())?;
        write_raw(&dir.join(&files.tx), self.pairs.tx().iter())?;
        write_raw(&dir.join(&files.rx), self.pairs.rx().iter())?;
        write_raw(&dir.join(&files.lookup_times_tx), self.lookup_times_tx.iter())?;
        write_raw(&dir.join(&files.lookup_times_rx), self.lookup_times_rx.iter())?;
        write_raw(&dir.join(&files.amplitudes_tx), self.amplitudes_tx.iter())?;
        write_raw(&dir.join(&files.amplitudes_rx), self.amplitudes_rx.iter())?;

        let manifest = DatasetManifest {
            numpoints,
            numelements,
            numsamples: self.scanlines.dim().1,
            invdt: self.invdt,
            t0: self.t0,
            fillvalue: self.fillvalue,
            files,
        };
        let manifest_path = dir.join(MANIFEST_FILE_NAME);
        let text = toml::to_string_pretty(&manifest)?;
        fs::write(&manifest_path, text).map_err(io_error(&manifest_path))?;
        Ok(manifest_path)
    }

    /// Borrows the dataset as validated reconstruction inputs.
    pub fn inputs(&self) -> Result<DelayAndSumInputs<'_>, BeamformError> {
        DelayAndSumInputs::from_views(
            self.scanlines.view(),
            &self.pairs,
            self.lookup_times_tx.view(),
            self.lookup_times_rx.view(),
            self.amplitudes_tx.view(),
            self.amplitudes_rx.view(),
            self.invdt,
            self.t0,
            self.fillvalue,
        )
    }
}

// ========================================================================================
//                                  Result output
// ========================================================================================

/// Writes one line per point: `point<TAB>real<TAB>imag<TAB>mask`, after a `#`-prefixed header.
///
/// The table is written to a hidden sibling file first and only linked into place once
/// it is complete. An existing file at `path` is never replaced.
pub fn write_results(path: &Path, output: &DelayAndSumOutput) -> Result<(), DatasetError> {
    if path.exists() {
        return Err(DatasetError::OutputExists {
            path: path.to_path_buf(),
        });
    }
    let (temp_path, temp_file) = create_temp_sibling(path)?;

    let write_result = (|| -> io::Result<()> {
        let mut writer = BufWriter::new(temp_file);
        writeln!(writer, "#POINT\tREAL\tIMAG\tMASK")?;

        let mut ryu_real = ryu::Buffer::new();
        let mut ryu_imag = ryu::Buffer::new();
        for (point, (value, flag)) in output.result.rows().into_iter().zip(&output.mask).enumerate() {
            writeln!(
                writer,
                "{point}\t{}\t{}\t{flag}",
                ryu_real.format(value[0]),
                ryu_imag.format(value[1]),
            )?;
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(io::Error::other)?;
        file.sync_all()
    })();

    let published = write_result
        .map_err(io_error(&temp_path))
        .and_then(|()| match fs::hard_link(&temp_path, path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(DatasetError::OutputExists {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(io_error(path)(e)),
        });
    let _ = fs::remove_file(&temp_path);
    published
}

/// Opens a fresh hidden file next to `path` for exclusive writing.
fn create_temp_sibling(path: &Path) -> Result<(PathBuf, File), DatasetError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path.file_name().ok_or_else(|| {
        io_error(path)(io::Error::new(
            io::ErrorKind::InvalidInput,
            "output path has no file name",
        ))
    })?;

    let pid = std::process::id();
    for attempt in 0..32u32 {
        let candidate = dir.join(format!(".{}.{pid}.{attempt}.tmp", name.to_string_lossy()));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(io_error(&candidate)(e)),
        }
    }
    Err(io_error(dir)(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "failed to allocate a unique temporary output file",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn tiny_dataset() -> Dataset {
        Dataset {
            scanlines: Array3::from_shape_fn((3, 4, 2), |(s, i, c)| (s * 10 + i * 2 + c) as f32),
            pairs: ScanlinePairs::hmc(2),
            lookup_times_tx: array![[0.0f32, 1.0], [2.0, 3.0]],
            lookup_times_rx: array![[0.5f32, 0.5], [0.0, 0.0]],
            amplitudes_tx: array![[1.0f32, 0.5], [0.25, 2.0]],
            amplitudes_rx: array![[1.0f32, 1.0], [1.0, 1.0]],
            invdt: 1.0,
            t0: 0.0,
            fillvalue: f32::NAN,
        }
    }

    #[test]
    fn saved_dataset_loads_back_identically() {
        let dir = tempdir().unwrap();
        let original = Dataset {
            fillvalue: -3.5,
            ..tiny_dataset()
        };
        let manifest = original.save(dir.path()).unwrap();
        assert_eq!(manifest, dir.path().join(MANIFEST_FILE_NAME));

        let loaded = Dataset::load(&manifest).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn truncated_buffer_is_reported_with_its_path() {
        let dir = tempdir().unwrap();
        let manifest = tiny_dataset().save(dir.path()).unwrap();
        let amps = dir.path().join("amplitudes_rx.f32");
        fs::write(&amps, [0u8; 12]).unwrap();

        match Dataset::load(&manifest) {
            Err(DatasetError::LengthMismatch {
                path,
                expected,
                found,
            }) => {
                assert_eq!(path, amps);
                assert_eq!((expected, found), (4, 3));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        fs::write(&amps, [0u8; 7]).unwrap();
        assert!(matches!(
            Dataset::load(&manifest),
            Err(DatasetError::RaggedBuffer { bytes: 7, width: 4, .. })
        ));
    }

    #[test]
    fn manifest_rejects_out_of_range_elements() {
        let dir = tempdir().unwrap();
        let manifest = tiny_dataset().save(dir.path()).unwrap();
        fs::write(dir.path().join("rx.u32"), [0u8, 0, 0, 0, 9, 0, 0, 0, 1, 0, 0, 0]).unwrap();

        assert!(matches!(
            Dataset::load(&manifest),
            Err(DatasetError::Beamform(BeamformError::IndexOutOfRange {
                name: "rx",
                position: 1,
                value: 9,
                ..
            }))
        ));
    }

    #[test]
    fn oversized_manifest_dimensions_are_an_error() {
        let dir = tempdir().unwrap();
        let path = tiny_dataset().save(dir.path()).unwrap();
        let mut manifest = DatasetManifest::load(&path).unwrap();
        manifest.numpoints = 1 << 32;
        manifest.numelements = (1 << 32) + 1;
        fs::write(&path, toml::to_string_pretty(&manifest).unwrap()).unwrap();

        assert!(matches!(
            Dataset::load(&path),
            Err(DatasetError::DimensionOverflow { dims, .. }) if dims == vec![1 << 32, (1 << 32) + 1]
        ));

        // Three scanlines of 2^62 complex samples overflow the scanline buffer length.
        manifest.numpoints = 2;
        manifest.numelements = 2;
        manifest.numsamples = 1 << 62;
        fs::write(&path, toml::to_string_pretty(&manifest).unwrap()).unwrap();
        assert!(matches!(
            Dataset::load(&path),
            Err(DatasetError::DimensionOverflow { .. })
        ));
    }

    #[test]
    fn manifest_defaults_file_names_and_fillvalue() {
        let manifest: DatasetManifest = toml::from_str(
            "numpoints = 2\nnumelements = 3\nnumsamples = 10\ninvdt = 25e6\nt0 = 5e-6\n",
        )
        .unwrap();
        assert_eq!(manifest.fillvalue, 0.0);
        assert_eq!(manifest.files, DatasetFiles::default());
        assert_eq!(manifest.invdt, 25.0e6);
    }

    #[test]
    fn results_are_written_as_tsv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        let output = DelayAndSumOutput {
            result: array![[3.0f32, -2.0], [0.0, 0.0]],
            mask: array![1, 0],
        };
        write_results(&path, &output).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "#POINT\tREAL\tIMAG\tMASK\n0\t3.0\t-2.0\t1\n1\t0.0\t0.0\t0\n");
    }

    #[test]
    fn existing_results_file_is_left_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        fs::write(&path, "keep me\n").unwrap();
        let output = DelayAndSumOutput {
            result: array![[1.0f32, 1.0]],
            mask: array![1],
        };

        assert!(matches!(
            write_results(&path, &output),
            Err(DatasetError::OutputExists { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep me\n");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("out.tsv")]);
    }

    #[test]
    fn results_land_without_a_temporary_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image.tsv");
        write_results(&path, &DelayAndSumOutput::zeros(3)).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("image.tsv")]);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 4);
    }
}

//! HDF5 file format for published report streams
//!
//! Accel and gyro reports are written to separate groups since their
//! integration windows close independently.
//!
//! ```text
//! /metadata   start_time, poll_rate_hz, accel_range_g, version
//! /accel      timestamp_us, x, y, z, temperature, error_count
//! /gyro       timestamp_us, x, y, z, error_count
//! ```

use std::path::Path;
use std::time::Instant;

use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File, Group};

use crate::error::{DriverError, Result};
use crate::report::{AccelReport, GyroReport};

/// Layout version written to `/metadata/version`
pub const FORMAT_VERSION: &str = "2.0";

const CHUNK_SIZE: usize = 1024;

fn storage<E: std::fmt::Display>(what: &str) -> impl FnOnce(E) -> DriverError + '_ {
    move |e| DriverError::Storage(format!("{}: {}", what, e))
}

/// Metadata stored with a recording
#[derive(Debug, Clone)]
pub struct Metadata {
    /// ISO 8601 timestamp of file creation
    pub start_time: String,
    pub poll_rate_hz: f64,
    pub accel_range_g: u32,
    pub version: String,
}

/// One group of per-axis report columns
struct Columns {
    timestamps: Dataset,
    x: Dataset,
    y: Dataset,
    z: Dataset,
    temperature: Option<Dataset>,
    error_count: Dataset,
    len: usize,
}

impl Columns {
    fn create(group: &Group, with_temperature: bool) -> Result<Self> {
        Ok(Self {
            timestamps: create_dataset::<u64>(group, "timestamp_us")?,
            x: create_dataset::<f32>(group, "x")?,
            y: create_dataset::<f32>(group, "y")?,
            z: create_dataset::<f32>(group, "z")?,
            temperature: if with_temperature {
                Some(create_dataset::<f32>(group, "temperature")?)
            } else {
                None
            },
            error_count: create_dataset::<u64>(group, "error_count")?,
            len: 0,
        })
    }

    fn append(
        &mut self,
        timestamps: &[u64],
        values: &[[f32; 3]],
        temperature: &[f32],
        error_count: &[u64],
    ) -> Result<()> {
        if timestamps.is_empty() {
            return Ok(());
        }
        let new_len = self.len + timestamps.len();

        append_to_dataset(&self.timestamps, new_len, timestamps)?;
        for (axis, dataset) in [&self.x, &self.y, &self.z].into_iter().enumerate() {
            let column: Vec<f32> = values.iter().map(|v| v[axis]).collect();
            append_to_dataset(dataset, new_len, &column)?;
        }
        if let Some(dataset) = &self.temperature {
            append_to_dataset(dataset, new_len, temperature)?;
        }
        append_to_dataset(&self.error_count, new_len, error_count)?;

        self.len = new_len;
        Ok(())
    }
}

/// Create a resizable, chunked, compressed dataset
fn create_dataset<T: hdf5::H5Type>(group: &Group, name: &str) -> Result<Dataset> {
    group
        .new_dataset::<T>()
        .shape((0..,))
        .chunk((CHUNK_SIZE,))
        .deflate(4)
        .create(name)
        .map_err(storage(name))
}

fn append_to_dataset<T: hdf5::H5Type>(dataset: &Dataset, new_len: usize, data: &[T]) -> Result<()> {
    dataset
        .resize((new_len,))
        .map_err(storage("Failed to resize dataset"))?;

    let start = new_len - data.len();
    dataset
        .write_slice(data, start..)
        .map_err(storage("Failed to write to dataset"))
}

fn write_str_attr(group: &Group, name: &str, value: &str) -> Result<()> {
    let value: VarLenUnicode = value.parse().map_err(storage(name))?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)
        .and_then(|attr| attr.write_scalar(&value))
        .map_err(storage(name))
}

/// HDF5 writer for a recording session
pub struct Hdf5Writer {
    file: File,
    accel: Columns,
    gyro: Columns,
    start_time: Instant,
}

impl Hdf5Writer {
    /// Create a new recording file
    ///
    /// # Arguments
    /// * `path` - File path, truncated if it exists
    /// * `poll_rate_hz` - Sampling rate the driver runs at
    /// * `accel_range_g` - Accel full scale in effect
    pub fn create<P: AsRef<Path>>(path: P, poll_rate_hz: f64, accel_range_g: u32) -> Result<Self> {
        let file = File::create(path).map_err(storage("Failed to create HDF5 file"))?;

        let metadata = file
            .create_group("metadata")
            .map_err(storage("Failed to create metadata group"))?;
        write_str_attr(&metadata, "start_time", &chrono::Local::now().to_rfc3339())?;
        write_str_attr(&metadata, "version", FORMAT_VERSION)?;
        metadata
            .new_attr::<f64>()
            .create("poll_rate_hz")
            .and_then(|attr| attr.write_scalar(&poll_rate_hz))
            .map_err(storage("poll_rate_hz"))?;
        metadata
            .new_attr::<u32>()
            .create("accel_range_g")
            .and_then(|attr| attr.write_scalar(&accel_range_g))
            .map_err(storage("accel_range_g"))?;

        let accel_group = file
            .create_group("accel")
            .map_err(storage("Failed to create accel group"))?;
        let gyro_group = file
            .create_group("gyro")
            .map_err(storage("Failed to create gyro group"))?;

        Ok(Self {
            accel: Columns::create(&accel_group, true)?,
            gyro: Columns::create(&gyro_group, false)?,
            file,
            start_time: Instant::now(),
        })
    }

    /// Append filtered accel reports
    pub fn append_accel(&mut self, reports: &[AccelReport]) -> Result<()> {
        let timestamps: Vec<u64> = reports.iter().map(|r| r.timestamp_us).collect();
        let values: Vec<[f32; 3]> = reports.iter().map(|r| r.filtered).collect();
        let temperature: Vec<f32> = reports.iter().map(|r| r.temperature).collect();
        let errors: Vec<u64> = reports.iter().map(|r| r.error_count).collect();
        self.accel.append(&timestamps, &values, &temperature, &errors)
    }

    /// Append filtered gyro reports
    pub fn append_gyro(&mut self, reports: &[GyroReport]) -> Result<()> {
        let timestamps: Vec<u64> = reports.iter().map(|r| r.timestamp_us).collect();
        let values: Vec<[f32; 3]> = reports.iter().map(|r| r.filtered).collect();
        let errors: Vec<u64> = reports.iter().map(|r| r.error_count).collect();
        self.gyro.append(&timestamps, &values, &[], &errors)
    }

    /// Flush data to disk
    pub fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(storage("Failed to flush HDF5 file"))
    }

    pub fn accel_count(&self) -> usize {
        self.accel.len
    }

    pub fn gyro_count(&self) -> usize {
        self.gyro.len
    }

    /// Seconds since the file was created
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

/// Read the metadata group of a recording
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<Metadata> {
    let file = File::open(path).map_err(storage("Failed to open HDF5 file"))?;
    let group = file
        .group("metadata")
        .map_err(storage("Failed to open metadata group"))?;

    let read_str = |name: &str| -> Result<String> {
        group
            .attr(name)
            .and_then(|attr| attr.read_scalar::<VarLenUnicode>())
            .map(|s| s.to_string())
            .map_err(storage(name))
    };

    Ok(Metadata {
        start_time: read_str("start_time")?,
        version: read_str("version")?,
        poll_rate_hz: group
            .attr("poll_rate_hz")
            .and_then(|attr| attr.read_scalar::<f64>())
            .map_err(storage("poll_rate_hz"))?,
        accel_range_g: group
            .attr("accel_range_g")
            .and_then(|attr| attr.read_scalar::<u32>())
            .map_err(storage("accel_range_g"))?,
    })
}

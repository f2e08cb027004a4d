//! Projection matrix store
//!
//! Computing the projection matrices dominates the session setup time, so
//! the full [ProjectionTensor] is persisted and looked up before any
//! computation. A record covers a session when it was built with the same
//! star count, field-of-view, telescope diameter and projection method, at
//! least as many Zernike modes and a height set containing every requested
//! height; the record is then sliced down to the session instead of being
//! recomputed.
//!
//! On disk a record is a C-order `[mode, mode, height, star]` `.npy` tensor
//! paired with a pickled metadata sidecar; both are written to a temporary
//! file first and renamed into place, tensor before metadata, so a reader
//! scanning the metadata never lands on a partial tensor. A record that does
//! not decode or does not match its own metadata is reported and treated as
//! a miss.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use glob::glob;
use npyz::WriterBuilder;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::{geometry::TomographyConfig, system::ProjectionTensor};

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("failed to access the projection matrix store")]
    Io(#[from] std::io::Error),
    #[error("failed to encode the record metadata")]
    Pickle(#[from] serde_pickle::Error),
}

/// Projection matrix store interface
pub trait ProjectionStore {
    /// Returns the tensor of a record covering the session, sliced down to
    /// the session, if any
    fn find(&self, config: &TomographyConfig) -> Result<Option<ProjectionTensor>, CacheError>;
    /// Persists a freshly computed session tensor
    fn store(
        &mut self,
        config: &TomographyConfig,
        tensor: &ProjectionTensor,
    ) -> Result<(), CacheError>;
}

/// Projection record metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    id: String,
    n_stars: usize,
    n_modes: usize,
    // [arcsec]
    fov: f64,
    // [m]
    diameter: f64,
    // [km]
    heights: Vec<f64>,
    method: String,
}

impl Record {
    fn new(id: String, config: &TomographyConfig) -> Self {
        Self {
            id,
            n_stars: config.n_stars(),
            n_modes: config.n_modes(),
            fov: config.fov_arcsec(),
            diameter: config.diameter(),
            heights: config.heights_km(),
            method: config.method().to_string(),
        }
    }
    /// Indices of the session heights within the record height set, or None
    /// if the record does not cover the session
    fn covers(&self, config: &TomographyConfig) -> Option<Vec<usize>> {
        if self.n_stars != config.n_stars()
            || self.n_modes < config.n_modes()
            || self.fov != config.fov_arcsec()
            || self.diameter != config.diameter()
            || self.method != config.method().to_string()
        {
            return None;
        }
        config
            .heights_km()
            .iter()
            .map(|h| self.heights.iter().position(|k| (k - h).abs() < 1e-9))
            .collect()
    }
}

/// Disk-backed projection matrix store
#[derive(Debug)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Opens (and creates if needed) the store directory
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, CacheError> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }
    fn read_tensor(&self, record: &Record) -> Result<ProjectionTensor, String> {
        let path = self.dir.join(format!("projection-{}.npy", record.id));
        let file = File::open(&path).map_err(|e| e.to_string())?;
        let npy = npyz::NpyFile::new(BufReader::new(file)).map_err(|e| e.to_string())?;
        let shape: Vec<u64> = npy.shape().to_vec();
        let expected = [
            record.n_modes as u64,
            record.n_modes as u64,
            record.heights.len() as u64,
            record.n_stars as u64,
        ];
        if shape != expected || npy.order() != npyz::Order::C {
            return Err(format!(
                "tensor layout {shape:?} does not match the record metadata"
            ));
        }
        let data = npy.into_vec::<f64>().map_err(|e| e.to_string())?;
        ProjectionTensor::from_vec(record.n_modes, record.heights.len(), record.n_stars, data)
            .map_err(|e| e.to_string())
    }
}

impl ProjectionStore for DiskStore {
    fn find(&self, config: &TomographyConfig) -> Result<Option<ProjectionTensor>, CacheError> {
        let pattern = self.dir.join("projection-*.pkl");
        for entry in glob(pattern.to_str().unwrap()).unwrap() {
            let path = entry.map_err(|e| CacheError::Io(e.into_error()))?;
            let record: Record =
                match File::open(&path).map_err(|e| e.to_string()).and_then(|f| {
                    serde_pickle::from_reader(BufReader::new(f), Default::default())
                        .map_err(|e| e.to_string())
                }) {
                    Ok(record) => record,
                    Err(err) => {
                        log::warn!("skipping unreadable record {path:?}: {err}");
                        continue;
                    }
                };
            let Some(heights) = record.covers(config) else {
                continue;
            };
            match self.read_tensor(&record) {
                Ok(tensor) => {
                    log::info!("projection record {} covers the session", record.id);
                    return Ok(Some(tensor.subset(config.n_modes(), &heights)));
                }
                Err(err) => {
                    // inconsistent record: recompute rather than trust it
                    log::warn!("skipping inconsistent record {}: {err}", record.id);
                }
            }
        }
        Ok(None)
    }

    fn store(
        &mut self,
        config: &TomographyConfig,
        tensor: &ProjectionTensor,
    ) -> Result<(), CacheError> {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let (n_modes, n_heights, n_stars) = tensor.shape();

        let npy_path = self.dir.join(format!("projection-{id}.npy"));
        let tmp_path = npy_path.with_extension("npy.tmp");
        {
            let mut file = BufWriter::new(File::create(&tmp_path)?);
            let mut writer = npyz::WriteOptions::new()
                .default_dtype()
                .shape(&[
                    n_modes as u64,
                    n_modes as u64,
                    n_heights as u64,
                    n_stars as u64,
                ])
                .writer(&mut file)
                .begin_nd()?;
            writer.extend(tensor.as_slice().iter().copied())?;
            writer.finish()?;
        }
        fs::rename(&tmp_path, &npy_path)?;

        // metadata lands last so a reader never finds a dangling record
        let pkl_path = self.dir.join(format!("projection-{id}.pkl"));
        let tmp_path = pkl_path.with_extension("pkl.tmp");
        {
            let mut file = BufWriter::new(File::create(&tmp_path)?);
            serde_pickle::to_writer(&mut file, &Record::new(id.clone(), config), Default::default())?;
        }
        fs::rename(&tmp_path, &pkl_path)?;
        log::info!("stored projection record {id}");
        Ok(())
    }
}

/// In-memory store, for tests and single-process sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<(Record, ProjectionTensor)>,
}

impl ProjectionStore for MemoryStore {
    fn find(&self, config: &TomographyConfig) -> Result<Option<ProjectionTensor>, CacheError> {
        Ok(self.records.iter().find_map(|(record, tensor)| {
            record
                .covers(config)
                .map(|heights| tensor.subset(config.n_modes(), &heights))
        }))
    }

    fn store(
        &mut self,
        config: &TomographyConfig,
        tensor: &ProjectionTensor,
    ) -> Result<(), CacheError> {
        self.records.push((
            Record::new(format!("mem-{}", self.records.len()), config),
            tensor.clone(),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn tagged_tensor(n_modes: usize, n_heights: usize, n_stars: usize) -> ProjectionTensor {
        let mut tensor = ProjectionTensor::zeros(n_modes, n_heights, n_stars);
        for height in 0..n_heights {
            for star in 0..n_stars {
                tensor.set_block(
                    height,
                    star,
                    &DMatrix::repeat(n_modes, n_modes, (10 * height + star) as f64),
                );
            }
        }
        tensor
    }

    #[test]
    fn memory_store_superset_lookup() {
        let superset =
            TomographyConfig::new(3, 5, 60., &[0., 5., 10., 15., 20., 25., 30.], 4.).unwrap();
        let mut store = MemoryStore::default();
        let tensor = tagged_tensor(5, 7, 3);
        store.store(&superset, &tensor).unwrap();

        let session = TomographyConfig::new(3, 3, 60., &[0., 10., 20.], 4.).unwrap();
        let found = store.find(&session).unwrap().unwrap();
        assert_eq!(found, tensor.subset(3, &[0, 2, 4]));

        // a larger request is not covered
        let wider = TomographyConfig::new(3, 3, 60., &[0., 10., 40.], 4.).unwrap();
        assert!(store.find(&wider).unwrap().is_none());
        let other_fov = TomographyConfig::new(3, 3, 30., &[0., 10.], 4.).unwrap();
        assert!(store.find(&other_fov).unwrap().is_none());
    }

    #[test]
    fn disk_store_round_trip() {
        let dir = std::env::temp_dir().join(format!(
            "metapupil-store-{}",
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect::<String>()
        ));
        let mut store = DiskStore::new(&dir).unwrap();
        let config = TomographyConfig::new(2, 4, 60., &[0., 10.], 4.).unwrap();
        let tensor = tagged_tensor(4, 2, 2);
        store.store(&config, &tensor).unwrap();
        let found = store.find(&config).unwrap().unwrap();
        assert_eq!(found, tensor);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn dangling_record_is_a_miss() {
        let dir = std::env::temp_dir().join(format!(
            "metapupil-store-{}",
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect::<String>()
        ));
        let mut store = DiskStore::new(&dir).unwrap();
        let config = TomographyConfig::new(2, 4, 60., &[0., 10.], 4.).unwrap();
        store.store(&config, &tagged_tensor(4, 2, 2)).unwrap();
        // break the record: drop the tensor, keep the metadata
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().map_or(false, |ext| ext == "npy") {
                fs::remove_file(path).unwrap();
            }
        }
        assert!(store.find(&config).unwrap().is_none());
        fs::remove_dir_all(&dir).unwrap();
    }
}

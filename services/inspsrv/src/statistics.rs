//! Per-station yield statistics
//!
//! All stations share one mutex: pipeline steps update single entries while
//! the save task reads the whole set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{InspectionError, Result};

const FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationStatistics {
    pub station_id: u32,
    pub total_count: u64,
    pub ok_count: u64,
    pub ng_count: u64,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

impl StationStatistics {
    pub fn new(station_id: u32) -> Self {
        let now = Utc::now();
        Self {
            station_id,
            total_count: 0,
            ok_count: 0,
            ng_count: 0,
            start_time: now,
            last_update_time: now,
        }
    }

    pub fn add_result(&mut self, is_ok: bool) {
        self.total_count += 1;
        if is_ok {
            self.ok_count += 1;
        } else {
            self.ng_count += 1;
        }
        self.last_update_time = Utc::now();
    }

    /// Percentage of OK parts, 0 before the first part
    pub fn ok_rate(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.ok_count as f64 / self.total_count as f64 * 100.0
    }

    /// Parts per hour since `start_time`
    pub fn production_rate(&self) -> f64 {
        self.production_rate_at(Utc::now())
    }

    pub fn production_rate_at(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_hours = (now - self.start_time).num_milliseconds() as f64 / 3_600_000.0;
        if elapsed_hours <= 0.0 {
            return 0.0;
        }
        self.total_count as f64 / elapsed_hours
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.station_id);
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StatisticsFile {
    version: u32,
    saved_at: DateTime<Utc>,
    stations: Vec<StationStatistics>,
}

/// Statistics for all stations plus their file
#[derive(Debug)]
pub struct StatisticsStore {
    path: PathBuf,
    stations: Mutex<BTreeMap<u32, StationStatistics>>,
}

impl StatisticsStore {
    /// Empty store for `station_ids`, nothing read from disk
    pub fn new(path: impl Into<PathBuf>, station_ids: &[u32]) -> Self {
        let stations = station_ids
            .iter()
            .map(|id| (*id, StationStatistics::new(*id)))
            .collect();
        Self {
            path: path.into(),
            stations: Mutex::new(stations),
        }
    }

    /// Load from `path`. A missing file starts every station from zero;
    /// an unreadable one is logged and also starts from zero.
    pub async fn load(path: impl Into<PathBuf>, station_ids: &[u32]) -> Result<Self> {
        let store = Self::new(path, station_ids);

        let content = match tokio::fs::read(&store.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No statistics file at {}, starting from zero", store.path.display());
                return Ok(store);
            },
            Err(e) => {
                return Err(InspectionError::statistics(format!(
                    "read {}: {}",
                    store.path.display(),
                    e
                )))
            },
        };

        match serde_json::from_slice::<StatisticsFile>(&content) {
            Ok(file) => {
                let mut stations = store.stations.lock();
                for entry in file.stations {
                    // Stations no longer configured are dropped
                    if let Some(slot) = stations.get_mut(&entry.station_id) {
                        *slot = entry;
                    } else {
                        debug!("Dropping statistics of unknown station {}", entry.station_id);
                    }
                }
                info!(
                    "Loaded statistics for {} station(s) from {}",
                    stations.len(),
                    store.path.display()
                );
            },
            Err(e) => {
                warn!(
                    "Statistics file {} unreadable ({}), starting from zero",
                    store.path.display(),
                    e
                );
            },
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one result; returns the updated entry
    pub fn add_result(&self, station_id: u32, is_ok: bool) -> StationStatistics {
        let mut stations = self.stations.lock();
        let entry = stations
            .entry(station_id)
            .or_insert_with(|| StationStatistics::new(station_id));
        entry.add_result(is_ok);
        entry.clone()
    }

    pub fn get(&self, station_id: u32) -> Option<StationStatistics> {
        self.stations.lock().get(&station_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<StationStatistics> {
        self.stations.lock().values().cloned().collect()
    }

    /// Zero one station; false if it is unknown
    pub fn reset(&self, station_id: u32) -> bool {
        match self.stations.lock().get_mut(&station_id) {
            Some(entry) => {
                entry.reset();
                info!("Statistics reset for station {}", station_id);
                true
            },
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for entry in self.stations.lock().values_mut() {
            entry.reset();
        }
        info!("Statistics reset for all stations");
    }

    /// Write the whole set to a temp file, then rename over the target
    pub async fn save(&self) -> Result<()> {
        let file = StatisticsFile {
            version: FILE_VERSION,
            saved_at: Utc::now(),
            stations: self.snapshot(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| InspectionError::statistics(format!("serialize: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    InspectionError::statistics(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| InspectionError::statistics(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            InspectionError::statistics(format!("rename to {}: {}", self.path.display(), e))
        })?;

        debug!("Statistics saved to {}", self.path.display());
        Ok(())
    }

    /// Save every `period`, and once more when `token` is cancelled
    pub fn spawn_periodic_save(
        self: Arc<Self>,
        period: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.save().await {
                            error!("Periodic statistics save: {}", e);
                        }
                    },
                }
            }

            if let Err(e) = self.save().await {
                error!("Final statistics save: {}", e);
            }
        })
    }
}

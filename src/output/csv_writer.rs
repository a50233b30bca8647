//! CSV sink: one row per accepted track and plane.
use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::{
    constants::{HitId, Millimeter, SensorId},
    trackfit_errors::TrackFitError,
};

use super::{TrackRecord, TrackSink};

#[derive(Debug, Serialize)]
struct CsvRow {
    event: u64,
    track: usize,
    sensor_id: SensorId,
    z: Millimeter,
    x: f64,
    y: f64,
    tx: f64,
    ty: f64,
    sigma_x: f64,
    sigma_y: f64,
    sigma_tx: f64,
    sigma_ty: f64,
    weight: f64,
    best_hit: Option<HitId>,
    best_hit_weight: f64,
    chi2: f64,
    ndof: f64,
}

/// Writes accepted tracks as CSV with a header row.
pub struct CsvTrackWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl CsvTrackWriter<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TrackFitError> {
        Ok(CsvTrackWriter {
            writer: csv::Writer::from_path(path)?,
            rows: 0,
        })
    }
}

impl<W: Write> CsvTrackWriter<W> {
    pub fn from_writer(writer: W) -> Self {
        CsvTrackWriter {
            writer: csv::Writer::from_writer(writer),
            rows: 0,
        }
    }

    /// Number of data rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, TrackFitError> {
        self.writer
            .into_inner()
            .map_err(|e| TrackFitError::IoError(e.into_error()))
    }
}

impl<W: Write> TrackSink for CsvTrackWriter<W> {
    fn consume(&mut self, record: TrackRecord) -> Result<(), TrackFitError> {
        for plane in &record.planes {
            let s = plane.sigmas();
            self.writer.serialize(CsvRow {
                event: record.event,
                track: record.track,
                sensor_id: plane.sensor_id,
                z: plane.z,
                x: plane.state[0],
                y: plane.state[1],
                tx: plane.state[2],
                ty: plane.state[3],
                sigma_x: s[0],
                sigma_y: s[1],
                sigma_tx: s[2],
                sigma_ty: s[3],
                weight: plane.weight,
                best_hit: plane.best_hit,
                best_hit_weight: plane.best_hit_weight,
                chi2: record.chi2,
                ndof: record.ndof,
            })?;
            self.rows += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TrackFitError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test_csv_writer {
    use super::*;
    use crate::output::PlaneStateRecord;

    fn plane(sensor_id: SensorId, best_hit: Option<HitId>) -> PlaneStateRecord {
        let mut covariance = [0.0; 16];
        for i in 0..4 {
            covariance[i * 5] = 1.0e-6;
        }
        PlaneStateRecord {
            sensor_id,
            z: 100.0 * sensor_id as f64,
            state: [0.1, 0.2, 1e-3, 5e-4],
            covariance,
            weight: 0.99,
            best_hit,
            best_hit_weight: if best_hit.is_some() { 0.99 } else { 0.0 },
            hits: best_hit.map(|h| (h, 0.99)).into_iter().collect(),
        }
    }

    #[test]
    fn test_rows_per_plane() {
        let mut sink = CsvTrackWriter::from_writer(Vec::new());
        sink.consume(TrackRecord {
            event: 12,
            track: 0,
            chi2: 1.5,
            ndof: 19.9,
            planes: vec![plane(0, Some(4)), plane(1, None)],
        })
        .unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.rows(), 2);

        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("event,track,sensor_id,z,x,y,tx,ty,sigma_x"));
        assert!(lines[1].starts_with("12,0,0,0.0,0.1,0.2,"));
        // Missing best hit is an empty field
        assert!(lines[2].contains(",0.99,,0.0,1.5,19.9"));
    }
}

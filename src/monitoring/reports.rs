use crate::error::{FleetError, Result};
use crate::monitoring::telemetry_sink::{
    LocationRecord, COMMAND_FILE, EVENT_FILE, LOCATION_FILE, VEHICLE_FILE,
};
use plotters::prelude::*;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Row counts for each telemetry file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub location_updates: usize,
    pub events: usize,
    pub admin_commands: usize,
    pub vehicle_statuses: usize,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Report Summary:")?;
        writeln!(f, "Location Updates: {} records", self.location_updates)?;
        writeln!(f, "Events: {} records", self.events)?;
        writeln!(f, "Admin Commands: {} records", self.admin_commands)?;
        write!(f, "Vehicle Statuses: {} records", self.vehicle_statuses)
    }
}

/// Data rows in a CSV file; a missing file counts as empty.
pub fn count_csv_records(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let mut rdr = csv::Reader::from_reader(File::open(path)?);
    let mut count = 0;
    for record in rdr.records() {
        record?;
        count += 1;
    }
    Ok(count)
}

pub fn generate_report_summary(dir: &Path) -> Result<ReportSummary> {
    Ok(ReportSummary {
        location_updates: count_csv_records(&dir.join(LOCATION_FILE))?,
        events: count_csv_records(&dir.join(EVENT_FILE))?,
        admin_commands: count_csv_records(&dir.join(COMMAND_FILE))?,
        vehicle_statuses: count_csv_records(&dir.join(VEHICLE_FILE))?,
    })
}

/// Every recorded position of one vehicle, in file order.
pub fn load_vehicle_trace(dir: &Path, vehicle_id: &str) -> Result<Vec<LocationRecord>> {
    let path = dir.join(LOCATION_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut rdr = csv::Reader::from_reader(File::open(path)?);
    let mut trace = Vec::new();
    for result in rdr.deserialize() {
        let record: LocationRecord = result?;
        if record.vehicle_id == vehicle_id {
            trace.push(record);
        }
    }
    Ok(trace)
}

fn plot_error<E: std::error::Error + Send + Sync>(e: DrawingAreaErrorKind<E>) -> FleetError {
    FleetError::Plot(e.to_string())
}

/// Renders a vehicle's recorded path to `<dir>/<id>_trace.png`.
pub fn plot_vehicle_trace(dir: &Path, vehicle_id: &str) -> Result<PathBuf> {
    let trace = load_vehicle_trace(dir, vehicle_id)?;
    if trace.is_empty() {
        return Err(FleetError::VehicleNotFound(vehicle_id.to_string()));
    }
    let (mut min_long, mut max_long) = (f64::MAX, f64::MIN);
    let (mut min_lat, mut max_lat) = (f64::MAX, f64::MIN);
    for r in &trace {
        min_long = min_long.min(r.long);
        max_long = max_long.max(r.long);
        min_lat = min_lat.min(r.lat);
        max_lat = max_lat.max(r.lat);
    }
    let pad = 0.002;

    let out = dir.join(format!("{}_trace.png", vehicle_id));
    // The backend borrows `out` until the drawing is presented.
    {
        let root = BitMapBackend::new(&out, (800, 600)).into_drawing_area();
        root.fill(&WHITE).map_err(plot_error)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(format!("Vehicle {} Location Trace", vehicle_id), ("sans-serif", 20))
            .margin(40)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(min_long - pad..max_long + pad, min_lat - pad..max_lat + pad)
            .map_err(plot_error)?;
        chart
            .configure_mesh()
            .x_desc("Longitude")
            .y_desc("Latitude")
            .draw()
            .map_err(plot_error)?;
        chart
            .draw_series(LineSeries::new(trace.iter().map(|r| (r.long, r.lat)), &BLUE))
            .map_err(plot_error)?;
        chart
            .draw_series(trace.iter().map(|r| Circle::new((r.long, r.lat), 3, RED.filled())))
            .map_err(plot_error)?;
        root.present().map_err(plot_error)?;
    }
    log::info!("Trace for {} saved to {}", vehicle_id, out.display());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_locations(dir: &Path) {
        let mut file = File::create(dir.join(LOCATION_FILE)).unwrap();
        writeln!(file, "timestamp,vehicle_id,vehicle_type,lat,long,status,network_status").unwrap();
        writeln!(file, "2025-01-01 08:00:00,B101,Bus,40.7577,-73.9901,On Time,UDP").unwrap();
        writeln!(file, "2025-01-01 08:00:03,T4,Train,40.7489,-73.9375,On Time,UDP").unwrap();
        writeln!(file, "2025-01-01 08:00:06,B101,Bus,40.7580,-73.9855,Delayed,Unknown").unwrap();
    }

    #[test]
    fn summary_counts_rows_and_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        write_locations(dir.path());
        let summary = generate_report_summary(dir.path()).unwrap();
        assert_eq!(
            summary,
            ReportSummary {
                location_updates: 3,
                ..ReportSummary::default()
            }
        );
        assert!(summary.to_string().contains("Location Updates: 3 records"));
    }

    #[test]
    fn trace_filters_by_vehicle() {
        let dir = tempfile::tempdir().unwrap();
        write_locations(dir.path());
        let trace = load_vehicle_trace(dir.path(), "B101").unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[1].status, "Delayed");
        assert!(matches!(
            plot_vehicle_trace(dir.path(), "Z1"),
            Err(FleetError::VehicleNotFound(_))
        ));
    }

    #[test]
    fn plot_returns_png_path_next_to_logs() {
        let dir = tempfile::tempdir().unwrap();
        write_locations(dir.path());
        match plot_vehicle_trace(dir.path(), "B101") {
            Ok(path) => {
                assert_eq!(path, dir.path().join("B101_trace.png"));
                assert!(path.exists());
            }
            // Headless hosts may lack a font for the caption.
            Err(FleetError::Plot(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
}

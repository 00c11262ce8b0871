use serde::de::DeserializeOwned;
use std::{
    collections::HashMap,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    time::Instant,
};
use thiserror::Error;
use tracing::{debug, warn};
use zip::ZipArchive;

mod config;
pub mod models;
pub use config::*;
use models::*;

use crate::{
    network::{NetworkData, RouteData, SpeedRecord, StopData},
    shared::geo::{Coordinate, Distance},
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Could not find file with name: {0}")]
    FileNotFound(String),
    #[error("Route {route} calls at unknown stop {stop}")]
    UnknownStop { route: String, stop: String },
    #[error("Route {route} uses unknown shape {shape}")]
    UnknownShape { route: String, shape: String },
    #[error("Stop list references unknown route {0}")]
    UnknownRoute(String),
}

#[derive(Debug, Clone, Default)]
pub enum Storage {
    #[default]
    None,
    Zip(PathBuf),
    Directory(PathBuf),
}

/// Reads route reference data from a zip archive or a directory of CSV files.
#[derive(Debug, Clone, Default)]
pub struct FeedReader {
    config: Config,
    storage: Storage,
}

impl FeedReader {
    pub fn new(config: self::Config) -> Self {
        Self {
            config,
            storage: Default::default(),
        }
    }

    pub fn from_zip(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage = Storage::Zip(path.into());
        self
    }

    pub fn from_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage = Storage::Directory(path.into());
        self
    }

    /// Picks directory or zip storage depending on what `path` points at.
    pub fn from_path(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            self.from_directory(path)
        } else {
            self.from_zip(path)
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn stream_routes<F>(&self, f: F) -> Result<(), self::Error>
    where
        F: FnMut((usize, FeedRoute)),
    {
        self.stream(&self.config.routes_file_name, f)
    }

    pub fn stream_stops<F>(&self, f: F) -> Result<(), self::Error>
    where
        F: FnMut((usize, FeedStop)),
    {
        self.stream(&self.config.stops_file_name, f)
    }

    pub fn stream_route_stops<F>(&self, f: F) -> Result<(), self::Error>
    where
        F: FnMut((usize, FeedRouteStop)),
    {
        self.stream(&self.config.route_stops_file_name, f)
    }

    pub fn stream_shapes<F>(&self, f: F) -> Result<(), self::Error>
    where
        F: FnMut((usize, FeedShapePoint)),
    {
        self.stream(&self.config.shapes_file_name, f)
    }

    pub fn stream_speeds<F>(&self, f: F) -> Result<(), self::Error>
    where
        F: FnMut((usize, SpeedRecord)),
    {
        self.stream(&self.config.speeds_file_name, f)
    }

    /// Reads every file and assembles the routes they describe.
    ///
    /// Routes keep the order of the routes file and their stops follow
    /// `stop_sequence`. A route without any stops is skipped. Shapes and
    /// speeds are optional.
    pub fn load(&self) -> Result<NetworkData, self::Error> {
        debug!("Reading feed...");
        let now = Instant::now();

        let mut stops: HashMap<String, FeedStop> = HashMap::new();
        self.stream_stops(|(_, stop)| {
            stops.insert(stop.stop_id.clone(), stop);
        })?;

        let mut shapes: HashMap<String, Vec<FeedShapePoint>> = HashMap::new();
        self.optional(self.stream_shapes(|(_, point)| {
            shapes.entry(point.shape_id.clone()).or_default().push(point);
        }))?;
        shapes
            .values_mut()
            .for_each(|points| points.sort_by_key(|point| point.shape_pt_sequence));

        let mut routes: Vec<FeedRoute> = Vec::new();
        self.stream_routes(|(_, route)| routes.push(route))?;

        let mut calls: HashMap<String, Vec<FeedRouteStop>> = HashMap::new();
        self.stream_route_stops(|(_, call)| {
            calls.entry(call.route_id.clone()).or_default().push(call);
        })?;
        if let Some(route) = calls
            .keys()
            .find(|id| !routes.iter().any(|route| &route.route_id == *id))
        {
            return Err(self::Error::UnknownRoute(route.clone()));
        }

        let mut data = Vec::with_capacity(routes.len());
        for route in routes {
            let Some(mut calls) = calls.remove(&route.route_id) else {
                warn!("Skipping route {} without stops", route.route_id);
                continue;
            };
            calls.sort_by_key(|call| call.stop_sequence);

            let route_stops = calls
                .into_iter()
                .map(|call| -> Result<StopData, self::Error> {
                    let stop = stops.get(&call.stop_id).ok_or_else(|| {
                        self::Error::UnknownStop {
                            route: route.route_id.clone(),
                            stop: call.stop_id.clone(),
                        }
                    })?;
                    Ok(StopData {
                        id: stop.stop_id.clone(),
                        name: stop.stop_name.clone(),
                        coordinate: Coordinate::new(stop.stop_lat, stop.stop_lon),
                        distance: call.shape_dist_traveled.map(Distance::from_meters),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let shape: Vec<Coordinate> = match &route.shape_id {
                Some(shape_id) => shapes
                    .get(shape_id)
                    .ok_or_else(|| self::Error::UnknownShape {
                        route: route.route_id.clone(),
                        shape: shape_id.clone(),
                    })?
                    .iter()
                    .map(|point| Coordinate::new(point.shape_pt_lat, point.shape_pt_lon))
                    .collect(),
                None => Vec::new(),
            };

            data.push(RouteData {
                id: route.route_id,
                short_name: route.route_short_name,
                long_name: route.route_long_name,
                stops: route_stops,
                shape,
            });
        }

        let mut speeds = Vec::new();
        self.optional(self.stream_speeds(|(_, speed)| speeds.push(speed)))?;

        debug!(
            "Reading {} routes and {} stops took {:?}",
            data.len(),
            stops.len(),
            now.elapsed()
        );
        Ok(NetworkData {
            routes: data,
            speeds,
        })
    }

    fn optional(&self, result: Result<(), self::Error>) -> Result<(), self::Error> {
        match result {
            Err(self::Error::FileNotFound(name)) => {
                debug!("Optional file {name} not in feed");
                Ok(())
            }
            other => other,
        }
    }

    fn stream<T, F>(&self, file_name: &str, f: F) -> Result<(), self::Error>
    where
        T: DeserializeOwned,
        F: FnMut((usize, T)),
    {
        match &self.storage {
            Storage::None => Ok(()),
            Storage::Zip(path) => stream_from_zip(path, file_name, f),
            Storage::Directory(path) => stream_from_directory(path, file_name, f),
        }
    }
}

fn stream_from_zip<T, F>(zip_path: &Path, file_name: &str, f: F) -> Result<(), self::Error>
where
    T: DeserializeOwned,
    F: FnMut((usize, T)),
{
    let zip_file = File::open(zip_path)?;
    let mut archive = ZipArchive::new(zip_file)?;
    let index = archive
        .index_for_name(file_name)
        .ok_or_else(|| self::Error::FileNotFound(file_name.to_string()))?;
    let file = archive.by_index(index)?;
    parse_csv(file, f)
}

fn stream_from_directory<T, F>(dir: &Path, file_name: &str, f: F) -> Result<(), self::Error>
where
    T: DeserializeOwned,
    F: FnMut((usize, T)),
{
    let path = dir.join(file_name);
    if !path.is_file() {
        return Err(self::Error::FileNotFound(file_name.to_string()));
    }
    parse_csv(File::open(path)?, f)
}

fn parse_csv<R, T, F>(reader: R, mut f: F) -> Result<(), self::Error>
where
    R: Read,
    T: DeserializeOwned,
    F: FnMut((usize, T)),
{
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    for (i, result) in reader.deserialize().enumerate() {
        let record: T = result?;
        f((i, record));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_optional_columns() {
        let csv = "stop_id,stop_name,stop_lat,stop_lon\nA,,59.0,18.0\nB, Central ,59.1,18.1\n";
        let mut stops: Vec<FeedStop> = Vec::new();
        parse_csv(csv.as_bytes(), |(_, stop)| stops.push(stop)).unwrap();
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].stop_name, None);
        assert_eq!(stops[1].stop_name.as_deref(), Some("Central"));
    }

    #[test]
    fn malformed_row_is_an_error() {
        let csv = "stop_id,stop_name,stop_lat,stop_lon\nA,,north,18.0\n";
        let result = parse_csv(csv.as_bytes(), |(_, _stop): (usize, FeedStop)| {});
        assert!(matches!(result, Err(Error::Csv(_))));
    }

    #[test]
    fn reader_without_storage_reads_nothing() {
        let data = FeedReader::default().load().unwrap();
        assert!(data.routes.is_empty());
        assert!(data.speeds.is_empty());
    }
}

use serde::{Deserialize, Serialize};

/// File names inside a feed archive or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub routes_file_name: String,
    pub stops_file_name: String,
    pub route_stops_file_name: String,
    pub shapes_file_name: String,
    /// Optional. A feed without it has no historical speeds.
    pub speeds_file_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            routes_file_name: "routes.txt".into(),
            stops_file_name: "stops.txt".into(),
            route_stops_file_name: "route_stops.txt".into(),
            shapes_file_name: "shapes.txt".into(),
            speeds_file_name: "speeds.txt".into(),
        }
    }
}

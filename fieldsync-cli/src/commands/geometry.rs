//! `fieldsync geometry`: the boundary codec on the command line.

use anyhow::{Context, Result};
use clap::Subcommand;

use fieldsync_sync::{geojson_to_wkt, wkt_to_geojson};

#[derive(Subcommand, Debug)]
pub enum GeometryCommand {
    /// Convert a WKT polygon to closed-ring GeoJSON.
    ToGeojson {
        /// e.g. "POLYGON((0 0,4 0,4 4,0 4))"
        wkt: String,
    },
    /// Convert a GeoJSON polygon to closed-ring WKT.
    ToWkt {
        /// GeoJSON geometry object as a JSON string.
        geojson: String,
    },
}

pub fn run(command: GeometryCommand) -> Result<()> {
    match command {
        GeometryCommand::ToGeojson { wkt } => {
            let geojson = wkt_to_geojson(&wkt).context("invalid WKT boundary")?;
            println!("{geojson}");
        }
        GeometryCommand::ToWkt { geojson } => {
            let value: serde_json::Value =
                serde_json::from_str(&geojson).context("argument is not valid JSON")?;
            let wkt = geojson_to_wkt(&value).context("invalid GeoJSON boundary")?;
            println!("{wkt}");
        }
    }
    Ok(())
}

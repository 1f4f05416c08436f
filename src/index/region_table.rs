//! Region boundaries loaded from a GeoJSON FeatureCollection.

use super::Bounds;
use anyhow::{Context, Result};
use geo::{BoundingRect, Geometry, MultiPolygon};
use geojson::{FeatureCollection, GeoJson};
use std::collections::HashSet;
use std::path::Path;

/// A named region polygon.
#[derive(Debug, Clone)]
pub struct Region {
    /// Unique region name (the join key)
    pub name: String,

    /// Region boundary, in the raster CRS
    pub geometry: MultiPolygon<f64>,
}

impl Region {
    pub fn new(name: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            name: name.into(),
            geometry,
        }
    }

    /// Bounding box [min_x, min_y, max_x, max_y], `None` for empty geometry.
    pub fn bounds(&self) -> Option<Bounds> {
        self.geometry
            .bounding_rect()
            .map(|r| [r.min().x, r.min().y, r.max().x, r.max().y])
    }
}

/// Immutable base table of regions, in source order.
#[derive(Debug, Clone)]
pub struct RegionTable {
    /// Name of the identity column (e.g. `NAME_1`)
    identity_column: String,

    regions: Vec<Region>,
}

impl RegionTable {
    /// Build a table, rejecting repeated region names.
    pub fn new(identity_column: impl Into<String>, regions: Vec<Region>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(regions.len());
        for region in &regions {
            if !seen.insert(region.name.as_str()) {
                anyhow::bail!("Region name {} appears more than once", region.name);
            }
        }

        Ok(Self {
            identity_column: identity_column.into(),
            regions,
        })
    }

    /// Load regions from a GeoJSON file.
    pub fn from_geojson_file(path: &Path, identity_column: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read region file: {}", path.display()))?;

        let table = Self::from_geojson_str(&contents, identity_column)
            .with_context(|| format!("Invalid region file: {}", path.display()))?;

        tracing::info!(
            "Loaded {} regions from {} (identity: {})",
            table.len(),
            path.display(),
            identity_column
        );

        Ok(table)
    }

    /// Parse regions from GeoJSON text.
    ///
    /// Every feature needs a string property named `identity_column` and a
    /// Polygon or MultiPolygon geometry.
    pub fn from_geojson_str(contents: &str, identity_column: &str) -> Result<Self> {
        let geojson: GeoJson = contents.parse().context("Failed to parse GeoJSON")?;
        let collection =
            FeatureCollection::try_from(geojson).context("Expected a GeoJSON FeatureCollection")?;

        let mut regions = Vec::with_capacity(collection.features.len());
        for (i, feature) in collection.features.into_iter().enumerate() {
            let name = match feature.property(identity_column) {
                Some(serde_json::Value::String(name)) => name.clone(),
                Some(other) => anyhow::bail!(
                    "Feature {}: property {} must be a string, got {}",
                    i,
                    identity_column,
                    other
                ),
                None => anyhow::bail!("Feature {}: missing property {}", i, identity_column),
            };

            let geometry = feature
                .geometry
                .with_context(|| format!("Region {} has no geometry", name))?;
            let geometry = Geometry::<f64>::try_from(geometry.value)
                .with_context(|| format!("Region {} has an unreadable geometry", name))?;

            let geometry = match geometry {
                Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
                Geometry::MultiPolygon(multi) => multi,
                _ => anyhow::bail!("Region {} must be a Polygon or MultiPolygon", name),
            };

            regions.push(Region { name, geometry });
        }

        Self::new(identity_column, regions)
    }

    /// Name of the identity column.
    pub fn identity_column(&self) -> &str {
        &self.identity_column
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Look up a region by name.
    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Overall bounding box of all regions.
    pub fn bounds(&self) -> Option<Bounds> {
        self.regions
            .iter()
            .filter_map(Region::bounds)
            .reduce(|a, b| [a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])])
    }
}

use serde::Serialize;

/// Contents of an MBTiles `metadata` table.
///
/// Every field is optional; missing or malformed values are left empty
/// rather than failing the read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArchiveMetadata {
    pub name: Option<String>,
    pub format: Option<String>,
    pub description: Option<String>,
    pub attribution: Option<String>,
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    /// `[west, south, east, north]` in degrees
    pub bounds: Option<[f64; 4]>,
    /// `[longitude, latitude, zoom]`
    pub center: Option<[f64; 3]>,
}

impl ArchiveMetadata {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut metadata = Self::default();
        for (key, value) in pairs {
            let value = value.trim().to_string();
            match key.trim() {
                "name" => metadata.name = Some(value),
                "format" => metadata.format = Some(value),
                "description" => metadata.description = Some(value),
                "attribution" => metadata.attribution = Some(value),
                "minzoom" => metadata.min_zoom = value.parse().ok(),
                "maxzoom" => metadata.max_zoom = value.parse().ok(),
                "bounds" => metadata.bounds = parse_floats(&value),
                "center" => metadata.center = parse_floats(&value),
                _ => {}
            }
        }
        metadata
    }
}

fn parse_floats<const N: usize>(value: &str) -> Option<[f64; N]> {
    let mut out = [0.0; N];
    let mut parts = value.split(',');
    for slot in out.iter_mut() {
        *slot = parts.next()?.trim().parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

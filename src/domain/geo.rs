use serde::{Deserialize, Serialize};

/// A closed ring of (x, y) vertices, x being longitude and y latitude.
///
/// CAP XML writes a polygon as whitespace-separated `"lat,lon"` pairs
/// (parsed by [`parse_polygon`]); on the bus it travels as a JSON
/// array of `[x, y]` pairs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon(pub Vec<[f64; 2]>);

impl Polygon {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A circular area: center (x, y) plus a radius in kilometers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: [f64; 2],
    pub radius: f64,
}

/// Parses the CAP polygon text encoding.
pub fn parse_polygon(value: &str) -> Result<Polygon, String> {
    let mut points = Vec::new();
    for pair in value.split_whitespace() {
        let (lat, lon) = parse_coordinate(pair)?;
        points.push([lon, lat]);
    }
    Ok(Polygon(points))
}

/// Parses the CAP circle text encoding: `"lat,lon radius"`.
pub fn parse_circle(value: &str) -> Result<Circle, String> {
    let mut parts = value.split_whitespace();
    let pair = parts
        .next()
        .ok_or_else(|| format!("invalid circle: {value}"))?;
    let radius = parts
        .next()
        .ok_or_else(|| format!("invalid circle: {value}"))?;
    let (lat, lon) = parse_coordinate(pair)?;
    let radius: f64 = radius
        .trim()
        .parse()
        .map_err(|_| format!("invalid radius in: {value}"))?;
    Ok(Circle {
        center: [lon, lat],
        radius,
    })
}

fn parse_coordinate(pair: &str) -> Result<(f64, f64), String> {
    let mut parts = pair.splitn(2, ',');
    let lat = parts
        .next()
        .ok_or_else(|| format!("invalid coordinate pair: {pair}"))?;
    let lon = parts
        .next()
        .ok_or_else(|| format!("invalid coordinate pair: {pair}"))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| format!("invalid latitude in: {pair}"))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .map_err(|_| format!("invalid longitude in: {pair}"))?;
    Ok((lat, lon))
}

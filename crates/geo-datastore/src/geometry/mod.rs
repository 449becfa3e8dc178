//! WKT/EWKT text handling.
//!
//! Pure functions for SRID prefix round-tripping, geometry type token
//! classification and the promotion-to-collection heuristic. Malformed input
//! yields `None`, never an error; callers decide whether that is fatal.

/// Placeholder substituted for degenerate geometry input on the write path.
pub const EMPTY_POINT_WKT: &str = "POINT EMPTY";

/// Geometry type tokens recognized by the promotion heuristic.
const MULTI_TOKENS: [&str; 4] = [
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
];

/// Extract the geometry type token from a WKT or EWKT string.
///
/// Strips an optional `SRID=<n>;` prefix and returns the first word token
/// with its case preserved, or `None` if the string does not start with one.
pub fn geometry_type(wkt: &str) -> Option<&str> {
    let body = strip_srid(wkt).trim_start();
    let end = body
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    if end == 0 {
        None
    } else {
        Some(&body[..end])
    }
}

/// Parse the `SRID=<n>;` prefix of an EWKT string.
///
/// `None` if the prefix is absent or malformed.
pub fn srid_of(ewkt: &str) -> Option<i32> {
    let rest = strip_prefix_ci(ewkt.trim_start(), "SRID=")?;
    let (digits, _) = rest.split_once(';')?;
    digits.trim().parse().ok()
}

/// Return the WKT portion of an EWKT string, without the SRID prefix.
pub fn strip_srid(ewkt: &str) -> &str {
    let trimmed = ewkt.trim_start();
    if strip_prefix_ci(trimmed, "SRID=").is_some() {
        if let Some((_, wkt)) = trimmed.split_once(';') {
            return wkt;
        }
    }
    ewkt
}

/// Attach or replace the SRID prefix of a geometry string.
pub fn with_srid(wkt: &str, srid: i32) -> String {
    format!("SRID={};{}", srid, strip_srid(wkt))
}

/// Whether a geometry type token names a collection geometry.
pub fn is_multi(type_token: &str) -> bool {
    MULTI_TOKENS
        .iter()
        .any(|t| t.eq_ignore_ascii_case(type_token))
}

/// The MULTI- equivalent of a single geometry type token, if one exists.
pub fn collection_type_of(type_token: &str) -> Option<&'static str> {
    if type_token.eq_ignore_ascii_case("POINT") {
        Some("MULTIPOINT")
    } else if type_token.eq_ignore_ascii_case("LINESTRING") {
        Some("MULTILINESTRING")
    } else if type_token.eq_ignore_ascii_case("POLYGON") {
        Some("MULTIPOLYGON")
    } else {
        None
    }
}

/// Whether a geometry must be promoted to its collection equivalent before
/// being stored in a column of the given declared type.
///
/// Promotion applies only when the declared type is a MULTI-type, the
/// declared type is not the generic GEOMETRY catch-all, and the incoming
/// geometry is not already a collection.
pub fn needs_collection_promotion(declared_type: &str, wkt: &str) -> bool {
    if declared_type.eq_ignore_ascii_case("GEOMETRY") || !is_multi(declared_type) {
        return false;
    }
    match geometry_type(wkt) {
        Some(token) => !is_multi(token),
        None => false,
    }
}

/// Whether geometry input is unusable and must be replaced with the empty
/// placeholder. Covers NaN/Infinity coordinates emitted by broken clients
/// and strings with no leading type token.
pub fn is_degenerate(wkt: &str) -> bool {
    if geometry_type(wkt).is_none() {
        return true;
    }
    let upper = strip_srid(wkt).to_ascii_uppercase();
    upper.contains("NAN") || upper.contains("INF")
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

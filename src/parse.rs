//! Parsers for the DWM1001 shell's text responses.
//!
//! Each grammar is a pure function over the lines returned by the command
//! channel, so every one of them can be exercised without a device. Parsers
//! return [`ParseError`] naming the missing field together with the raw text,
//! except [`parse_stream_position`], for which a non-matching line is the normal
//! case and yields `None`.
//!
//! Two position representations exist on the wire and are kept apart:
//! [`AbsolutePosition`] (integer millimetres, `aps`/`apg`) and [`Point3`]
//! (float metres, `la`, `DIST` and `POS` records).

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::errors::ParseError;

/// Prompt printed by the shell when it is ready for the next command.
pub const PROMPT: &str = "dwm>";

/// Line printed by the shell in reply to `quit`.
pub const FAREWELL: &str = "bye!";

static MODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"mode:\s*(\S+)").expect("valid regex"));
static PANID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"panid=x(\S+)").expect("valid regex"));
static ADDR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"addr=x(\S+)").expect("valid regex"));
static POS_X_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)x:(\S+)").expect("valid regex"));
static POS_Y_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)y:(\S+)").expect("valid regex"));
static POS_Z_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)z:(\S+)").expect("valid regex"));
static ANCHOR_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bid=(\S+)").expect("valid regex"));
static SEAT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bseat=(\S+)").expect("valid regex"));
static SEENS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bseens=(\S+)").expect("valid regex"));
static MAP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bmap=(\S+)").expect("valid regex"));
static ANCHOR_POS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bpos=(\S+)").expect("valid regex"));
static STREAM_POS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|,)POS,([^,\s]+),([^,\s]+),([^,\s]+)(?:,|$)").expect("valid regex")
});

// ============================================================================
// Data Types
// ============================================================================

/// Operating mode of the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Tag,
    TagListener,
    Anchor,
    AnchorInitiator,
    Unknown,
}

impl Mode {
    /// Shell command that switches the module into this mode.
    pub fn command(self) -> Option<&'static str> {
        match self {
            Mode::AnchorInitiator => Some("nmi"),
            Mode::Anchor => Some("nma"),
            Mode::Tag => Some("nmt"),
            Mode::TagListener => Some("nmp"),
            Mode::Unknown => None,
        }
    }

    /// Interpret the token the shell prints after `mode:`.
    pub fn from_device_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "tn" | "tag" => Mode::Tag,
            "tnl" | "tl" | "ln" | "pn" | "listener" => Mode::TagListener,
            "an" | "anchor" => Mode::Anchor,
            "ani" | "initiator" => Mode::AnchorInitiator,
            _ => Mode::Unknown,
        }
    }

    /// Token printed by the shell for this mode.
    pub fn device_token(self) -> &'static str {
        match self {
            Mode::Tag => "tn",
            Mode::TagListener => "ln",
            Mode::Anchor => "an",
            Mode::AnchorInitiator => "ani",
            Mode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Tag => "tag",
            Mode::TagListener => "tag_listener",
            Mode::Anchor => "anchor",
            Mode::AnchorInitiator => "anchor_initiator",
            Mode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Accepts the symbolic names used on the command line: `tag`, `listener`
/// (or `tag_listener`), `anchor`, `anchor_initiator` (or `initiator`).
impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "tag" => Ok(Mode::Tag),
            "listener" | "tag_listener" => Ok(Mode::TagListener),
            "anchor" => Ok(Mode::Anchor),
            "anchor_initiator" | "initiator" => Ok(Mode::AnchorInitiator),
            other => Err(format!(
                "unknown mode {other:?}; expected tag, listener, anchor or anchor_initiator"
            )),
        }
    }
}

/// Identity block reported by `si`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub mode: Mode,
    /// Token exactly as printed after `mode:`.
    pub mode_token: String,
    /// PAN id formatted as `0x....`.
    pub network_id: String,
    /// Node address formatted as `0x....`.
    pub address: String,
}

/// Configured position in integer millimetres (`aps` / `apg`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct AbsolutePosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl AbsolutePosition {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Convert metres to millimetres, truncating toward zero.
    ///
    /// Returns `None` if a coordinate is not finite or its millimetre value
    /// does not fit in an `i32`.
    pub fn from_metres(x: f64, y: f64, z: f64) -> Option<Self> {
        Some(Self {
            x: metres_to_mm(x)?,
            y: metres_to_mm(y)?,
            z: metres_to_mm(z)?,
        })
    }
}

fn metres_to_mm(metres: f64) -> Option<i32> {
    let mm = (metres * 1000.0).trunc();
    if mm.is_finite() && mm >= f64::from(i32::MIN) && mm <= f64::from(i32::MAX) {
        Some(mm as i32)
    } else {
        None
    }
}

impl fmt::Display for AbsolutePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} mm, {} mm, {} mm)", self.x, self.y, self.z)
    }
}

/// A point in metres, as reported by `la` and the streamed records.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Point3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// One entry of the `la` listing, in device seat order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anchor {
    pub id: String,
    pub seat: u32,
    pub seen_count: Option<u32>,
    pub map_id: Option<String>,
    pub position: Option<Point3>,
}

/// One ranging result inside a `DIST` record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorDistance {
    pub anchor_id: String,
    /// `None` when the anchor reports empty coordinate fields.
    pub position: Option<Point3>,
    /// Distance in metres.
    pub distance: f64,
}

/// A full `DIST` record: ranges to each anchor and the tag's own estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceMeasurement {
    pub anchors: Vec<AnchorDistance>,
    /// Present only once the tag has a location fix.
    pub position: Option<Point3>,
    /// Quality factor (0-100) following the `POS` triple, when printed.
    pub quality: Option<u8>,
}

// ============================================================================
// Parsers
// ============================================================================

fn joined(lines: &[String]) -> String {
    lines.join(" ")
}

fn capture<'a>(re: &Regex, text: &'a str, expected: &str) -> Result<&'a str, ParseError> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| ParseError::new(expected, text))
}

fn number<T: FromStr>(token: &str, expected: &str, raw: &str) -> Result<T, ParseError> {
    token
        .trim()
        .parse::<T>()
        .map_err(|_| ParseError::new(expected, raw))
}

/// Whether any response line carries the prompt marker.
pub fn has_prompt(lines: &[String]) -> bool {
    lines.iter().any(|l| l.contains(PROMPT))
}

/// Parse the `si` block into mode, PAN id and address.
pub fn parse_system_info(lines: &[String]) -> Result<DeviceIdentity, ParseError> {
    let text = joined(lines);
    let mode_token = capture(&MODE_RE, &text, "mode")?;
    let panid = capture(&PANID_RE, &text, "panid")?;
    let addr = capture(&ADDR_RE, &text, "addr")?;
    Ok(DeviceIdentity {
        mode: Mode::from_device_token(mode_token),
        mode_token: mode_token.to_string(),
        network_id: format!("0x{panid}"),
        address: format!("0x{addr}"),
    })
}

/// Parse the `mode:` token out of an `nmg` (or `si`) response.
pub fn parse_mode(lines: &[String]) -> Result<Mode, ParseError> {
    let text = joined(lines);
    capture(&MODE_RE, &text, "mode").map(Mode::from_device_token)
}

/// Parse the `apg` reply `x:<mm> y:<mm> z:<mm> qf:<q>`.
pub fn parse_position(lines: &[String]) -> Result<AbsolutePosition, ParseError> {
    let text = joined(lines);
    let x = number(capture(&POS_X_RE, &text, "x")?, "x", &text)?;
    let y = number(capture(&POS_Y_RE, &text, "y")?, "y", &text)?;
    let z = number(capture(&POS_Z_RE, &text, "z")?, "z", &text)?;
    Ok(AbsolutePosition { x, y, z })
}

/// Parse a framed `la` response.
///
/// The frame must start with the echoed `la` and end with the prompt, or the
/// read is considered desynchronized and nothing is returned. Interior lines
/// without an `id=` token (the count header, blank log prefixes) are skipped.
pub fn parse_anchor_list(lines: &[String]) -> Result<Vec<Anchor>, ParseError> {
    let raw = lines.join("\n");
    match lines.first() {
        Some(first) if first.trim() == "la" => {}
        _ => return Err(ParseError::new("echoed `la` command", raw)),
    }
    match lines.last() {
        Some(last) if lines.len() > 1 && last.trim() == PROMPT => {}
        _ => return Err(ParseError::new("trailing `dwm>` prompt", raw)),
    }

    lines[1..lines.len() - 1]
        .iter()
        .filter(|line| ANCHOR_ID_RE.is_match(line))
        .map(|line| parse_anchor_line(line))
        .collect()
}

fn parse_anchor_line(line: &str) -> Result<Anchor, ParseError> {
    let id = capture(&ANCHOR_ID_RE, line, "id")?.to_string();
    let seat = number(capture(&SEAT_RE, line, "seat")?, "seat", line)?;
    let seen_count = match SEENS_RE.captures(line).and_then(|c| c.get(1)) {
        Some(m) => Some(number(m.as_str(), "seens", line)?),
        None => None,
    };
    let map_id = MAP_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let position = match ANCHOR_POS_RE.captures(line).and_then(|c| c.get(1)) {
        Some(m) => Some(colon_triple(m.as_str(), line)?),
        None => None,
    };
    Ok(Anchor {
        id,
        seat,
        seen_count,
        map_id,
        position,
    })
}

fn colon_triple(token: &str, line: &str) -> Result<Point3, ParseError> {
    let parts: Vec<&str> = token.split(':').collect();
    if parts.len() != 3 {
        return Err(ParseError::new("pos=x:y:z", line));
    }
    Ok(Point3 {
        x: number(parts[0], "pos x", line)?,
        y: number(parts[1], "pos y", line)?,
        z: number(parts[2], "pos z", line)?,
    })
}

/// Anchor group size in a `DIST` record: `AN<i>,<id>,<x>,<y>,<z>,<dist>`.
const ANCHOR_FIELDS: usize = 6;

/// Parse one `DIST,<n>,AN0,<id>,<x>,<y>,<z>,<dist>,...[,POS,<x>,<y>,<z>[,<qf>]]`
/// record.
pub fn parse_distance_record(line: &str) -> Result<DistanceMeasurement, ParseError> {
    let line = line.trim();
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.first() != Some(&"DIST") || fields.len() < 2 {
        return Err(ParseError::new("DIST header", line));
    }

    let mut anchors = Vec::new();
    let mut i = 2;
    while i < fields.len() && fields[i].starts_with("AN") {
        let group = fields
            .get(i..i + ANCHOR_FIELDS)
            .ok_or_else(|| ParseError::new(format!("six fields for {}", fields[i]), line))?;
        anchors.push(AnchorDistance {
            anchor_id: group[1].to_string(),
            position: optional_triple(&group[2..5], line)?,
            distance: number(group[5], "anchor distance", line)?,
        });
        i += ANCHOR_FIELDS;
    }

    let (position, quality) = match fields.get(i) {
        None => (None, None),
        Some(&"POS") => {
            let triple = fields
                .get(i + 1..i + 4)
                .ok_or_else(|| ParseError::new("three POS coordinates", line))?;
            let point = Point3 {
                x: number(triple[0], "POS x", line)?,
                y: number(triple[1], "POS y", line)?,
                z: number(triple[2], "POS z", line)?,
            };
            let quality = match fields.get(i + 4) {
                Some(qf) => Some(number(qf, "POS quality", line)?),
                None => None,
            };
            (Some(point), quality)
        }
        Some(_) => return Err(ParseError::new("POS block", line)),
    };

    Ok(DistanceMeasurement {
        anchors,
        position,
        quality,
    })
}

fn optional_triple(fields: &[&str], line: &str) -> Result<Option<Point3>, ParseError> {
    if fields.iter().all(|f| f.is_empty()) {
        return Ok(None);
    }
    Ok(Some(Point3 {
        x: number(fields[0], "anchor x", line)?,
        y: number(fields[1], "anchor y", line)?,
        z: number(fields[2], "anchor z", line)?,
    }))
}

/// Find a `POS,<x>,<y>,<z>` segment in a streamed line.
pub fn parse_stream_position(line: &str) -> Option<Point3> {
    let caps = STREAM_POS_RE.captures(line.trim())?;
    let x = caps.get(1)?.as_str().parse().ok()?;
    let y = caps.get(2)?.as_str().parse().ok()?;
    let z = caps.get(3)?.as_str().parse().ok()?;
    Some(Point3 { x, y, z })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn system_info_recovers_identity() {
        let response = lines(&[
            "si",
            "[000014.560 INF] sys: fw2 fw_ver=x01030001 cfg_ver=x00010700",
            "[000014.560 INF] uwb0: panid=x1234 addr=xDECA3C2A9A4B8E45",
            "[000014.570 INF] mode: tn (act,twr,np,nole)",
            "[000014.570 INF] uwbmac: connected prov",
            "dwm>",
        ]);
        let identity = parse_system_info(&response).unwrap();
        assert_eq!(identity.mode, Mode::Tag);
        assert_eq!(identity.mode_token, "tn");
        assert_eq!(identity.network_id, "0x1234");
        assert_eq!(identity.address, "0xDECA3C2A9A4B8E45");
    }

    #[test]
    fn system_info_ignores_whitespace_and_ordering() {
        let response = lines(&["   addr=xBEEF   ", "junk", "mode:    ani", "panid=xCAFE  "]);
        let identity = parse_system_info(&response).unwrap();
        assert_eq!(identity.mode, Mode::AnchorInitiator);
        assert_eq!(identity.network_id, "0xCAFE");
        assert_eq!(identity.address, "0xBEEF");
    }

    #[test]
    fn system_info_names_the_missing_field() {
        let err = parse_system_info(&lines(&["mode: an", "addr=x0001", "dwm>"])).unwrap_err();
        assert_eq!(err.expected, "panid");
        assert!(err.raw.contains("addr=x0001"));
    }

    #[test]
    fn position_is_read_in_millimetres() {
        let response = lines(&["apg", "x:1234 y:0 z:-2000 qf:100", "dwm>"]);
        assert_eq!(
            parse_position(&response).unwrap(),
            AbsolutePosition::new(1234, 0, -2000)
        );
        let err = parse_position(&lines(&["apg", "x:1.5 y:0 z:0", "dwm>"])).unwrap_err();
        assert_eq!(err.expected, "x");
        assert!(parse_position(&lines(&["dwm>"])).is_err());
    }

    #[test]
    fn metres_truncate_to_millimetres() {
        assert_eq!(
            AbsolutePosition::from_metres(1.2345, 0.0, 2.0),
            Some(AbsolutePosition::new(1234, 0, 2000))
        );
        assert_eq!(
            AbsolutePosition::from_metres(-0.0019, 0.9999, 0.001),
            Some(AbsolutePosition::new(-1, 999, 1))
        );
    }

    #[test]
    fn metres_outside_i32_millimetres_are_rejected() {
        assert_eq!(AbsolutePosition::from_metres(3_000_000.0, 0.0, 0.0), None);
        assert_eq!(AbsolutePosition::from_metres(0.0, 0.0, -3_000_000.0), None);
        assert_eq!(AbsolutePosition::from_metres(f64::NAN, 0.0, 0.0), None);
        assert_eq!(AbsolutePosition::from_metres(0.0, f64::INFINITY, 0.0), None);
        assert_eq!(
            AbsolutePosition::from_metres(2_147_483.647, -2_147_483.648, 0.0),
            Some(AbsolutePosition::new(i32::MAX, i32::MIN, 0))
        );
    }

    #[test]
    fn anchor_list_in_seat_order() {
        let response = lines(&[
            "la",
            "[000576.040 INF] AN: cnt=2 seq=x03",
            "[000576.040 INF]    0) id=000000000000150E seat=0 seens=216 map=0000 pos=0.00:0.00:0.00",
            "[000576.040 INF]    1) id=000000000000DD34 seat=1 seens=97 map=0000 pos=2.24:0.00:0.00",
            "[000576.040 INF]",
            "dwm>",
        ]);
        let anchors = parse_anchor_list(&response).unwrap();
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0].id, "000000000000150E");
        assert_eq!(anchors[0].seat, 0);
        assert_eq!(anchors[0].seen_count, Some(216));
        assert_eq!(anchors[0].map_id.as_deref(), Some("0000"));
        assert_eq!(anchors[1].id, "000000000000DD34");
        assert_eq!(anchors[1].position, Some(Point3::new(2.24, 0.0, 0.0)));
    }

    #[test]
    fn anchor_list_rejects_desynchronized_frames() {
        let body = "[000576.040 INF]    0) id=150E seat=0 seens=1 map=0000 pos=0.00:0.00:0.00";

        let no_echo = lines(&["si", body, "dwm>"]);
        assert_eq!(
            parse_anchor_list(&no_echo).unwrap_err().expected,
            "echoed `la` command"
        );

        let no_prompt = lines(&["la", body]);
        assert_eq!(
            parse_anchor_list(&no_prompt).unwrap_err().expected,
            "trailing `dwm>` prompt"
        );

        assert!(parse_anchor_list(&[]).is_err());
        assert!(parse_anchor_list(&lines(&["la"])).is_err());
    }

    #[test]
    fn empty_anchor_list_is_valid() {
        let anchors = parse_anchor_list(&lines(&["la", "[000001.000 INF] AN: cnt=0 seq=x00", "dwm>"]));
        assert_eq!(anchors.unwrap(), Vec::new());
    }

    #[test]
    fn anchor_line_with_bad_seat_fails() {
        let response = lines(&["la", "id=150E seat=zero pos=0:0:0", "dwm>"]);
        assert_eq!(parse_anchor_list(&response).unwrap_err().expected, "seat");
    }

    #[test]
    fn distance_record_without_position() {
        let record = parse_distance_record(
            "DIST,2,AN0,150E,0.00,0.00,0.00,1.85,AN1,DD34,2.24,0.00,0.00,1.79",
        )
        .unwrap();
        assert_eq!(record.anchors.len(), 2);
        assert_eq!(record.anchors[0].anchor_id, "150E");
        assert_eq!(record.anchors[0].distance, 1.85);
        assert_eq!(record.anchors[1].anchor_id, "DD34");
        assert_eq!(record.anchors[1].position, Some(Point3::new(2.24, 0.0, 0.0)));
        assert_eq!(record.anchors[1].distance, 1.79);
        assert_eq!(record.position, None);
        assert_eq!(record.quality, None);
    }

    #[test]
    fn distance_record_with_position() {
        let record = parse_distance_record(
            "DIST,2,AN0,150E,0.00,0.00,0.00,1.85,AN1,DD34,2.24,0.00,0.00,1.79,POS,1.10,2.20,0.00",
        )
        .unwrap();
        assert_eq!(record.anchors.len(), 2);
        assert_eq!(record.position, Some(Point3::new(1.10, 2.20, 0.00)));

        let with_quality =
            parse_distance_record("DIST,1,AN0,150E,0.00,0.00,0.00,1.85,POS,1.51,1.42,0.80,52\r")
                .unwrap();
        assert_eq!(with_quality.position, Some(Point3::new(1.51, 1.42, 0.80)));
        assert_eq!(with_quality.quality, Some(52));
    }

    #[test]
    fn distance_record_anchor_without_coordinates() {
        let record = parse_distance_record("DIST,1,AN0,150E,,,,3.02").unwrap();
        assert_eq!(record.anchors[0].position, None);
        assert_eq!(record.anchors[0].distance, 3.02);
    }

    #[test]
    fn malformed_distance_records_fail() {
        assert!(parse_distance_record("POS,1.0,2.0,3.0").is_err());
        // Truncated anchor group.
        assert!(parse_distance_record("DIST,1,AN0,150E,0.00,0.00").is_err());
        assert!(parse_distance_record("DIST,1,AN0,150E,0.00,0.00,0.00,far").is_err());
        assert!(parse_distance_record("DIST,1,AN0,150E,0.00,0.00,0.00,1.0,XYZ").is_err());
        assert!(parse_distance_record("DIST,1,AN0,150E,0.00,0.00,0.00,1.0,POS,1.0").is_err());
    }

    #[test]
    fn stream_position_matches_pos_segment() {
        assert_eq!(
            parse_stream_position("DIST,1,AN0,150E,0.00,0.00,0.00,1.85,POS,3.0,4.0,0.5,61"),
            Some(Point3::new(3.0, 4.0, 0.5))
        );
        assert_eq!(
            parse_stream_position("POS,-1.25,0.00,2.5"),
            Some(Point3::new(-1.25, 0.0, 2.5))
        );
    }

    #[test]
    fn stream_position_skips_other_lines() {
        assert_eq!(parse_stream_position("DIST,2,AN0,150E,0.00,0.00,0.00,1.85"), None);
        assert_eq!(parse_stream_position("dwm>"), None);
        assert_eq!(parse_stream_position(""), None);
        assert_eq!(parse_stream_position("POS,1.0,2.0"), None);
        assert_eq!(parse_stream_position("POS,1.0,abc,2.0,"), None);
        assert_eq!(parse_stream_position("XPOS,1.0,2.0,3.0,"), None);
    }

    #[test]
    fn mode_names_round_trip_through_commands() {
        assert_eq!("tag".parse::<Mode>().unwrap().command(), Some("nmt"));
        assert_eq!("listener".parse::<Mode>().unwrap().command(), Some("nmp"));
        assert_eq!("anchor".parse::<Mode>().unwrap().command(), Some("nma"));
        assert_eq!("anchor-initiator".parse::<Mode>().unwrap().command(), Some("nmi"));
        assert!("router".parse::<Mode>().is_err());
        assert_eq!(Mode::Unknown.command(), None);
        assert_eq!(Mode::from_device_token("xx"), Mode::Unknown);
        for mode in [Mode::Tag, Mode::TagListener, Mode::Anchor, Mode::AnchorInitiator] {
            assert_eq!(Mode::from_device_token(mode.device_token()), mode);
        }
    }

    #[test]
    fn nmg_reply_yields_mode() {
        let response = lines(&["nmg", "mode: an (act,-,-)", "dwm>"]);
        assert_eq!(parse_mode(&response).unwrap(), Mode::Anchor);
        assert!(has_prompt(&response));
        assert!(parse_mode(&lines(&["nmg"])).is_err());
    }
}

// ── Sector creation ──
//
// Turns the detections of a terminal `setupDetect` into verify-sector
// definitions the node accepts through add-sector.

use labelval_api::events::SetupDetect;
use labelval_api::models::Symbology;
use serde::Serialize;

const REGION_1D: &str = "verify1D";
const REGION_2D: &str = "verify2D";

/// Grading-standard block of a verify sector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingStandard {
    pub enabled: bool,
    pub standard: String,
    pub table_id: String,
}

impl GradingStandard {
    /// GS1 standards enable grading with the table number taken from the
    /// standard's name (`"GS1 Table 3"` → `"3"`). Anything else leaves the
    /// block disabled on table `"1"`.
    pub fn for_standard(grading_standard: &str) -> Self {
        let is_gs1 = grading_standard
            .get(..3)
            .is_some_and(|p| p.eq_ignore_ascii_case("GS1"));
        let table_id = if is_gs1 {
            // Skip the "1" of the "GS1" prefix itself.
            first_number(&grading_standard[3..]).unwrap_or("1")
        } else {
            "1"
        };
        Self {
            enabled: is_gs1,
            standard: "GS1".to_owned(),
            table_id: table_id.to_owned(),
        }
    }
}

fn first_number(s: &str) -> Option<&str> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let rest = &s[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

/// A verify-sector definition as the node's add-sector command expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySector {
    pub name: String,
    pub username: String,
    #[serde(rename = "type")]
    pub sector_type: String,
    pub symbology: String,
    pub top: i32,
    pub left: i32,
    pub height: i32,
    pub width: i32,
    pub orientation: i32,
    pub grading_standard: GradingStandard,
}

impl VerifySector {
    /// JSON body for add-sector.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Build verify sectors for every detection whose symbology the node
/// knows. 1D and 2D sectors are numbered independently.
pub fn create_sectors(
    detect: &SetupDetect,
    grading_standard: &str,
    symbologies: &[Symbology],
) -> Vec<VerifySector> {
    let grading = GradingStandard::for_standard(grading_standard);
    let (mut count_1d, mut count_2d) = (0u32, 0u32);

    detect
        .detections
        .iter()
        .filter_map(|d| {
            let Some(sym) = symbologies.iter().find(|s| s.symbology == d.symbology) else {
                tracing::debug!(symbology = %d.symbology, "skipping detection with unknown symbology");
                return None;
            };

            let counter = match sym.region_type.as_str() {
                REGION_1D => &mut count_1d,
                REGION_2D => &mut count_2d,
                other => {
                    tracing::debug!(region_type = other, "skipping unsupported region type");
                    return None;
                }
            };
            *counter += 1;

            let name = format!("{}_{}", sym.region_type, counter);
            Some(VerifySector {
                username: capitalize(&name),
                name,
                sector_type: sym.region_type.clone(),
                symbology: d.symbology.clone(),
                top: d.region.y,
                left: d.region.x,
                height: d.region.height,
                width: d.region.width,
                orientation: d.orientation,
                grading_standard: grading.clone(),
            })
        })
        .collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

//! IFC STEP (ISO 10303-21) scanning
//!
//! Just enough of the physical file format to build an element inventory:
//! entity instances `#id=TYPE(args);`, building storeys and spatial
//! containment relations. Geometry is not read.

use crate::models::{BuildingElement, ConstructionPhase};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Building element type with its takeoff description and default phase
#[derive(Debug, Clone, Copy)]
pub struct ElementType {
    pub ifc_type: &'static str,
    pub description: &'static str,
    pub phase: ConstructionPhase,
}

const fn element(
    ifc_type: &'static str,
    description: &'static str,
    phase: ConstructionPhase,
) -> ElementType {
    ElementType {
        ifc_type,
        description,
        phase,
    }
}

/// Recognised building element entities, in takeoff order
pub const ELEMENT_TYPES: &[ElementType] = &[
    element("IFCFOOTING", "Footing", ConstructionPhase::Foundation),
    element("IFCPILE", "Pile", ConstructionPhase::Foundation),
    element("IFCCOLUMN", "Column", ConstructionPhase::Structure),
    element("IFCBEAM", "Beam", ConstructionPhase::Structure),
    element("IFCSLAB", "Slab", ConstructionPhase::Structure),
    element("IFCWALL", "Wall", ConstructionPhase::Structure),
    element("IFCWALLSTANDARDCASE", "Wall", ConstructionPhase::Structure),
    element("IFCMEMBER", "Structural member", ConstructionPhase::Structure),
    element("IFCSTAIR", "Stair", ConstructionPhase::Structure),
    element("IFCSTAIRFLIGHT", "Stair flight", ConstructionPhase::Structure),
    element("IFCRAMP", "Ramp", ConstructionPhase::Structure),
    element("IFCBUILDINGELEMENTPROXY", "Building element", ConstructionPhase::Structure),
    element("IFCROOF", "Roof", ConstructionPhase::Envelope),
    element("IFCCURTAINWALL", "Curtain wall", ConstructionPhase::Envelope),
    element("IFCPLATE", "Plate", ConstructionPhase::Envelope),
    element("IFCWINDOW", "Window", ConstructionPhase::Envelope),
    element("IFCDOOR", "Door", ConstructionPhase::Envelope),
    element("IFCPIPESEGMENT", "Pipe segment", ConstructionPhase::Services),
    element("IFCDUCTSEGMENT", "Duct segment", ConstructionPhase::Services),
    element("IFCCABLESEGMENT", "Cable segment", ConstructionPhase::Services),
    element("IFCFLOWSEGMENT", "Flow segment", ConstructionPhase::Services),
    element("IFCFLOWTERMINAL", "Flow terminal", ConstructionPhase::Services),
    element("IFCSANITARYTERMINAL", "Sanitary terminal", ConstructionPhase::Services),
    element("IFCLIGHTFIXTURE", "Light fixture", ConstructionPhase::Services),
    element("IFCCOVERING", "Covering", ConstructionPhase::Finishes),
    element("IFCRAILING", "Railing", ConstructionPhase::Finishes),
    element("IFCFURNISHINGELEMENT", "Furnishing", ConstructionPhase::Finishes),
    element("IFCFURNITURE", "Furniture", ConstructionPhase::Finishes),
    element("IFCGEOGRAPHICELEMENT", "Landscaping", ConstructionPhase::ExternalWorks),
    element("IFCCIVILELEMENT", "Civil works", ConstructionPhase::ExternalWorks),
];

pub fn element_type(ifc_type: &str) -> Option<&'static ElementType> {
    ELEMENT_TYPES.iter().find(|t| t.ifc_type == ifc_type)
}

/// Phase used by heuristic sequencing (unknown types count as structure)
pub fn phase_for(ifc_type: &str) -> ConstructionPhase {
    element_type(ifc_type)
        .map(|t| t.phase)
        .unwrap_or(ConstructionPhase::Structure)
}

fn entity_regex() -> &'static Regex {
    static ENTITY: OnceLock<Regex> = OnceLock::new();
    ENTITY.get_or_init(|| {
        // #12 = IFCWALL('guid', #2, 'Name', ...);
        Regex::new(r"(?s)#(\d+)\s*=\s*([A-Za-z0-9_]+)\s*\((.*?)\)\s*;").expect("valid regex")
    })
}

/// One entity instance
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: u64,
    /// Upper case
    pub ifc_type: String,
    pub args: Vec<String>,
}

/// Split a STEP argument list on top-level commas
pub fn split_args(args: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut chars = args.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if in_string => {
                // '' is an escaped quote
                if chars.peek() == Some(&'\'') {
                    current.push('\'');
                    current.push('\'');
                    chars.next();
                    continue;
                }
                in_string = false;
            }
            '\'' => in_string = true,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth = depth.saturating_sub(1),
            ',' if !in_string && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Value of a quoted string argument (`$` and `*` give `None`)
pub fn string_arg(arg: &str) -> Option<String> {
    let arg = arg.trim();
    if arg.len() >= 2 && arg.starts_with('\'') && arg.ends_with('\'') {
        let value = arg[1..arg.len() - 1].replace("''", "'");
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    } else {
        None
    }
}

/// Entity references (`#12`) in an argument, including inside lists
pub fn refs(arg: &str) -> Vec<u64> {
    arg.split(|c: char| c == ',' || c == '(' || c == ')')
        .filter_map(|part| part.trim().strip_prefix('#'))
        .filter_map(|id| id.parse().ok())
        .collect()
}

/// All entity instances in the text
pub fn scan_entities(text: &str) -> Vec<Entity> {
    entity_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let id = caps.get(1)?.as_str().parse().ok()?;
            Some(Entity {
                id,
                ifc_type: caps.get(2)?.as_str().to_ascii_uppercase(),
                args: split_args(caps.get(3)?.as_str()),
            })
        })
        .collect()
}

/// Whether the text looks like a STEP physical file
pub fn is_step_file(text: &str) -> bool {
    text.trim_start().starts_with("ISO-10303-21")
}

/// Building elements of one model file, storeys resolved through containment
///
/// Ids are the IFC GlobalId, or `<file>#<entity>` when the GlobalId is missing.
pub fn parse_elements(source_file: &str, text: &str) -> Vec<BuildingElement> {
    let entities = scan_entities(text);

    let storeys: HashMap<u64, String> = entities
        .iter()
        .filter(|e| e.ifc_type == "IFCBUILDINGSTOREY")
        .map(|e| {
            let name = e
                .args
                .get(2)
                .and_then(|a| string_arg(a))
                .unwrap_or_else(|| format!("Storey #{}", e.id));
            (e.id, name)
        })
        .collect();

    let mut storey_of: HashMap<u64, String> = HashMap::new();
    for rel in entities
        .iter()
        .filter(|e| e.ifc_type == "IFCRELCONTAINEDINSPATIALSTRUCTURE")
    {
        let structure = rel.args.get(5).map(|a| refs(a)).unwrap_or_default();
        let Some(storey) = structure.first().and_then(|id| storeys.get(id)) else {
            continue;
        };
        for element in rel.args.get(4).map(|a| refs(a)).unwrap_or_default() {
            storey_of.entry(element).or_insert_with(|| storey.clone());
        }
    }

    let mut seen = HashSet::new();
    entities
        .iter()
        .filter(|e| element_type(&e.ifc_type).is_some())
        .filter_map(|e| {
            let id = e
                .args
                .first()
                .and_then(|a| string_arg(a))
                .unwrap_or_else(|| format!("{}#{}", source_file, e.id));
            if !seen.insert(id.clone()) {
                return None;
            }
            Some(BuildingElement {
                id,
                ifc_type: e.ifc_type.clone(),
                name: e.args.get(2).and_then(|a| string_arg(a)),
                storey: storey_of.get(&e.id).cloned(),
                source_file: source_file.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = "ISO-10303-21;
HEADER;
FILE_NAME('tower.ifc','2024-01-01',(''),(''),'','','');
ENDSEC;
DATA;
#1=IFCPROJECT('0proj',$,'Tower',$,$,$,$,$,$);
#50=IFCBUILDINGSTOREY('0lvl1',#2,'Level 1',$,$,$,$,$,.ELEMENT.,0.);
#51=IFCBUILDINGSTOREY('0lvl2',#2,'Level 2',$,$,$,$,$,.ELEMENT.,3000.);
#100=IFCFOOTING('1foot',#2,'Pad footing',$,$,#10,#11,$,.PAD_FOOTING.);
#101=IFCWALL('1wall',#2,'Basic Wall:Exterior',$,$,#10,#11,$,$);
#102=IFCSLAB('1slab',#2,'Floor, ''type'' 200',$,$,#10,#11,$,.FLOOR.);
#103=IFCCOLUMN($,#2,$,$,$,#10,#11,$,$);
#104=IFCWINDOW('1win',#2,'Window',$,$,#10,
  #11,$,1200.,900.,$,$,$);
#200=IFCRELCONTAINEDINSPATIALSTRUCTURE('rel1',#2,$,$,(#100,#101),#50);
#201=IFCRELCONTAINEDINSPATIALSTRUCTURE('rel2',#2,$,$,(#102,#104),#51);
ENDSEC;
END-ISO-10303-21;
";

    #[test]
    fn test_split_args_respects_strings_and_lists() {
        let args = split_args("'a,b',#2,(#3,#4),'it''s',$");
        assert_eq!(args, vec!["'a,b'", "#2", "(#3,#4)", "'it''s'", "$"]);
        assert_eq!(string_arg("'it''s'"), Some("it's".to_string()));
        assert_eq!(string_arg("$"), None);
        assert_eq!(refs("(#3, #4)"), vec![3, 4]);
    }

    #[test]
    fn test_parse_sample_model() {
        assert!(is_step_file(SAMPLE));
        let elements = parse_elements("tower.ifc", SAMPLE);
        let ids: Vec<&str> = elements.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1foot", "1wall", "1slab", "tower.ifc#103", "1win"]);

        assert_eq!(elements[0].storey.as_deref(), Some("Level 1"));
        assert_eq!(elements[2].storey.as_deref(), Some("Level 2"));
        assert_eq!(elements[2].name.as_deref(), Some("Floor, 'type' 200"));
        assert_eq!(elements[3].storey, None);
        assert_eq!(elements[3].name, None);
        // Entity spanning two lines
        assert_eq!(elements[4].ifc_type, "IFCWINDOW");
        assert_eq!(elements[4].storey.as_deref(), Some("Level 2"));
    }

    #[test]
    fn test_phase_lookup() {
        assert_eq!(phase_for("IFCPILE"), ConstructionPhase::Foundation);
        assert_eq!(phase_for("IFCUNKNOWN"), ConstructionPhase::Structure);
    }
}

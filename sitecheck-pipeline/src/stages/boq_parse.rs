//! `boq_parse`: bill of quantities from CSV/TSV files
//!
//! With no usable tabular rows the bill is derived from the quantity takeoff.

use super::{Stage, StageInput, StageOutput};
use crate::models::artifacts::{BillOfQuantities, BoqSource};
use crate::models::{Artifact, BoqItem, ProjectRecord, StageId};
use anyhow::Context;
use async_trait::async_trait;

/// Split one delimited line, honouring double quotes (`""` escapes a quote)
pub fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Column positions of a bill
#[derive(Debug, Clone, Copy, PartialEq)]
struct Columns {
    code: usize,
    description: usize,
    unit: usize,
    quantity: usize,
    unit_price: Option<usize>,
}

impl Columns {
    const POSITIONAL: Columns = Columns {
        code: 0,
        description: 1,
        unit: 2,
        quantity: 3,
        unit_price: Some(4),
    };

    /// Map a header row; `None` when the row is data
    fn from_header(fields: &[String]) -> Option<Columns> {
        let find = |names: &[&str]| {
            fields.iter().position(|f| {
                let f = f.to_lowercase().replace([' ', '-'], "_");
                names.contains(&f.as_str())
            })
        };
        let code = find(&["code", "item", "ref", "item_code"]);
        let description = find(&["description", "desc", "item_description"]);
        let quantity = find(&["quantity", "qty", "qnty"]);
        if description.is_none() && quantity.is_none() {
            return None;
        }
        Some(Columns {
            code: code.unwrap_or(Self::POSITIONAL.code),
            description: description.unwrap_or(Self::POSITIONAL.description),
            unit: find(&["unit", "uom", "units"]).unwrap_or(Self::POSITIONAL.unit),
            quantity: quantity.unwrap_or(Self::POSITIONAL.quantity),
            unit_price: find(&["unit_price", "rate", "price", "unit_rate"]),
        })
    }
}

fn parse_number(field: &str) -> Option<f64> {
    let cleaned: String = field
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '€' | '$' | '£'))
        .collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Items of one file plus the number of rows that could not be read
pub fn parse_table(text: &str, delimiter: char) -> (Vec<BoqItem>, usize) {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty()).peekable();
    let mut columns = Columns::POSITIONAL;
    if let Some(first) = lines.peek() {
        if let Some(header) = Columns::from_header(&split_record(first, delimiter)) {
            columns = header;
            lines.next();
        }
    }

    let mut items = Vec::new();
    let mut skipped = 0;
    for line in lines {
        let fields = split_record(line, delimiter);
        let field = |i: usize| fields.get(i).map(String::as_str).unwrap_or("");

        let description = field(columns.description);
        let Some(quantity) = parse_number(field(columns.quantity)) else {
            skipped += 1;
            continue;
        };
        if description.is_empty() {
            skipped += 1;
            continue;
        }

        let code = match field(columns.code) {
            "" => format!("ITEM-{}", items.len() + 1),
            code => code.to_string(),
        };
        items.push(BoqItem {
            code,
            description: description.to_string(),
            unit: field(columns.unit).to_string(),
            quantity,
            unit_price: columns.unit_price.and_then(|i| parse_number(field(i))),
        });
    }
    (items, skipped)
}

/// One item per quantity line
pub fn derive_from_quantities(project: &ProjectRecord) -> Vec<BoqItem> {
    project
        .quantities
        .iter()
        .enumerate()
        .map(|(index, line)| BoqItem {
            code: format!("M{:03}", index + 1),
            description: line.description.clone(),
            unit: line.unit.clone(),
            quantity: line.quantity,
            unit_price: None,
        })
        .collect()
}

pub struct BoqParseStage;

#[async_trait]
impl Stage for BoqParseStage {
    fn id(&self) -> StageId {
        StageId::BoqParse
    }

    fn has_input(&self, input: &StageInput) -> bool {
        !input.files.tabular.is_empty() || !input.project.quantities.is_empty()
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        let mut project = (*input.project).clone();
        let mut output = StageOutput::new();
        let mut items = Vec::new();

        for file in input.files.tabular.iter() {
            let delimiter = match file.extension().as_str() {
                "csv" => ',',
                "tsv" => '\t',
                ext => {
                    output.warnings.push(format!(
                        "{}: .{} workbooks are not supported, export as CSV",
                        file.name, ext
                    ));
                    continue;
                }
            };

            let text = file
                .read_text()
                .await
                .with_context(|| format!("Failed to read {}", file.name))?;
            let (parsed, skipped) = parse_table(&text, delimiter);
            if skipped > 0 {
                output
                    .warnings
                    .push(format!("{}: {} rows could not be read", file.name, skipped));
            }
            tracing::debug!(file = %file.name, items = parsed.len(), skipped, "Bill parsed");
            items.extend(parsed);
        }

        let source = if items.is_empty() {
            items = derive_from_quantities(&project);
            BoqSource::DerivedFromModel
        } else {
            BoqSource::Tabular
        };
        tracing::info!(items = items.len(), ?source, "Bill of quantities ready");

        project.boq_items = items.clone();
        Ok(output
            .with_project(project)
            .with_artifact(Artifact::BillOfQuantities(BillOfQuantities { source, items })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use crate::models::{InputFile, QuantityLine};

    #[test]
    fn test_split_record_quotes() {
        assert_eq!(
            split_record(r#"A1,"Wall, ""heavy""",m2, 12.5"#, ','),
            vec!["A1", r#"Wall, "heavy""#, "m2", "12.5"]
        );
    }

    #[test]
    fn test_header_mapping_and_bad_rows() {
        let text = "Qty,Description,Unit,Code,Rate\n4,Pad footing,nr,F1,120\nx,Broken,nr,F2,\n2,Door,nr,,\n";
        let (items, skipped) = parse_table(text, ',');

        assert_eq!(skipped, 1);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].code, "F1");
        assert_eq!(items[0].quantity, 4.0);
        assert_eq!(items[0].unit_price, Some(120.0));
        assert_eq!(items[1].code, "ITEM-2");
        assert_eq!(items[1].unit_price, None);
    }

    #[test]
    fn test_positional_without_header() {
        let (items, skipped) = parse_table("C1\tColumn\tnr\t6\t1,200.50\n", '\t');
        assert_eq!(skipped, 0);
        assert_eq!(items[0].unit_price, Some(1200.5));
    }

    #[tokio::test]
    async fn test_derives_from_quantities_when_only_workbook() {
        let mut project = ProjectRecord::new("T");
        project.quantities.push(QuantityLine {
            ifc_type: "IFCWALL".into(),
            description: "Wall".into(),
            unit: "nr".into(),
            quantity: 3.0,
            element_ids: vec![],
        });
        let files = classify(&[InputFile::from_bytes("boq.xlsx", vec![0x50, 0x4b])]);
        let input = StageInput::detached(StageId::BoqParse, project, files);

        let output = BoqParseStage.run(input).await.unwrap();
        assert_eq!(output.warnings.len(), 1);
        match &output.artifacts[0] {
            Artifact::BillOfQuantities(bill) => {
                assert_eq!(bill.source, BoqSource::DerivedFromModel);
                assert_eq!(bill.items[0].code, "M001");
            }
            other => panic!("unexpected artifact {:?}", other.kind()),
        }
    }
}

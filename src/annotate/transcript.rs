//! Transcript rows
//!
//! A flat record per entry: directory name, page, the entity texts, then the
//! entity texts grouped by category.

use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::ocr::Entity;

pub const CSV_HEADER: &str =
    "filename,page,texte,title,person,activity,localisation,number,address_type";

/// Entity labels exported as columns, in column order
const CATEGORIES: [&str; 6] = ["TITRE", "PER", "ACT", "LOC", "CARDINAL", "FT"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptRow {
    pub filename: String,
    pub page: i64,
    pub text: String,
    /// One joined value per entry of `CATEGORIES`
    pub categories: [String; 6],
}

impl TranscriptRow {
    /// Row of an entry with entities
    pub fn from_entities(name: &str, page: i64, ents: &[Entity]) -> Self {
        let text = ents
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let categories = CATEGORIES.map(|label| {
            ents.iter()
                .filter(|e| e.label == label)
                .map(|e| e.text.as_str())
                .collect::<Vec<_>>()
                .join(" & ")
        });

        Self {
            filename: name.to_string(),
            page,
            text,
            categories,
        }
    }

    /// Row of an entry without entities, only its text
    pub fn from_text(name: &str, page: i64, text: &str) -> Self {
        Self {
            filename: name.to_string(),
            page,
            text: text.to_string(),
            categories: Default::default(),
        }
    }

    pub fn to_csv_line(&self) -> String {
        let mut fields = vec![self.filename.clone(), self.page.to_string(), quote(&self.text)];
        fields.extend(self.categories.iter().map(|c| quote(c)));
        fields.join(",")
    }
}

/// Double-quote non-empty fields, doubling inner quotes
fn quote(field: &str) -> String {
    if field.is_empty() {
        String::new()
    } else {
        format!("\"{}\"", field.replace('"', "\"\""))
    }
}

/// Write the header and every row
pub fn write_csv(path: &Path, rows: &[TranscriptRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }

    let mut content = String::from(CSV_HEADER);
    content.push('\n');
    for row in rows {
        content.push_str(&row.to_csv_line());
        content.push('\n');
    }
    std::fs::write(path, content).map_err(|e| PipelineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ent(label: &str, text: &str) -> Entity {
        Entity {
            label: label.to_string(),
            text: text.to_string(),
            span: None,
        }
    }

    #[test]
    fn test_row_from_entities() {
        let ents = vec![
            ent("PER", "Dupont"),
            ent("ACT", "boulanger"),
            ent("LOC", "rue de Paris"),
            ent("CARDINAL", "12"),
            ent("PER", "Durand"),
            ent("MISC", "veuve"),
        ];
        let row = TranscriptRow::from_entities("Bottin1850", 14, &ents);

        assert_eq!(row.text, "Dupont, boulanger, rue de Paris, 12, Durand, veuve");
        assert_eq!(row.categories[0], "");
        assert_eq!(row.categories[1], "Dupont & Durand");
        assert_eq!(row.categories[4], "12");
        assert_eq!(
            row.to_csv_line(),
            "Bottin1850,14,\"Dupont, boulanger, rue de Paris, 12, Durand, veuve\",,\"Dupont & Durand\",\"boulanger\",\"rue de Paris\",\"12\","
        );
    }

    #[test]
    fn test_row_from_text() {
        let row = TranscriptRow::from_text("Bottin1850", 3, "Voyez \"Dupont\"");
        assert_eq!(row.to_csv_line(), "Bottin1850,3,\"Voyez \"\"Dupont\"\"\",,,,,,");
    }

    #[test]
    fn test_write_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("txt/ark/p3.csv");
        let rows = vec![TranscriptRow::from_text("d", 3, "a")];

        write_csv(&path, &rows).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "d,3,\"a\",,,,,,");
    }
}

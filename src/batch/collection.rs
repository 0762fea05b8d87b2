//! Collection hierarchy
//!
//! Root collection, then one collection per catalog collection, then one
//! per series listing the directory manifests. Every level references its
//! children by id only.

use std::path::{Path, PathBuf};
use tracing::info;

use super::{Catalog, DirectoryRow};
use crate::config::AppConfig;
use crate::error::Result;
use crate::iiif::{self, lang, AgentRecord, Collection, CollectionItem, ExternalItem};

type Series<'a> = (&'a str, Vec<&'a DirectoryRow>);

/// Rows grouped by collection then series, in catalog order
fn group_rows<'a>(rows: &[&'a DirectoryRow]) -> Vec<(&'a str, Vec<Series<'a>>)> {
    let mut groups: Vec<(&str, Vec<Series>)> = Vec::new();
    for row in rows {
        let idx = match groups.iter().position(|(c, _)| *c == row.collection) {
            Some(idx) => idx,
            None => {
                groups.push((row.collection.as_str(), Vec::new()));
                groups.len() - 1
            }
        };
        let series = &mut groups[idx].1;
        match series.iter().position(|(s, _)| *s == row.series) {
            Some(pos) => series[pos].1.push(*row),
            None => series.push((row.series.as_str(), vec![*row])),
        }
    }
    groups
}

/// Write the whole hierarchy under `<output_root>/iiif_collection`.
///
/// Returns the written files, root first.
pub fn write_collections(catalog: &Catalog, config: &AppConfig) -> Result<Vec<PathBuf>> {
    let prefix = config.general.prefix();
    let base = config.provider.base.trim_end_matches('/');
    let language = &config.general.language;
    let out = catalog.paths.output_root.join("iiif_collection");

    let rows: Vec<&DirectoryRow> = catalog
        .selected()
        .into_iter()
        .filter(|row| row.ark().is_some())
        .collect();

    let mut root = Collection::new(
        format!("{}/iiif/manifest.json", prefix),
        lang(language, catalog.title.clone()),
    );
    root.behavior = vec!["individuals".to_string()];
    root.provider = vec![
        AgentRecord::from_agent(&config.provider.image_agent),
        AgentRecord::from_agent(&config.provider.project_agent),
    ];

    let mut documents: Vec<(PathBuf, Collection)> = Vec::new();
    for (collection_name, series_list) in group_rows(&rows) {
        let mut collection = Collection::new(
            format!("{}/iiif/{}/manifest.json", prefix, collection_name),
            lang(language, collection_name),
        );

        for (series_name, members) in series_list {
            let mut series = Collection::new(
                format!("{}/iiif/{}/{}/manifest.json", prefix, collection_name, series_name),
                lang(language, series_name),
            );
            series.items = members
                .iter()
                .filter_map(|row| manifest_ref(row, prefix, base, language))
                .collect();

            collection.items.push(series.as_item());
            documents.push((
                out.join(collection_name).join(series_name).join("manifest.json"),
                series,
            ));
        }

        root.items.push(collection.as_item());
        documents.push((out.join(collection_name).join("manifest.json"), collection));
    }
    documents.insert(0, (root_path(&catalog.paths.output_root), root));

    let mut written = Vec::with_capacity(documents.len());
    for (path, document) in documents {
        iiif::write_document(&path, &document)?;
        written.push(path);
    }
    info!("Wrote {} collection documents to {}", written.len(), out.display());
    Ok(written)
}

fn manifest_ref(row: &DirectoryRow, prefix: &str, base: &str, language: &str) -> Option<CollectionItem> {
    let ark = row.ark()?;
    Some(CollectionItem::Manifest {
        id: format!("{}/iiif/{}/manifest.json", prefix, ark),
        label: lang(language, row.code.clone()),
        thumbnail: vec![ExternalItem::image(
            format!("{}/{}/f{}.thumbnail", base, ark, row.start_view()),
            "image/jpeg",
        )],
    })
}

/// Path of the root collection document
pub fn root_path(output_root: &Path) -> PathBuf {
    output_root.join("iiif_collection").join("manifest.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    const CATALOG: &str = r#"
        [[directory]]
        code = "Bottin1_1820"
        url = "https://gallica.bnf.fr/ark:/12148/bpt6k1"
        diff = 2
        start_page = 10
        collection = "Bottin"
        series = "Almanach"

        [[directory]]
        code = "Bottin1_1821"
        url = "https://gallica.bnf.fr/ark:/12148/bpt6k2"
        collection = "Bottin"
        series = "Almanach"

        [[directory]]
        code = "Didot_1850"
        url = "https://gallica.bnf.fr/ark:/12148/bpt6k3"
        collection = "Didot"
        series = "Annuaire"

        [[directory]]
        code = "Unlisted"
        url = "https://example.org/none"
        collection = "Didot"
        series = "Annuaire"
    "#;

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_hierarchy() {
        let dir = TempDir::new().unwrap();
        let mut catalog: Catalog = toml::from_str(CATALOG).unwrap();
        catalog.paths.output_root = dir.path().to_path_buf();
        let config = AppConfig::default();

        let written = write_collections(&catalog, &config).unwrap();
        assert_eq!(written.len(), 5);
        assert_eq!(written[0], root_path(dir.path()));

        let root = read_json(&written[0]);
        assert_eq!(root["type"], "Collection");
        assert_eq!(root["label"]["fr"][0], "SoDUCo Directory Collection");
        assert_eq!(root["behavior"][0], "individuals");
        assert_eq!(root["provider"].as_array().unwrap().len(), 2);
        let items = root["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0]["id"],
            "https://directory.geohistoricaldata.org/iiif/Bottin/manifest.json"
        );
        assert!(items[0].get("items").is_none());

        let bottin = read_json(&dir.path().join("iiif_collection/Bottin/manifest.json"));
        assert_eq!(bottin["items"][0]["label"]["fr"][0], "Almanach");
        assert!(bottin.get("provider").is_none());

        let series = read_json(&dir.path().join("iiif_collection/Bottin/Almanach/manifest.json"));
        let manifests = series["items"].as_array().unwrap();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0]["type"], "Manifest");
        assert_eq!(
            manifests[0]["id"],
            "https://directory.geohistoricaldata.org/iiif/ark:/12148/bpt6k1/manifest.json"
        );
        assert_eq!(
            manifests[0]["thumbnail"][0]["id"],
            "https://gallica.bnf.fr/ark:/12148/bpt6k1/f12.thumbnail"
        );

        // rows without an ark are left out
        let didot = read_json(&dir.path().join("iiif_collection/Didot/Annuaire/manifest.json"));
        assert_eq!(didot["items"].as_array().unwrap().len(), 1);
    }
}

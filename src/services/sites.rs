use crate::error::Result;
use crate::types::SiteId;
use std::fs;
use std::path::Path;

/// Load site identifiers from a JSON side file: an array of objects, each
/// contributing its `id` field. Entries without one are skipped; numeric
/// IDs are accepted and stringified.
pub fn load_site_ids(path: &Path) -> Result<Vec<SiteId>> {
    let file = fs::File::open(path)?;
    let data: serde_json::Value = serde_json::from_reader(file)?;

    let mut out = Vec::new();
    if let Some(entries) = data.as_array() {
        for entry in entries {
            match entry.get("id") {
                Some(serde_json::Value::String(s)) => out.push(SiteId(s.clone())),
                Some(serde_json::Value::Number(n)) => out.push(SiteId(n.to_string())),
                _ => {}
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_ids_and_skips_entries_without_one() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("site_ids.json");
        std::fs::write(
            &path,
            r#"[{"id":"IMEI1","name":"Station 1"},{"name":"no id"},{"id":42}]"#,
        )
        .unwrap();

        let ids = load_site_ids(&path).unwrap();
        assert_eq!(
            ids,
            vec![SiteId("IMEI1".into()), SiteId("42".into())]
        );
    }

    #[test]
    fn non_array_json_yields_no_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("site_ids.json");
        std::fs::write(&path, r#"{"id":"IMEI1"}"#).unwrap();
        assert!(load_site_ids(&path).unwrap().is_empty());
    }
}

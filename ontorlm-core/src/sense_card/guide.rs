//! Authored-mode loading: `AGENT_GUIDE.md` next to the ontology source.

use super::SenseCardError;
use std::path::Path;

/// Load `AGENT_GUIDE.md` from the same directory as `ontology_source`, if it
/// exists. Contents are returned verbatim -- no truncation or reformatting.
pub fn load_agent_guide(ontology_source: &Path) -> Result<Option<String>, SenseCardError> {
    let dir = ontology_source.parent().unwrap_or_else(|| Path::new("."));
    let guide_path = dir.join("AGENT_GUIDE.md");

    if !guide_path.exists() {
        return Ok(None);
    }

    std::fs::read_to_string(&guide_path)
        .map(Some)
        .map_err(|source| SenseCardError::GuideRead {
            path: guide_path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_returns_none_when_missing() {
        let dir = TempDir::new().unwrap();
        let ontology_path = dir.path().join("ontology.ttl");
        std::fs::write(&ontology_path, "").unwrap();
        assert!(load_agent_guide(&ontology_path).unwrap().is_none());
    }

    #[test]
    fn test_loads_verbatim_when_present() {
        let dir = TempDir::new().unwrap();
        let ontology_path = dir.path().join("ontology.ttl");
        std::fs::write(&ontology_path, "").unwrap();
        let guide_content = "# Guide\n\nprefixes: ex:\n";
        std::fs::write(dir.path().join("AGENT_GUIDE.md"), guide_content).unwrap();

        let loaded = load_agent_guide(&ontology_path).unwrap().unwrap();
        assert_eq!(loaded, guide_content);
    }
}

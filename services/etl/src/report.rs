//! Country coverage report produced by check mode.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::info;

use crate::error::Result;
use crate::model::CountryRow;
use crate::resolver::CountryMatch;

pub const MISSING_FILE: &str = "missing_countries.txt";
pub const UNUSED_FILE: &str = "unused_countries.txt";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageReport {
    /// Source values that match a storage country by name.
    pub found: BTreeSet<String>,
    /// Source values resolved only through the alias table, with the alias
    /// names that matched.
    pub via_alias: BTreeMap<String, Vec<String>>,
    /// Source values with no match; candidates for the alias table.
    pub not_found: BTreeSet<String>,
    /// Storage countries no source value maps to, sorted by name.
    pub unused: Vec<CountryRow>,
}

/// Paths of the files written by [`CoverageReport::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    pub missing: PathBuf,
    pub unused: PathBuf,
}

impl CoverageReport {
    pub fn build(matches: &HashMap<String, CountryMatch>, countries: &[CountryRow]) -> Self {
        let mut report = CoverageReport::default();
        let mut used: HashSet<i32> = HashSet::new();

        for (name, matched) in matches {
            used.extend(matched.ids());
            if matched.direct.is_some() {
                report.found.insert(name.clone());
            } else if !matched.aliases.is_empty() {
                report.via_alias.insert(
                    name.clone(),
                    matched.aliases.iter().map(|(alias, _)| alias.clone()).collect(),
                );
            } else {
                report.not_found.insert(name.clone());
            }
        }

        report.unused = countries
            .iter()
            .filter(|c| !used.contains(&c.id))
            .cloned()
            .collect();
        report
            .unused
            .sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        report
    }

    pub fn source_values(&self) -> usize {
        self.found.len() + self.via_alias.len() + self.not_found.len()
    }

    /// Write `missing_countries.txt` and `unused_countries.txt` into `dir`.
    pub async fn write(&self, dir: &Path) -> Result<ReportFiles> {
        fs::create_dir_all(dir).await?;

        let missing = dir.join(MISSING_FILE);
        let mut text = String::new();
        for name in &self.not_found {
            text.push_str(name);
            text.push('\n');
        }
        fs::write(&missing, text).await?;

        let unused = dir.join(UNUSED_FILE);
        let mut text = String::new();
        for country in &self.unused {
            text.push_str(&format!("{} ({})\n", country.name, country.id));
        }
        fs::write(&unused, text).await?;

        Ok(ReportFiles { missing, unused })
    }

    pub fn log(&self) {
        for (name, aliases) in &self.via_alias {
            info!(country = %name, aliases = ?aliases, "matched through alias");
        }
        info!(
            source_values = self.source_values(),
            found = self.found.len(),
            via_alias = self.via_alias.len(),
            not_found = self.not_found.len(),
            unused = self.unused.len(),
            "country coverage"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn country(id: i32, name: &str) -> CountryRow {
        CountryRow {
            id,
            name: name.to_string(),
        }
    }

    fn sample() -> CoverageReport {
        let matches: HashMap<String, CountryMatch> = [
            (
                "Chile".to_string(),
                CountryMatch {
                    direct: Some(1),
                    aliases: Vec::new(),
                },
            ),
            (
                "Korea".to_string(),
                CountryMatch {
                    direct: None,
                    aliases: vec![("South Korea".to_string(), 2)],
                },
            ),
            ("Atlantis".to_string(), CountryMatch::default()),
            ("Narnia".to_string(), CountryMatch::default()),
        ]
        .into_iter()
        .collect();
        let countries = [
            country(1, "Chile"),
            country(2, "South Korea"),
            country(4, "Peru"),
            country(3, "Argentina"),
        ];
        CoverageReport::build(&matches, &countries)
    }

    #[test]
    fn test_classification() {
        let report = sample();
        assert!(report.found.contains("Chile"));
        assert_eq!(report.via_alias["Korea"], vec!["South Korea".to_string()]);
        assert_eq!(
            report.not_found.iter().collect::<Vec<_>>(),
            vec!["Atlantis", "Narnia"]
        );
        let unused: Vec<&str> = report.unused.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(unused, vec!["Argentina", "Peru"]);
        assert_eq!(report.source_values(), 4);
    }

    #[tokio::test]
    async fn test_write_report_files() {
        let dir = std::env::temp_dir().join(format!("etl-report-{}", uuid::Uuid::new_v4()));
        let files = sample().write(&dir).await.unwrap();

        let missing = std::fs::read_to_string(&files.missing).unwrap();
        assert_eq!(missing, "Atlantis\nNarnia\n");
        let unused = std::fs::read_to_string(&files.unused).unwrap();
        assert_eq!(unused, "Argentina (3)\nPeru (4)\n");

        std::fs::remove_dir_all(&dir).ok();
    }
}

//! Episode catalog types and loading.
//!
//! The catalog is a JSON document listing series, their seasons and the
//! candidate player URLs per episode, grouped by language tag. The
//! orchestrator only ever reads it.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Language tag assigned to legacy single-URL episodes that predate
/// per-language player lists. Callers that want those episodes picked up
/// should include it (typically last) in their language preferences.
pub const LEGACY_LANGUAGE: &str = "default";

/// Identity of one episode within the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeId {
    /// Series title as it appears in the catalog.
    pub series: String,
    /// Season label, e.g. "S01".
    pub season: String,
    /// Episode label, e.g. "E03".
    pub episode: String,
}

impl EpisodeId {
    pub fn new(
        series: impl Into<String>,
        season_number: u32,
        episode_number: u32,
    ) -> Self {
        Self {
            series: series.into(),
            season: format!("S{season_number:02}"),
            episode: format!("E{episode_number:02}"),
        }
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}", self.series, self.season, self.episode)
    }
}

/// One downloadable episode with its candidate sources grouped by language.
///
/// Immutable once loaded; the orchestrator never writes back to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    /// Language tag → candidate player URLs, in stored order.
    pub players: HashMap<String, Vec<String>>,
    /// Per-episode output template override.
    pub output_template: Option<String>,
}

impl Episode {
    /// Candidate URLs for a language tag, matched case-insensitively.
    pub fn players_for(&self, language: &str) -> Option<&[String]> {
        self.players
            .iter()
            .find(|(tag, _)| tag.eq_ignore_ascii_case(language))
            .map(|(_, urls)| urls.as_slice())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    anime: Vec<CatalogSeries>,
}

#[derive(Debug, Deserialize)]
struct CatalogSeries {
    title: String,
    #[serde(default)]
    seasons: Vec<CatalogSeason>,
}

#[derive(Debug, Deserialize)]
struct CatalogSeason {
    season_number: u32,
    #[serde(default)]
    episodes: Vec<CatalogEpisode>,
}

#[derive(Debug, Deserialize)]
struct CatalogEpisode {
    episode_number: u32,
    #[serde(default)]
    players: HashMap<String, Vec<String>>,
    /// Legacy single-source field, folded into [`LEGACY_LANGUAGE`].
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    output_template: Option<String>,
}

/// Load a catalog file and flatten it into episodes.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<Episode>, OrchestratorError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|source| OrchestratorError::read_file(path, source))?;
    let file: CatalogFile =
        serde_json::from_str(&raw).map_err(|source| OrchestratorError::CatalogFormat {
            path: path.to_path_buf(),
            source,
        })?;

    let mut episodes = Vec::new();
    for series in file.anime {
        for season in series.seasons {
            for entry in season.episodes {
                let mut players = entry.players;
                if let Some(url) = entry.video_url {
                    players
                        .entry(LEGACY_LANGUAGE.to_string())
                        .or_default()
                        .push(url);
                }
                episodes.push(Episode {
                    id: EpisodeId::new(
                        series.title.clone(),
                        season.season_number,
                        entry.episode_number,
                    ),
                    players,
                    output_template: entry.output_template,
                });
            }
        }
    }
    Ok(episodes)
}

/// Expand an output template with the episode identity.
///
/// Components are sanitised so a series title cannot escape the output
/// directory or produce an invalid filename.
pub fn expand_output_template(template: &str, id: &EpisodeId) -> String {
    template
        .replace("{series}", &sanitize_component(&id.series))
        .replace("{season}", &sanitize_component(&id.season))
        .replace("{episode}", &sanitize_component(&id.episode))
}

fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "anime": [
            {
                "title": "Frieren",
                "seasons": [
                    {
                        "season_number": 1,
                        "episodes": [
                            {
                                "episode_number": 1,
                                "players": {
                                    "vostfr": ["https://a.example/1", "https://b.example/1"],
                                    "vf": ["https://c.example/1"]
                                }
                            },
                            {
                                "episode_number": 2,
                                "video_url": "https://drive.example/abc"
                            }
                        ]
                    }
                ]
            }
        ]
    }"#;

    fn write_sample(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_and_flattens_catalog() {
        let file = write_sample(SAMPLE);
        let episodes = load_catalog(file.path()).unwrap();
        assert_eq!(episodes.len(), 2);

        let first = &episodes[0];
        assert_eq!(first.id.to_string(), "Frieren S01E01");
        assert_eq!(
            first.players_for("VOSTFR").unwrap(),
            ["https://a.example/1", "https://b.example/1"]
        );
        assert_eq!(first.players_for("vf").unwrap().len(), 1);
    }

    #[test]
    fn legacy_video_url_lands_under_default_language() {
        let file = write_sample(SAMPLE);
        let episodes = load_catalog(file.path()).unwrap();
        let second = &episodes[1];
        assert!(second.players_for("vostfr").is_none());
        assert_eq!(
            second.players_for(LEGACY_LANGUAGE).unwrap(),
            ["https://drive.example/abc"]
        );
    }

    #[test]
    fn malformed_catalog_reports_path() {
        let file = write_sample("{ not json");
        let err = load_catalog(file.path()).unwrap_err();
        assert!(err.to_string().contains("invalid catalog"));
    }

    #[test]
    fn template_expansion_sanitises_components() {
        let id = EpisodeId::new("Re:Zero / Director's Cut", 2, 5);
        let expanded = expand_output_template("{series}/{season}{episode}.%(ext)s", &id);
        assert_eq!(expanded, "Re_Zero _ Director's Cut/S02E05.%(ext)s");
    }

    #[test]
    fn episode_id_labels_are_zero_padded() {
        let id = EpisodeId::new("Frieren", 1, 12);
        assert_eq!(id.season, "S01");
        assert_eq!(id.episode, "E12");
    }
}

//! Candidate source selection.
//!
//! Walks the language preference list in order and yields each language's
//! player URLs in stored order. Languages the episode does not carry are
//! skipped silently; an episode with no candidates at all yields nothing,
//! which callers report as "no player available".

use crate::catalog::Episode;

/// One candidate source for an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceCandidate<'a> {
    pub language: &'a str,
    pub url: &'a str,
}

/// Lazy, finite, non-restartable sequence of candidate sources.
pub struct SourceSelector<'a> {
    episode: &'a Episode,
    preferences: &'a [String],
    language_idx: usize,
    url_idx: usize,
}

impl<'a> SourceSelector<'a> {
    pub fn new(episode: &'a Episode, preferences: &'a [String]) -> Self {
        Self {
            episode,
            preferences,
            language_idx: 0,
            url_idx: 0,
        }
    }
}

impl<'a> Iterator for SourceSelector<'a> {
    type Item = SourceCandidate<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.language_idx < self.preferences.len() {
            let language = self.preferences[self.language_idx].as_str();
            if let Some(urls) = self.episode.players_for(language)
                && self.url_idx < urls.len()
            {
                let url = urls[self.url_idx].as_str();
                self.url_idx += 1;
                return Some(SourceCandidate { language, url });
            }
            self.language_idx += 1;
            self.url_idx = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EpisodeId;
    use std::collections::HashMap;

    fn episode(players: &[(&str, &[&str])]) -> Episode {
        let players: HashMap<String, Vec<String>> = players
            .iter()
            .map(|(lang, urls)| {
                (
                    lang.to_string(),
                    urls.iter().map(|u| u.to_string()).collect(),
                )
            })
            .collect();
        Episode {
            id: EpisodeId::new("Test", 1, 1),
            players,
            output_template: None,
        }
    }

    fn prefs(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn yields_preference_order_then_stored_order() {
        let ep = episode(&[
            ("vf", &["vf-1", "vf-2"]),
            ("vostfr", &["vo-1", "vo-2"]),
        ]);
        let preferences = prefs(&["vostfr", "vf"]);
        let urls: Vec<&str> = SourceSelector::new(&ep, &preferences)
            .map(|c| c.url)
            .collect();
        assert_eq!(urls, ["vo-1", "vo-2", "vf-1", "vf-2"]);
    }

    #[test]
    fn missing_and_empty_languages_are_skipped() {
        let ep = episode(&[("vf", &[]), ("vostfr", &["vo-1"])]);
        let preferences = prefs(&["raw", "vf", "vostfr"]);
        let got: Vec<(&str, &str)> = SourceSelector::new(&ep, &preferences)
            .map(|c| (c.language, c.url))
            .collect();
        assert_eq!(got, [("vostfr", "vo-1")]);
    }

    #[test]
    fn language_match_is_case_insensitive() {
        let ep = episode(&[("VOSTFR", &["vo-1"])]);
        let preferences = prefs(&["vostfr"]);
        let urls: Vec<&str> = SourceSelector::new(&ep, &preferences)
            .map(|c| c.url)
            .collect();
        assert_eq!(urls, ["vo-1"]);
    }

    #[test]
    fn no_candidates_yields_empty_sequence() {
        let ep = episode(&[]);
        let preferences = prefs(&["vostfr", "vf"]);
        assert_eq!(SourceSelector::new(&ep, &preferences).count(), 0);
    }
}

use std::{cmp::Ordering, collections::HashSet, time::Duration};
use tracing::debug;

use crate::audio::track::TrackInfo;

/// Palabras que no aportan a la coincidencia
const FILLER_TOKENS: &[&str] = &["feat", "ft", "featuring", "prod"];

/// Pesos y tablas de palabras clave del ranking
#[derive(Debug, Clone)]
pub struct RankerConfig {
    pub min_match_ratio: f64,
    pub min_duration: Duration,
    pub title_weight: f64,
    pub artist_weight: f64,
    /// Bonus/penalización por frase en el título del candidato
    pub title_keywords: Vec<(String, f64)>,
    /// Bonus/penalización por frase en el nombre del canal
    pub channel_keywords: Vec<(String, f64)>,
}

impl Default for RankerConfig {
    fn default() -> Self {
        let table = |entries: &[(&str, f64)]| {
            entries
                .iter()
                .map(|(phrase, weight)| (phrase.to_string(), *weight))
                .collect::<Vec<_>>()
        };

        Self {
            min_match_ratio: 0.5,
            min_duration: Duration::from_secs(30),
            title_weight: 10.0,
            artist_weight: 6.0,
            title_keywords: table(&[
                ("official audio", 30.0),
                ("official video", 15.0),
                ("official", 8.0),
                ("audio", 6.0),
                ("lyrics", 4.0),
                ("lyric video", 4.0),
                ("cover", -20.0),
                ("remix", -20.0),
                ("instrumental", -25.0),
                ("live", -30.0),
                ("karaoke", -40.0),
                ("nightcore", -30.0),
                ("sped up", -25.0),
                ("slowed", -25.0),
                ("8d", -20.0),
                ("reaction", -40.0),
            ]),
            channel_keywords: table(&[("topic", 15.0), ("vevo", 10.0), ("official", 5.0)]),
        }
    }
}

impl RankerConfig {
    pub fn default_options(&self) -> MatchOptions {
        MatchOptions {
            min_match_ratio: self.min_match_ratio,
            min_duration: self.min_duration,
        }
    }
}

/// Umbrales aplicados en una llamada concreta
#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    pub min_match_ratio: f64,
    pub min_duration: Duration,
}

/// Consulta separada en artista y título ("Artista - Título")
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub artist: Option<Vec<String>>,
    pub title: Vec<String>,
    pub all_tokens: HashSet<String>,
}

impl ParsedQuery {
    pub fn parse(query: &str) -> Self {
        let (artist, title) = match query.split_once(" - ") {
            Some((artist, title)) if !artist.trim().is_empty() && !title.trim().is_empty() => {
                (Some(tokenize(artist)), tokenize(title))
            }
            _ => (None, tokenize(query)),
        };
        let all_tokens = tokenize(query).into_iter().collect();
        Self {
            artist: artist.filter(|tokens| !tokens.is_empty()),
            title,
            all_tokens,
        }
    }
}

/// Minúsculas, sin puntuación, separado por espacios
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|token| !FILLER_TOKENS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Frase contenida como secuencia de tokens completos ("live" no casa con "alive")
fn contains_phrase(tokens: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty() && tokens.windows(phrase.len()).any(|window| window == phrase)
}

/// Ranking de resultados de búsqueda
#[derive(Debug, Clone, Default)]
pub struct SearchRanker {
    config: RankerConfig,
}

#[derive(Debug)]
struct Scored {
    index: usize,
    score: f64,
}

impl SearchRanker {
    pub fn new(config: RankerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.config
    }

    /// Candidatos demasiado cortos (teasers, shorts) quedan fuera siempre
    pub fn is_blocked(&self, candidate: &TrackInfo, options: &MatchOptions) -> bool {
        candidate
            .duration
            .map(|duration| duration < options.min_duration)
            .unwrap_or(false)
    }

    /// Puntuación de un candidato; `None` si queda descalificado
    pub fn score(&self, candidate: &TrackInfo, query: &ParsedQuery, options: &MatchOptions) -> Option<f64> {
        let title_tokens = tokenize(&candidate.title);
        let channel = candidate.artist().unwrap_or_default();
        let channel_tokens = tokenize(&channel);

        let title_set: HashSet<&str> = title_tokens.iter().map(String::as_str).collect();
        let title_matches = query
            .title
            .iter()
            .filter(|token| title_set.contains(token.as_str()))
            .count();
        let title_ratio = if query.title.is_empty() {
            1.0
        } else {
            title_matches as f64 / query.title.len() as f64
        };

        let (artist_matches, artist_ratio) = match &query.artist {
            Some(artist) => {
                let matched = artist
                    .iter()
                    .filter(|token| {
                        title_set.contains(token.as_str()) || channel_tokens.iter().any(|c| c == *token)
                    })
                    .count();
                (matched, matched as f64 / artist.len() as f64)
            }
            None => (0, 1.0),
        };

        if title_ratio < options.min_match_ratio || artist_ratio < options.min_match_ratio {
            return None;
        }

        let mut score =
            title_matches as f64 * self.config.title_weight + artist_matches as f64 * self.config.artist_weight;
        score += self.keyword_adjustment(&self.config.title_keywords, &title_tokens, query);
        score += self.keyword_adjustment(&self.config.channel_keywords, &channel_tokens, query);
        Some(score)
    }

    fn keyword_adjustment(&self, table: &[(String, f64)], tokens: &[String], query: &ParsedQuery) -> f64 {
        table
            .iter()
            .filter_map(|(phrase, weight)| {
                let phrase_tokens = tokenize(phrase);
                if !contains_phrase(tokens, &phrase_tokens) {
                    return None;
                }
                // Si el usuario pidió "live" o "remix", no se penaliza
                if *weight < 0.0 && phrase_tokens.iter().all(|t| query.all_tokens.contains(t)) {
                    return None;
                }
                Some(*weight)
            })
            .sum()
    }

    /// Ordena los candidatos por relevancia.
    ///
    /// Empates conservan el orden del proveedor. Si ninguno supera los
    /// umbrales se devuelve la entrada sin los bloqueados, en su orden.
    pub fn rank(&self, candidates: Vec<TrackInfo>, query: &str, options: &MatchOptions) -> Vec<TrackInfo> {
        let parsed = ParsedQuery::parse(query);

        let mut scored: Vec<Scored> = candidates
            .iter()
            .enumerate()
            .filter(|(_, candidate)| !self.is_blocked(candidate, options))
            .filter_map(|(index, candidate)| {
                let score = self.score(candidate, &parsed, options);
                debug!("🎯 '{}' -> {:?}", candidate.title, score);
                score.map(|score| Scored { index, score })
            })
            .collect();

        if scored.is_empty() {
            debug!("⚠️ Ningún candidato supera el ranking para '{}', usando orden original", query);
            return candidates
                .into_iter()
                .filter(|candidate| !self.is_blocked(candidate, options))
                .collect();
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let mut slots: Vec<Option<TrackInfo>> = candidates.into_iter().map(Some).collect();
        scored
            .into_iter()
            .filter_map(|entry| slots[entry.index].take())
            .collect()
    }

    /// Mejor candidato; sólo `None` si la entrada está vacía o toda bloqueada
    pub fn pick(&self, candidates: Vec<TrackInfo>, query: &str, options: &MatchOptions) -> Option<TrackInfo> {
        self.rank(candidates, query, options).into_iter().next()
    }
}

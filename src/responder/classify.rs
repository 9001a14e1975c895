//! Prefix classification of inbound message bodies.

use crate::config::AutoresponderConfig;

/// Which replies a message asks for. Both may be set at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyIntents {
    pub pong: bool,
    pub seq: bool,
}

impl ReplyIntents {
    pub fn is_empty(&self) -> bool {
        !self.pong && !self.seq
    }
}

/// Prefix matcher. Prefixes are stored lower-case; bodies are ASCII case-folded.
#[derive(Debug, Clone)]
pub struct Classifier {
    pong_prefixes: Vec<String>,
    seq_prefixes: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::from_config(&AutoresponderConfig::default())
    }
}

impl Classifier {
    pub fn new<P, S>(pong_prefixes: P, seq_prefixes: S) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        fn fold<I>(items: I) -> Vec<String>
        where
            I: IntoIterator,
            I::Item: AsRef<str>,
        {
            items
                .into_iter()
                .map(|p| p.as_ref().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect()
        }
        Self {
            pong_prefixes: fold(pong_prefixes),
            seq_prefixes: fold(seq_prefixes),
        }
    }

    pub fn from_config(cfg: &AutoresponderConfig) -> Self {
        Self::new(&cfg.pong_prefixes, &cfg.seq_prefixes)
    }

    pub fn classify(&self, body: &str) -> ReplyIntents {
        ReplyIntents {
            pong: matches_any(body, &self.pong_prefixes),
            seq: matches_any(body, &self.seq_prefixes),
        }
    }
}

fn matches_any(body: &str, prefixes: &[String]) -> bool {
    let bytes = body.as_bytes();
    prefixes.iter().any(|p| {
        bytes.len() >= p.len() && bytes[..p.len()].eq_ignore_ascii_case(p.as_bytes())
    })
}

/// Classify with the default prefix sets.
pub fn classify(body: &str) -> ReplyIntents {
    Classifier::default().classify(body)
}

use crate::config::RouterConfig;
use crate::error::ConfigError;
use regex::Regex;

/// Outcome of running a transcript through the [`WakeGate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeDecision {
    /// The transcript mentions one of the agent's name variants.
    pub named: bool,
    /// The transcript contains an attention phrase. Informational only.
    pub attentive: bool,
    /// Transcript with wake terms removed.
    pub message: String,
}

impl WakeDecision {
    pub fn accepted(&self) -> bool {
        self.named && !self.message.is_empty()
    }
}

/// Decides whether a transcript is addressed to the agent and strips the wake terms.
#[derive(Debug)]
pub struct WakeGate {
    name_variants: Vec<String>,
    attention_phrases: Vec<String>,
    strip: Vec<Regex>,
}

impl WakeGate {
    pub fn new(config: &RouterConfig) -> Result<Self, ConfigError> {
        let normalize = |terms: &[String]| -> Vec<String> {
            terms
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect()
        };
        let name_variants = normalize(&config.name_variants);
        let attention_phrases = normalize(&config.attention_phrases);

        let mut terms: Vec<&String> = name_variants.iter().chain(&attention_phrases).collect();
        // Longer terms first so "excuse me" goes before a bare "me".
        terms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        terms.dedup();

        let strip = terms
            .into_iter()
            .map(|term| {
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))).map_err(|source| {
                    ConfigError::WakeTerm {
                        term: term.clone(),
                        source,
                    }
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(Self {
            name_variants,
            attention_phrases,
            strip,
        })
    }

    pub fn evaluate(&self, transcript: &str) -> WakeDecision {
        let lowered = transcript.to_lowercase();
        let named = self.name_variants.iter().any(|v| lowered.contains(v.as_str()));
        let attentive = self
            .attention_phrases
            .iter()
            .any(|p| lowered.contains(p.as_str()));

        let mut message = transcript.to_owned();
        for pattern in &self.strip {
            message = pattern.replace_all(&message, " ").into_owned();
        }
        let message = message.split_whitespace().collect::<Vec<_>>().join(" ");
        let message = message
            .trim_start_matches(|c: char| !c.is_alphanumeric())
            .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':'))
            .to_owned();

        WakeDecision {
            named,
            attentive,
            message,
        }
    }
}

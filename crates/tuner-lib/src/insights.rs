//! Insight memory carried across search sessions
//!
//! Insights are short lessons learned from evaluated configurations. They
//! live in two JSON-lines logs, one per polarity, and are voted on by the
//! oracle during reflection.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Confidence assigned to a freshly added insight
pub const ADD_CONFIDENCE: f64 = 0.7;

/// Confidence change per vote
pub const VOTE_STEP: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightProperty {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: u64,
    pub content: String,
    pub property: InsightProperty,
    pub confidence: f64,
}

/// One reflection verdict returned by the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InsightDecision {
    Upvote { id: u64 },
    Downvote { id: u64 },
    Add { content: String, property: InsightProperty },
}

#[derive(Debug, Clone, Default)]
pub struct InsightMemory {
    insights: Vec<Insight>,
    next_id: u64,
}

impl InsightMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load both logs; a missing file contributes nothing
    pub fn load(positive: &Path, negative: &Path) -> Result<Self> {
        let mut memory = Self::new();
        for path in [positive, negative] {
            if !path.exists() {
                debug!(path = %path.display(), "No insight log yet");
                continue;
            }
            let reader = BufReader::new(std::fs::File::open(path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Insight>(&line) {
                    Ok(insight) => memory.push(insight),
                    Err(e) => warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping malformed insight"
                    ),
                }
            }
        }
        Ok(memory)
    }

    fn push(&mut self, insight: Insight) {
        self.next_id = self.next_id.max(insight.id + 1);
        self.insights.push(insight);
    }

    pub fn len(&self) -> usize {
        self.insights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insights.is_empty()
    }

    pub fn all(&self) -> &[Insight] {
        &self.insights
    }

    pub fn get(&self, id: u64) -> Option<&Insight> {
        self.insights.iter().find(|i| i.id == id)
    }

    /// Add a new insight and return its id
    pub fn add(&mut self, content: impl Into<String>, property: InsightProperty) -> u64 {
        self.insert(content, property, ADD_CONFIDENCE)
    }

    pub fn insert(&mut self, content: impl Into<String>, property: InsightProperty, confidence: f64) -> u64 {
        let id = self.next_id;
        self.push(Insight {
            id,
            content: content.into(),
            property,
            confidence,
        });
        id
    }

    pub fn upvote(&mut self, id: u64) -> bool {
        self.adjust(id, VOTE_STEP)
    }

    pub fn downvote(&mut self, id: u64) -> bool {
        self.adjust(id, -VOTE_STEP)
    }

    fn adjust(&mut self, id: u64, delta: f64) -> bool {
        match self.insights.iter_mut().find(|i| i.id == id) {
            Some(insight) => {
                insight.confidence += delta;
                true
            }
            None => false,
        }
    }

    /// Apply reflection verdicts; returns the insights that were added
    pub fn apply(&mut self, decisions: &[InsightDecision]) -> Vec<Insight> {
        let mut added = Vec::new();
        for decision in decisions {
            match decision {
                InsightDecision::Upvote { id } => {
                    if !self.upvote(*id) {
                        warn!(insight_id = id, "Upvote for unknown insight");
                    }
                }
                InsightDecision::Downvote { id } => {
                    if !self.downvote(*id) {
                        warn!(insight_id = id, "Downvote for unknown insight");
                    }
                }
                InsightDecision::Add { content, property } => {
                    let id = self.add(content.clone(), *property);
                    if let Some(insight) = self.get(id) {
                        added.push(insight.clone());
                    }
                }
            }
        }
        added
    }

    /// The `k` most confident insights
    pub fn top_k(&self, k: usize) -> Vec<Insight> {
        let mut sorted = self.insights.clone();
        sorted.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        sorted.truncate(k);
        sorted
    }
}

/// Append insights to the log matching their polarity
pub fn append_insights(insights: &[Insight], positive: &Path, negative: &Path) -> Result<()> {
    for (path, property) in [
        (positive, InsightProperty::Positive),
        (negative, InsightProperty::Negative),
    ] {
        let lines: Vec<&Insight> = insights.iter().filter(|i| i.property == property).collect();
        if lines.is_empty() {
            continue;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        for insight in lines {
            serde_json::to_writer(&mut file, insight)?;
            file.write_all(b"\n")?;
        }
    }
    Ok(())
}

mod key;
mod store;

pub use key::*;
pub use store::*;

use crate::config::{MatchPolicy, ScoringParams};
use crate::detector::DetectedAnswer;
use crate::error::{OmrError, OmrResult};
use crate::options::OptionSet;
use crate::registry::VersionedRegistry;
use crate::result::{QuestionDetail, SheetResult, SheetStage, SubjectScore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Scores of one sheet against one key, before any processing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub version: String,
    pub subject_scores: Vec<SubjectScore>,
    pub questions: Vec<QuestionDetail>,
    pub total_correct: u32,
    pub total_questions: u32,
    pub total_score: f64,
    pub total_percentage: f64,
}

pub fn percentage(correct: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64 * 100.0
    }
}

/// Correctness of one question under `policy`. Blank answers are never correct.
pub fn is_correct(detected: OptionSet, accepted: OptionSet, policy: MatchPolicy) -> bool {
    if detected.is_empty() {
        return false;
    }
    match policy {
        MatchPolicy::Exact => detected == accepted,
        MatchPolicy::Subset => detected.is_subset_of(accepted),
    }
}

/// Owns the version-keyed answer keys and the scoring policy.
pub struct AnswerEvaluator {
    keys: VersionedRegistry<AnswerKey>,
    scoring: ScoringParams,
}

impl Default for AnswerEvaluator {
    fn default() -> Self {
        Self::new(ScoringParams::default())
    }
}

impl AnswerEvaluator {
    pub fn new(scoring: ScoringParams) -> Self {
        Self {
            keys: VersionedRegistry::new(),
            scoring,
        }
    }

    pub fn scoring(&self) -> &ScoringParams {
        &self.scoring
    }

    /// Validates and registers `key` under `version`, replacing any previous key.
    pub fn add_key(&self, version: &str, mut key: AnswerKey) -> OmrResult<()> {
        if version.trim().is_empty() {
            return Err(OmrError::KeyValidation("version must not be empty".into()));
        }
        key.validate()?;
        if key.version.is_empty() {
            key.version = version.to_string();
        } else if key.version != version {
            warn!(
                "⚠️  Key declares version '{}' but is registered as '{}'",
                key.version, version
            );
        }
        let questions = key.total_questions();
        if self.keys.insert(version, key).is_some() {
            info!("🔁 Replaced answer key '{}' ({} questions)", version, questions);
        } else {
            info!("🔑 Registered answer key '{}' ({} questions)", version, questions);
        }
        Ok(())
    }

    pub fn remove_key(&self, version: &str) -> bool {
        self.keys.remove(version).is_some()
    }

    pub fn clear(&self) {
        self.keys.clear();
    }

    pub fn key(&self, version: &str) -> Option<Arc<AnswerKey>> {
        self.keys.get(version)
    }

    pub fn has_key(&self, version: &str) -> bool {
        self.keys.contains(version)
    }

    pub fn versions(&self) -> Vec<String> {
        self.keys.versions()
    }

    pub fn score(
        &self,
        answers: &BTreeMap<u32, DetectedAnswer>,
        version: &str,
    ) -> OmrResult<ScoreCard> {
        let key = self
            .keys
            .get(version)
            .ok_or_else(|| OmrError::UnknownVersion(version.to_string()))?;
        Ok(self.score_against(&key, version, answers))
    }

    /// Scores against an explicit key. Questions absent from `answers` count as blank.
    pub fn score_against(
        &self,
        key: &AnswerKey,
        version: &str,
        answers: &BTreeMap<u32, DetectedAnswer>,
    ) -> ScoreCard {
        let policy = self.scoring.match_policy;
        let mut subject_scores = Vec::with_capacity(key.subjects.len());
        let mut questions = Vec::with_capacity(key.total_questions());

        for subject in &key.subjects {
            let (mut correct, mut wrong) = (0u32, 0u32);
            for (q, accepted) in subject.pairs() {
                let (detected, confidence) = answers
                    .get(&q)
                    .map(|a| (a.marked, a.confidence))
                    .unwrap_or((OptionSet::EMPTY, 0.0));
                let ok = is_correct(detected, accepted, policy);
                if ok {
                    correct += 1;
                } else if !detected.is_empty() {
                    wrong += 1;
                }
                questions.push(QuestionDetail {
                    question: q,
                    subject: subject.name.clone(),
                    detected,
                    correct: accepted,
                    is_correct: ok,
                    confidence,
                });
            }
            let total = subject.questions.len() as u32;
            subject_scores.push(SubjectScore {
                subject: subject.name.clone(),
                correct,
                total,
                score: self.raw_score(correct, wrong),
                percentage: percentage(correct, total),
            });
        }

        let total_correct = subject_scores.iter().map(|s| s.correct).sum();
        let total_questions = subject_scores.iter().map(|s| s.total).sum();
        ScoreCard {
            version: version.to_string(),
            total_score: subject_scores.iter().map(|s| s.score).sum(),
            total_percentage: percentage(total_correct, total_questions),
            total_correct,
            total_questions,
            subject_scores,
            questions,
        }
    }

    fn raw_score(&self, correct: u32, wrong: u32) -> f64 {
        correct as f64 * self.scoring.marks_per_correct - wrong as f64 * self.scoring.penalty_per_wrong
    }

    /// Scores `answers` and wraps them as a successful result. Deterministic:
    /// identical inputs give identical results.
    pub fn evaluate(
        &self,
        answers: &BTreeMap<u32, DetectedAnswer>,
        version: &str,
        student_id: &str,
    ) -> OmrResult<SheetResult> {
        let card = self.score(answers, version)?;
        Ok(SheetResult::builder()
            .student_id(student_id)
            .version(version)
            .success(true)
            .stage(SheetStage::Evaluated)
            .total_score(card.total_score)
            .total_percentage(card.total_percentage)
            .total_correct(card.total_correct)
            .total_questions(card.total_questions)
            .subject_scores(card.subject_scores)
            .questions(card.questions)
            .build())
    }
}

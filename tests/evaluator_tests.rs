use omr_grader::config::{MatchPolicy, ScoringParams};
use omr_grader::detector::DetectedAnswer;
use omr_grader::error::{ErrorKind, OmrError};
use omr_grader::evaluator::{is_correct, AnswerEvaluator, AnswerKey, SubjectKey};
use omr_grader::options::OptionSet;
use proptest::prelude::*;
use rstest::rstest;
use std::collections::BTreeMap;
use std::io::Write;

fn set(letters: &str) -> OptionSet {
    letters.parse().unwrap()
}

fn two_subject_key() -> AnswerKey {
    AnswerKey::new("v1")
        .with_subject(SubjectKey::new(
            "Mathematics",
            vec![1, 2, 3],
            vec![set("A"), set("B"), set("A,C")],
        ))
        .with_subject(SubjectKey::new(
            "Physics",
            vec![4, 5],
            vec![set("D"), set("C")],
        ))
}

fn answers(pairs: &[(u32, &str)]) -> BTreeMap<u32, DetectedAnswer> {
    pairs
        .iter()
        .map(|(q, l)| (*q, DetectedAnswer::new(*q, set(l))))
        .collect()
}

fn evaluator_with(policy: MatchPolicy) -> AnswerEvaluator {
    let evaluator = AnswerEvaluator::new(ScoringParams {
        match_policy: policy,
        ..ScoringParams::default()
    });
    evaluator.add_key("v1", two_subject_key()).unwrap();
    evaluator
}

// --- STRATEGIES ---

prop_compose! {
    fn arb_key()(
        options in 2u8..=8,
        sizes in proptest::collection::vec(1usize..15, 1..5),
        picks in proptest::collection::vec(any::<u8>(), 60)
    ) -> AnswerKey {
        let mut key = AnswerKey::new("prop").with_options(options);
        let mut next = 1u32;
        for (i, size) in sizes.iter().enumerate() {
            let questions: Vec<u32> = (next..next + *size as u32).collect();
            let answers = questions
                .iter()
                .map(|q| OptionSet::single(picks[*q as usize % picks.len()] % options))
                .collect();
            next += *size as u32;
            key = key.with_subject(SubjectKey::new(format!("S{}", i), questions, answers));
        }
        key
    }
}

proptest! {
    #[test]
    fn test_matching_answers_score_full_marks(key in arb_key()) {
        let evaluator = AnswerEvaluator::default();
        evaluator.add_key("prop", key.clone()).unwrap();
        let detected: BTreeMap<u32, DetectedAnswer> = key
            .subjects
            .iter()
            .flat_map(|s| s.pairs())
            .map(|(q, a)| (q, DetectedAnswer::new(q, a)))
            .collect();

        let result = evaluator.evaluate(&detected, "prop", "s").unwrap();
        prop_assert!(result.success);
        prop_assert_eq!(result.total_percentage, 100.0);
        for subject in &result.subject_scores {
            prop_assert_eq!(subject.percentage, 100.0, "subject {}", &subject.subject);
        }
    }

    #[test]
    fn test_blank_sheet_scores_zero(key in arb_key()) {
        let evaluator = AnswerEvaluator::default();
        evaluator.add_key("prop", key.clone()).unwrap();
        let result = evaluator.evaluate(&BTreeMap::new(), "prop", "s").unwrap();
        prop_assert_eq!(result.total_correct, 0);
        prop_assert_eq!(result.total_questions as usize, key.total_questions());
        prop_assert!(result.subject_scores.iter().all(|s| s.percentage == 0.0));
    }
}

#[test]
fn test_subject_breakdown_is_in_key_order() {
    let evaluator = evaluator_with(MatchPolicy::Exact);
    let result = evaluator
        .evaluate(
            &answers(&[(1, "A"), (2, "C"), (3, "A,C"), (4, "D"), (5, "")]),
            "v1",
            "alice",
        )
        .unwrap();

    assert_eq!(result.student_id, "alice");
    let names: Vec<&str> = result.subject_scores.iter().map(|s| s.subject.as_str()).collect();
    assert_eq!(names, ["Mathematics", "Physics"]);

    let maths = result.subject("Mathematics").unwrap();
    assert_eq!((maths.correct, maths.total), (2, 3));
    assert!((maths.percentage - 200.0 / 3.0).abs() < 1e-9);
    let physics = result.subject("Physics").unwrap();
    assert_eq!((physics.correct, physics.total), (1, 2));
    assert_eq!(result.total_correct, 3);
    assert_eq!(result.total_questions, 5);
    assert_eq!(result.total_percentage, 60.0);
    assert_eq!(result.questions.len(), 5);
}

#[rstest]
#[case::exact_match(MatchPolicy::Exact, "A,C", "A,C", true)]
#[case::exact_partial(MatchPolicy::Exact, "A", "A,C", false)]
#[case::exact_extra(MatchPolicy::Exact, "A,B", "A", false)]
#[case::subset_partial(MatchPolicy::Subset, "A", "A,C", true)]
#[case::subset_full(MatchPolicy::Subset, "A,C", "A,C", true)]
#[case::subset_stray(MatchPolicy::Subset, "A,B", "A,C", false)]
#[case::blank_exact(MatchPolicy::Exact, "", "A", false)]
#[case::blank_subset(MatchPolicy::Subset, "", "A", false)]
fn test_match_policy(
    #[case] policy: MatchPolicy,
    #[case] detected: &str,
    #[case] accepted: &str,
    #[case] expected: bool,
) {
    assert_eq!(
        is_correct(set(detected), set(accepted), policy),
        expected,
        "{} against {} under {}",
        detected,
        accepted,
        policy
    );
}

#[test]
fn test_evaluation_is_idempotent() {
    let evaluator = evaluator_with(MatchPolicy::Exact);
    let detected = answers(&[(1, "A"), (2, "B"), (4, "A")]);
    let first = evaluator.evaluate(&detected, "v1", "bob").unwrap();
    let second = evaluator.evaluate(&detected, "v1", "bob").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_negative_marking_spares_blanks() {
    let evaluator = AnswerEvaluator::new(ScoringParams {
        penalty_per_wrong: 0.25,
        ..ScoringParams::default()
    });
    evaluator.add_key("v1", two_subject_key()).unwrap();
    // Q1 right, Q2 wrong, Q3 blank; Q4 wrong, Q5 blank.
    let card = evaluator
        .score(&answers(&[(1, "A"), (2, "D"), (4, "A")]), "v1")
        .unwrap();
    assert_eq!(card.subject_scores[0].score, 0.75);
    assert_eq!(card.subject_scores[1].score, -0.25);
    assert_eq!(card.total_score, 0.5);
    assert_eq!(card.total_correct, 1);
}

#[test]
fn test_unknown_version_is_an_error() {
    let evaluator = AnswerEvaluator::default();
    let err = evaluator.evaluate(&BTreeMap::new(), "missing", "s").unwrap_err();
    assert!(matches!(err, OmrError::UnknownVersion(ref v) if v == "missing"));
    assert_eq!(err.kind(), ErrorKind::UnknownVersion);
}

#[rstest]
#[case::no_subjects(AnswerKey::new("v"))]
#[case::length_mismatch(AnswerKey::new("v").with_subject(SubjectKey::new("S", vec![1, 2], vec![set("A")])))]
#[case::duplicate_question(AnswerKey::new("v")
    .with_subject(SubjectKey::new("S", vec![1], vec![set("A")]))
    .with_subject(SubjectKey::new("T", vec![1], vec![set("B")])))]
#[case::question_zero(AnswerKey::new("v").with_subject(SubjectKey::new("S", vec![0], vec![set("A")])))]
#[case::empty_answer(AnswerKey::new("v").with_subject(SubjectKey::new("S", vec![1], vec![OptionSet::EMPTY])))]
#[case::outside_alphabet(AnswerKey::new("v").with_options(4).with_subject(SubjectKey::new("S", vec![1], vec![set("E")])))]
#[case::unnamed_subject(AnswerKey::new("v").with_subject(SubjectKey::new(" ", vec![1], vec![set("A")])))]
fn test_invalid_keys_are_rejected(#[case] key: AnswerKey) {
    let evaluator = AnswerEvaluator::default();
    let err = evaluator.add_key("v", key).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyValidation);
    assert!(!evaluator.has_key("v"), "a rejected key must not be registered");
}

#[test]
fn test_replacing_a_key_leaves_held_snapshots_intact() {
    let evaluator = evaluator_with(MatchPolicy::Exact);
    let held = evaluator.key("v1").unwrap();

    let replacement = AnswerKey::new("v1").with_subject(SubjectKey::new("Only", vec![1], vec![set("B")]));
    evaluator.add_key("v1", replacement).unwrap();

    assert_eq!(held.total_questions(), 5, "old snapshot unchanged");
    assert_eq!(evaluator.key("v1").unwrap().total_questions(), 1);
    assert_eq!(evaluator.versions(), vec!["v1".to_string()]);
    assert!(evaluator.remove_key("v1"));
    assert!(!evaluator.has_key("v1"));
}

#[test]
fn test_key_file_in_map_form() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "version": "2024-A",
            "name": "Mock exam",
            "subjects": {{
                "Chemistry": {{"questions": [3, 4], "answers": ["B", "A,D"]}},
                "Biology": {{"questions": [1, 2], "answers": ["C", "c"]}}
            }}
        }}"#
    )
    .unwrap();

    let key = AnswerKey::load_from_file(file.path()).unwrap();
    let summary = key.summary();
    assert_eq!(summary.version, "2024-A");
    assert_eq!(summary.total_questions, 4);
    assert_eq!(summary.subjects[0].name, "Biology");
    assert_eq!(summary.subjects[1].first, Some(3));
    assert_eq!(key.subjects[1].answers[1], set("A,D"));
}

#[test]
fn test_malformed_key_json_is_a_validation_error() {
    let err = AnswerKey::from_json_str(r#"{"version": "v", "subjects": 7}"#).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyValidation);
    let err = AnswerKey::from_json_str(r#"{"subjects": {"S": {"questions": [1], "answers": ["Z"]}}}"#)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyValidation);
}

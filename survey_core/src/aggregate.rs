use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use log::{debug, info};

use crate::filter::{matches_all, FilterSpec};
use crate::model::*;

/// The minimum respondent count below which aggregated results are withheld
/// entirely. A fixed global constant, deliberately not configurable per
/// survey: the privacy guarantee is uniform.
pub const ANONYMITY_THRESHOLD: usize = 10;

#[derive(PartialEq, Debug, Clone)]
pub struct OptionTally {
    pub option: OptionId,
    pub label: String,
    pub count: usize,
    /// `round(count / answered * 100)`. Rounded independently per option, so
    /// the column may sum to 100 ± 1 per option.
    pub percent: u32,
}

#[derive(PartialEq, Debug, Clone)]
pub enum QuestionStats {
    Choice {
        answered: usize,
        tallies: Vec<OptionTally>,
    },
    Likert {
        answered: usize,
        /// One bucket per integer of the declared scale, zeros included.
        histogram: Vec<(i64, usize)>,
        /// Arithmetic mean rounded to one decimal. None when no respondent
        /// gave a usable value.
        mean: Option<f64>,
    },
    Text {
        answered: usize,
        /// Verbatim non-blank values. Whitespace-only text is not an answer.
        texts: Vec<String>,
    },
}

#[derive(PartialEq, Debug, Clone)]
pub struct QuestionResult {
    pub question: QuestionId,
    pub code: Option<String>,
    pub label: String,
    pub kind: QuestionKind,
    pub stats: QuestionStats,
}

/// The outcome of aggregating one survey instance (or one filtered slice of
/// it). A blocked result carries only the respondent count and a reason:
/// no per-question data is computed at all.
#[derive(PartialEq, Debug, Clone)]
pub enum SurveyResults {
    Blocked {
        respondents: usize,
        reason: String,
    },
    Tabulated {
        respondents: usize,
        questions: Vec<QuestionResult>,
    },
}

/// Restricts a response set to the identities matching a demographic
/// sub-filter. Callers apply this *before* [aggregate], so the anonymity
/// threshold protects every filtered slice independently.
pub fn filter_responses(
    responses: &[Response],
    identities: &HashMap<IdentityId, Identity>,
    spec: &FilterSpec,
    today: NaiveDate,
) -> Vec<Response> {
    if spec.is_empty() {
        return responses.to_vec();
    }
    responses
        .iter()
        .filter(|r| {
            identities
                .get(&r.identity)
                .map(|i| matches_all(i, spec, today))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// Computes the per-question statistics for one survey instance over the
/// given response set.
pub fn aggregate(
    questions: &[Question],
    responses: &[Response],
    answers: &[Answer],
) -> SurveyResults {
    let respondents = responses.len();
    if respondents < ANONYMITY_THRESHOLD {
        info!(
            "aggregate: blocked, {} respondents < threshold {}",
            respondents, ANONYMITY_THRESHOLD
        );
        return SurveyResults::Blocked {
            respondents,
            reason: format!(
                "Results are withheld: fewer than {} respondents",
                ANONYMITY_THRESHOLD
            ),
        };
    }

    // Only answers belonging to the (possibly filtered) response set count.
    let response_ids: HashSet<ResponseId> = responses.iter().map(|r| r.id).collect();

    let mut results: Vec<QuestionResult> = Vec::with_capacity(questions.len());
    for q in questions.iter() {
        let q_answers: Vec<&Answer> = answers
            .iter()
            .filter(|a| a.question == q.id && response_ids.contains(&a.response))
            .collect();
        debug!("aggregate: question {:?}: {} answers", q.id, q_answers.len());
        let stats = match q.kind {
            QuestionKind::SingleChoice | QuestionKind::MultiChoice => {
                choice_stats(q, &q_answers)
            }
            QuestionKind::Likert10 | QuestionKind::Likert5 => {
                let scale = q.kind.likert_scale().unwrap_or(10);
                likert_stats(scale, &q_answers)
            }
            QuestionKind::FreeText => text_stats(&q_answers),
        };
        results.push(QuestionResult {
            question: q.id,
            code: q.code.clone(),
            label: q.label.clone(),
            kind: q.kind,
            stats,
        });
    }
    SurveyResults::Tabulated {
        respondents,
        questions: results,
    }
}

fn choice_stats(question: &Question, answers: &[&Answer]) -> QuestionStats {
    let answered = answers.len();
    let mut counts: HashMap<OptionId, usize> = HashMap::new();
    for a in answers.iter() {
        for opt in a.selected.iter() {
            *counts.entry(*opt).or_insert(0) += 1;
        }
    }
    // Every declared option is reported, zero counts included, in the
    // declared order.
    let tallies: Vec<OptionTally> = question
        .options
        .iter()
        .map(|opt| {
            let count = counts.get(&opt.id).cloned().unwrap_or(0);
            let percent = if answered > 0 {
                (count as f64 / answered as f64 * 100.0).round() as u32
            } else {
                0
            };
            OptionTally {
                option: opt.id,
                label: opt.label.clone(),
                count,
                percent,
            }
        })
        .collect();
    QuestionStats::Choice { answered, tallies }
}

fn likert_stats(scale: i64, answers: &[&Answer]) -> QuestionStats {
    // Null numeric values are excluded from both the histogram and the mean;
    // out-of-range values are recording errors and are discarded too.
    let values: Vec<i64> = answers
        .iter()
        .filter_map(|a| a.number)
        .filter(|v| (1..=scale).contains(v))
        .collect();
    let mut histogram: Vec<(i64, usize)> = (1..=scale).map(|v| (v, 0)).collect();
    for v in values.iter() {
        histogram[(v - 1) as usize].1 += 1;
    }
    let mean = likert_mean(&values);
    QuestionStats::Likert {
        answered: values.len(),
        histogram,
        mean,
    }
}

pub(crate) fn likert_mean(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum: i64 = values.iter().sum();
    Some(round1(sum as f64 / values.len() as f64))
}

pub(crate) fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn text_stats(answers: &[&Answer]) -> QuestionStats {
    let texts: Vec<String> = answers
        .iter()
        .filter_map(|a| a.text.as_ref())
        .filter(|t| !t.trim().is_empty())
        .cloned()
        .collect();
    QuestionStats::Text {
        answered: texts.len(),
        texts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn question(id: u64, kind: QuestionKind, options: usize) -> Question {
        init_logging();
        Question {
            id: QuestionId(id),
            survey: SurveyId(1),
            code: None,
            label: format!("Q{}", id),
            kind,
            options: (0..options)
                .map(|i| ChoiceOption {
                    id: OptionId(id * 100 + i as u64),
                    label: format!("opt-{}", i),
                })
                .collect(),
        }
    }

    fn responses(n: usize) -> Vec<Response> {
        (0..n)
            .map(|i| Response {
                id: ResponseId(i as u64),
                survey: SurveyId(1),
                identity: IdentityId(i as u64),
            })
            .collect()
    }

    fn choice_answer(response: u64, question: u64, opts: &[u64]) -> Answer {
        Answer {
            response: ResponseId(response),
            question: QuestionId(question),
            selected: opts.iter().map(|o| OptionId(*o)).collect(),
            ..Answer::default()
        }
    }

    fn likert_answer(response: u64, question: u64, value: Option<i64>) -> Answer {
        Answer {
            response: ResponseId(response),
            question: QuestionId(question),
            number: value,
            ..Answer::default()
        }
    }

    #[test]
    fn below_threshold_is_blocked_with_no_question_data() {
        let qs = vec![question(1, QuestionKind::SingleChoice, 2)];
        let rs = responses(ANONYMITY_THRESHOLD - 1);
        let answers = vec![choice_answer(0, 1, &[100])];
        match aggregate(&qs, &rs, &answers) {
            SurveyResults::Blocked { respondents, reason } => {
                assert_eq!(respondents, ANONYMITY_THRESHOLD - 1);
                assert!(reason.contains("10"));
            }
            other => panic!("expected blocked, got {:?}", other),
        }
    }

    #[test]
    fn at_threshold_is_tabulated() {
        let qs = vec![question(1, QuestionKind::SingleChoice, 2)];
        let rs = responses(ANONYMITY_THRESHOLD);
        match aggregate(&qs, &rs, &[]) {
            SurveyResults::Tabulated {
                respondents,
                questions,
            } => {
                assert_eq!(respondents, ANONYMITY_THRESHOLD);
                assert_eq!(questions.len(), 1);
            }
            other => panic!("expected tabulated, got {:?}", other),
        }
    }

    #[test]
    fn choice_counts_and_percentages() {
        let qs = vec![question(1, QuestionKind::SingleChoice, 3)];
        let rs = responses(12);
        // 12 respondents, 10 answered: 7 for opt 100, 3 for opt 101, 0 for 102.
        let mut answers: Vec<Answer> = Vec::new();
        for r in 0..7 {
            answers.push(choice_answer(r, 1, &[100]));
        }
        for r in 7..10 {
            answers.push(choice_answer(r, 1, &[101]));
        }
        let res = aggregate(&qs, &rs, &answers);
        let questions = match res {
            SurveyResults::Tabulated { questions, .. } => questions,
            other => panic!("expected tabulated, got {:?}", other),
        };
        match &questions[0].stats {
            QuestionStats::Choice { answered, tallies } => {
                assert_eq!(*answered, 10);
                let counts: Vec<usize> = tallies.iter().map(|t| t.count).collect();
                assert_eq!(counts, vec![7, 3, 0]);
                assert_eq!(counts.iter().sum::<usize>(), 10);
                let percents: Vec<u32> = tallies.iter().map(|t| t.percent).collect();
                assert_eq!(percents, vec![70, 30, 0]);
            }
            other => panic!("expected choice stats, got {:?}", other),
        }
    }

    #[test]
    fn multi_choice_counts_every_selection() {
        let qs = vec![question(1, QuestionKind::MultiChoice, 2)];
        let rs = responses(10);
        let answers = vec![
            choice_answer(0, 1, &[100, 101]),
            choice_answer(1, 1, &[100]),
        ];
        let res = aggregate(&qs, &rs, &answers);
        let questions = match res {
            SurveyResults::Tabulated { questions, .. } => questions,
            other => panic!("unexpected {:?}", other),
        };
        match &questions[0].stats {
            QuestionStats::Choice { answered, tallies } => {
                assert_eq!(*answered, 2);
                assert_eq!(tallies[0].count, 2);
                assert_eq!(tallies[1].count, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn likert_histogram_and_mean() {
        let qs = vec![question(1, QuestionKind::Likert5, 0)];
        let rs = responses(10);
        let answers = vec![
            likert_answer(0, 1, Some(5)),
            likert_answer(1, 1, Some(4)),
            likert_answer(2, 1, Some(4)),
            likert_answer(3, 1, None),
            // Out of range for a 1..=5 scale: discarded.
            likert_answer(4, 1, Some(9)),
        ];
        let res = aggregate(&qs, &rs, &answers);
        let questions = match res {
            SurveyResults::Tabulated { questions, .. } => questions,
            other => panic!("unexpected {:?}", other),
        };
        match &questions[0].stats {
            QuestionStats::Likert {
                answered,
                histogram,
                mean,
            } => {
                assert_eq!(*answered, 3);
                assert_eq!(histogram.len(), 5);
                assert_eq!(histogram[4], (5, 1));
                assert_eq!(histogram[3], (4, 2));
                assert_eq!(histogram[0], (1, 0));
                assert_eq!(*mean, Some(4.3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn blank_text_is_not_an_answer() {
        let qs = vec![question(1, QuestionKind::FreeText, 0)];
        let rs = responses(10);
        let answers = vec![
            Answer {
                response: ResponseId(0),
                question: QuestionId(1),
                text: Some("More remote days please".to_string()),
                ..Answer::default()
            },
            Answer {
                response: ResponseId(1),
                question: QuestionId(1),
                text: Some("   ".to_string()),
                ..Answer::default()
            },
            Answer {
                response: ResponseId(2),
                question: QuestionId(1),
                text: None,
                ..Answer::default()
            },
        ];
        let res = aggregate(&qs, &rs, &answers);
        let questions = match res {
            SurveyResults::Tabulated { questions, .. } => questions,
            other => panic!("unexpected {:?}", other),
        };
        match &questions[0].stats {
            QuestionStats::Text { answered, texts } => {
                assert_eq!(*answered, 1);
                assert_eq!(texts, &vec!["More remote days please".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn answers_outside_the_response_slice_are_ignored() {
        let qs = vec![question(1, QuestionKind::SingleChoice, 1)];
        let rs = responses(10);
        let mut answers: Vec<Answer> = (0..10).map(|r| choice_answer(r, 1, &[100])).collect();
        // An answer from a response that is not part of the slice.
        answers.push(choice_answer(99, 1, &[100]));
        let res = aggregate(&qs, &rs, &answers);
        let questions = match res {
            SurveyResults::Tabulated { questions, .. } => questions,
            other => panic!("unexpected {:?}", other),
        };
        match &questions[0].stats {
            QuestionStats::Choice { answered, tallies } => {
                assert_eq!(*answered, 10);
                assert_eq!(tallies[0].count, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn filtered_slice_is_gated_independently() {
        use crate::filter::FilterSpec;
        use chrono::NaiveDate;

        // 20 responses in total, but only 6 from department 7: the slice is
        // below the threshold and must be blocked even though the whole
        // survey is not.
        let mut identities: HashMap<IdentityId, Identity> = HashMap::new();
        for i in 0..20u64 {
            let mut units = OrgPath::default();
            units.department = Some(if i < 6 { UnitId(7) } else { UnitId(8) });
            identities.insert(
                IdentityId(i),
                Identity {
                    id: IdentityId(i),
                    token: format!("tok-{}", i),
                    units,
                    demographics: Demographics::default(),
                    active: true,
                },
            );
        }
        let rs = responses(20);
        let spec = FilterSpec {
            departments: Some(vec![UnitId(7)]),
            ..FilterSpec::default()
        };
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let slice = filter_responses(&rs, &identities, &spec, today);
        assert_eq!(slice.len(), 6);
        let qs = vec![question(1, QuestionKind::Likert10, 0)];
        match aggregate(&qs, &slice, &[]) {
            SurveyResults::Blocked { respondents, .. } => assert_eq!(respondents, 6),
            other => panic!("expected blocked slice, got {:?}", other),
        }
    }

    #[test]
    fn rounding_to_one_decimal() {
        assert_eq!(round1(4.25), 4.3);
        assert_eq!(round1(4.24), 4.2);
        assert_eq!(likert_mean(&[]), None);
        assert_eq!(likert_mean(&[7]), Some(7.0));
    }
}

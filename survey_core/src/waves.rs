use std::collections::HashMap;

use log::{debug, info};

use crate::aggregate::{likert_mean, round1, ANONYMITY_THRESHOLD};
use crate::model::*;

/// Everything the matcher needs about one survey instance of a tracking
/// group: its questions, its respondent count and its raw answers.
#[derive(PartialEq, Debug, Clone)]
pub struct WaveData {
    pub survey: SurveyInstance,
    pub questions: Vec<Question>,
    pub respondents: usize,
    pub answers: Vec<Answer>,
}

/// One question of the reference list (the Likert questions of the instance
/// being viewed).
#[derive(PartialEq, Debug, Clone)]
pub struct QuestionRef {
    pub question: QuestionId,
    pub code: Option<String>,
    pub label: String,
}

/// One survey instance of the series: the per-question averages aligned to
/// the reference list. A value of None means "no data" (no matching
/// question, no usable answers, or a blocked instance) and must never be
/// rendered as zero.
#[derive(PartialEq, Debug, Clone)]
pub struct WavePoint {
    pub survey: SurveyId,
    pub wave: u32,
    pub respondents: usize,
    pub blocked: bool,
    pub values: Vec<Option<f64>>,
}

#[derive(PartialEq, Debug, Clone)]
pub struct WaveSeries {
    pub reference: Vec<QuestionRef>,
    /// Ordered by wave number.
    pub points: Vec<WavePoint>,
    /// Per reference question: last unblocked non-null average minus the
    /// first one. None when fewer than two such points exist.
    pub trends: Vec<Option<f64>>,
}

/// Aligns the Likert questions of the viewed instance across every instance
/// of its tracking group and computes the per-question time series.
///
/// Matching is by stable question code first; when the reference question has
/// no code or no instance question carries it, the fallback is the ordinal
/// position among that instance's Likert questions.
pub fn align_waves(viewed: SurveyId, waves: &[WaveData]) -> WaveSeries {
    let mut ordered: Vec<&WaveData> = waves.iter().collect();
    ordered.sort_by_key(|w| w.survey.wave.unwrap_or(0));

    let reference_wave = match ordered.iter().find(|w| w.survey.id == viewed) {
        Some(w) => *w,
        None => {
            debug!("align_waves: viewed instance {:?} not in group", viewed);
            return WaveSeries {
                reference: Vec::new(),
                points: Vec::new(),
                trends: Vec::new(),
            };
        }
    };
    let reference: Vec<&Question> = likert_questions(reference_wave);
    info!(
        "align_waves: {} reference questions, {} instances",
        reference.len(),
        ordered.len()
    );

    let mut points: Vec<WavePoint> = Vec::with_capacity(ordered.len());
    for w in ordered.iter() {
        let blocked = w.respondents < ANONYMITY_THRESHOLD;
        let likerts = likert_questions(w);
        let by_code: HashMap<&str, &Question> = likerts
            .iter()
            .filter_map(|q| q.code.as_deref().map(|c| (c, *q)))
            .collect();
        let values: Vec<Option<f64>> = reference
            .iter()
            .enumerate()
            .map(|(pos, rq)| {
                if blocked {
                    // Blocked instances contribute null for every question,
                    // never partial data.
                    return None;
                }
                let local: Option<&Question> = rq
                    .code
                    .as_deref()
                    .and_then(|c| by_code.get(c).copied())
                    .or_else(|| likerts.get(pos).copied());
                local.and_then(|q| question_mean(q, &w.answers))
            })
            .collect();
        points.push(WavePoint {
            survey: w.survey.id,
            wave: w.survey.wave.unwrap_or(0),
            respondents: w.respondents,
            blocked,
            values,
        });
    }

    let trends: Vec<Option<f64>> = (0..reference.len())
        .map(|idx| {
            let series: Vec<f64> = points
                .iter()
                .filter(|p| !p.blocked)
                .filter_map(|p| p.values[idx])
                .collect();
            match (series.first(), series.last()) {
                (Some(first), Some(last)) if series.len() >= 2 => Some(round1(last - first)),
                _ => None,
            }
        })
        .collect();

    WaveSeries {
        reference: reference
            .iter()
            .map(|q| QuestionRef {
                question: q.id,
                code: q.code.clone(),
                label: q.label.clone(),
            })
            .collect(),
        points,
        trends,
    }
}

fn likert_questions(wave: &WaveData) -> Vec<&Question> {
    wave.questions.iter().filter(|q| q.kind.is_likert()).collect()
}

fn question_mean(question: &Question, answers: &[Answer]) -> Option<f64> {
    let scale = question.kind.likert_scale()?;
    let values: Vec<i64> = answers
        .iter()
        .filter(|a| a.question == question.id)
        .filter_map(|a| a.number)
        .filter(|v| (1..=scale).contains(v))
        .collect();
    likert_mean(&values)
}

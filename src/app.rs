use log::{debug, info};

use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::Path;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::Value as JSValue;

use survey_core::*;

use crate::app::spec_reader::*;
use crate::app::store::{NewAnswer, NewQuestion, NewSurvey, Store};
use crate::args::{Args, Command};

pub mod store;

#[derive(Debug, Snafu)]
pub enum AppError {
    #[snafu(display("Error opening file {path}"))]
    OpeningFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON file {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error writing output file {path}"))]
    WritingOutput {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Store error"))]
    Store { source: rusqlite::Error },
    #[snafu(display("Unknown survey {id}"))]
    UnknownSurvey { id: u64 },
    #[snafu(display("Unknown organizational unit {id}"))]
    UnknownUnit { id: u64 },
    #[snafu(display(
        "A response was already recorded for identity {identity} on survey {survey}"
    ))]
    DuplicateResponse { survey: u64, identity: u64 },
    #[snafu(display("Sampling rejected: {source}"))]
    Sampling { source: CoreError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type AppResult<T> = Result<T, AppError>;

pub fn run(args: &Args) -> AppResult<()> {
    let mut store = Store::open(Path::new(&args.db))?;
    match &args.command {
        Command::Init => {
            info!("init: schema ready in {}", args.db);
            Ok(())
        }
        Command::Import { population } => {
            let js = import_population(&mut store, population)?;
            write_output(&None, &js)
        }
        Command::Define { survey } => {
            let js = define_survey(&mut store, survey)?;
            write_output(&None, &js)
        }
        Command::Sample {
            survey,
            filter,
            percent,
            out,
        } => {
            let spec = match filter {
                Some(path) => read_filter_spec(path)?,
                None => FilterSpec::default(),
            };
            let js = sample_roster(&mut store, *survey, &spec, percent.unwrap_or(100.0))?;
            write_output(out, &js)
        }
        Command::Submit {
            survey,
            identity,
            answers,
        } => {
            let parsed = read_answers(answers)?;
            store.submit_response(*survey, *identity, &parsed)?;
            write_output(
                &None,
                &json!({"survey": survey, "identity": identity, "recorded": true}),
            )
        }
        Command::Results {
            survey,
            filter,
            out,
        } => {
            let spec = match filter {
                Some(path) => Some(read_filter_spec(path)?),
                None => None,
            };
            let js = tabulate_survey(&store, *survey, spec.as_ref())?;
            write_output(out, &js)
        }
        Command::Waves { survey, out } => {
            let js = wave_series(&store, *survey)?;
            write_output(out, &js)
        }
        Command::RemoveUnit { unit } => {
            let deactivated = store.remove_unit(*unit)?;
            write_output(
                &None,
                &json!({"unit": unit, "removed": true, "deactivated": deactivated}),
            )
        }
    }
}

pub mod spec_reader {
    use crate::app::*;

    /// A filter specification, as read from a JSON file. Every field is
    /// optional; an empty document matches the entire active population.
    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
    pub struct FilterSpecFile {
        pub divisions: Option<Vec<u64>>,
        pub departments: Option<Vec<u64>>,
        pub services: Option<Vec<u64>>,
        pub teams: Option<Vec<u64>>,
        pub sex: Option<Vec<String>>,
        #[serde(rename = "jobFunctions")]
        pub job_functions: Option<Vec<String>>,
        #[serde(rename = "workLocations")]
        pub work_locations: Option<Vec<String>>,
        #[serde(rename = "contractTypes")]
        pub contract_types: Option<Vec<String>>,
        #[serde(rename = "workTimes")]
        pub work_times: Option<Vec<String>>,
        #[serde(rename = "costCenters")]
        pub cost_centers: Option<Vec<String>>,
        #[serde(rename = "ageMin")]
        pub age_min: Option<u32>,
        #[serde(rename = "ageMax")]
        pub age_max: Option<u32>,
        #[serde(rename = "tenureMin")]
        pub tenure_min: Option<u32>,
        #[serde(rename = "tenureMax")]
        pub tenure_max: Option<u32>,
    }

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct PersonFile {
        pub division: Option<String>,
        pub department: Option<String>,
        pub service: Option<String>,
        pub team: Option<String>,
        pub sex: Option<String>,
        #[serde(rename = "jobFunction")]
        pub job_function: Option<String>,
        #[serde(rename = "workLocation")]
        pub work_location: Option<String>,
        #[serde(rename = "contractType")]
        pub contract_type: Option<String>,
        #[serde(rename = "workTime")]
        pub work_time: Option<String>,
        #[serde(rename = "costCenter")]
        pub cost_center: Option<String>,
        #[serde(rename = "birthDate")]
        pub birth_date: Option<String>,
        #[serde(rename = "hireDate")]
        pub hire_date: Option<String>,
        /// When absent, an opaque token is minted from the import seed.
        pub token: Option<String>,
    }

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct PopulationFile {
        /// Import-scoped seed for token minting.
        pub seed: Option<String>,
        pub identities: Vec<PersonFile>,
    }

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct QuestionFile {
        pub code: Option<String>,
        pub label: String,
        /// singleChoice | multiChoice | likert10 | likert5 | freeText
        pub kind: String,
        pub options: Option<Vec<String>>,
    }

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct SurveyFile {
        pub title: String,
        /// draft | open | closed (default open)
        pub status: Option<String>,
        pub group: Option<u64>,
        pub wave: Option<u32>,
        pub questions: Vec<QuestionFile>,
    }

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct AnswerFile {
        pub question: u64,
        pub options: Option<Vec<u64>>,
        pub number: Option<i64>,
        pub text: Option<String>,
    }

    pub fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> AppResult<T> {
        let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })
    }

    pub fn validate_filter(f: &FilterSpecFile) -> FilterSpec {
        let units = |v: &Option<Vec<u64>>| {
            v.as_ref()
                .map(|ids| ids.iter().map(|i| UnitId(*i)).collect::<Vec<_>>())
        };
        FilterSpec {
            divisions: units(&f.divisions),
            departments: units(&f.departments),
            services: units(&f.services),
            teams: units(&f.teams),
            sex: f.sex.clone(),
            job_functions: f.job_functions.clone(),
            work_locations: f.work_locations.clone(),
            contract_types: f.contract_types.clone(),
            work_times: f.work_times.clone(),
            cost_centers: f.cost_centers.clone(),
            age_min: f.age_min,
            age_max: f.age_max,
            tenure_min: f.tenure_min,
            tenure_max: f.tenure_max,
        }
    }

    pub fn validate_kind(kind: &str) -> AppResult<QuestionKind> {
        match kind {
            "singleChoice" => Ok(QuestionKind::SingleChoice),
            "multiChoice" => Ok(QuestionKind::MultiChoice),
            "likert10" => Ok(QuestionKind::Likert10),
            "likert5" => Ok(QuestionKind::Likert5),
            "freeText" => Ok(QuestionKind::FreeText),
            x => whatever!("Unknown question kind {:?}", x),
        }
    }

    pub fn validate_status(status: &Option<String>) -> AppResult<SurveyStatus> {
        match status.as_deref() {
            None | Some("open") => Ok(SurveyStatus::Open),
            Some("draft") => Ok(SurveyStatus::Draft),
            Some("closed") => Ok(SurveyStatus::Closed),
            Some(x) => whatever!("Unknown survey status {:?}", x),
        }
    }

    pub fn parse_date(s: &Option<String>) -> AppResult<Option<NaiveDate>> {
        match s {
            None => Ok(None),
            Some(d) => match NaiveDate::parse_from_str(d, "%Y-%m-%d") {
                Ok(date) => Ok(Some(date)),
                Err(e) => whatever!("Cannot parse date {:?}: {}", d, e),
            },
        }
    }
}

pub fn read_filter_spec(path: &str) -> AppResult<FilterSpec> {
    let f: FilterSpecFile = read_json(path)?;
    debug!("read_filter_spec: {:?}", f);
    Ok(validate_filter(&f))
}

fn read_answers(path: &str) -> AppResult<Vec<NewAnswer>> {
    let parsed: Vec<AnswerFile> = read_json(path)?;
    Ok(parsed
        .iter()
        .map(|a| NewAnswer {
            question: a.question,
            selected: a.options.clone().unwrap_or_default(),
            number: a.number,
            text: a.text.clone(),
        })
        .collect())
}

/// Bulk-creates the identities described by a population file: units are
/// created on first sight, tokens minted when absent.
pub fn import_population(store: &mut Store, path: &str) -> AppResult<JSValue> {
    let pop: PopulationFile = read_json(path)?;
    let seed = pop.seed.clone().unwrap_or_else(|| "pulsetab".to_string());
    let offset = store.next_identity_id()?;

    let mut identities: Vec<Identity> = Vec::with_capacity(pop.identities.len());
    for (idx, p) in pop.identities.iter().enumerate() {
        let mut units = OrgPath::default();
        let mut parent: Option<UnitId> = None;
        for (level, name) in [
            (UnitLevel::Division, &p.division),
            (UnitLevel::Department, &p.department),
            (UnitLevel::Service, &p.service),
            (UnitLevel::Team, &p.team),
        ] {
            // A level can only be attached under its parent level.
            let unit = match name {
                Some(n) => Some(store.ensure_unit(n, level, parent)?),
                None => None,
            };
            match level {
                UnitLevel::Division => units.division = unit,
                UnitLevel::Department => units.department = unit,
                UnitLevel::Service => units.service = unit,
                UnitLevel::Team => units.team = unit,
            }
            parent = unit;
            if unit.is_none() {
                break;
            }
        }
        let id = offset + idx as u64;
        identities.push(Identity {
            id: IdentityId(id),
            token: p
                .token
                .clone()
                .unwrap_or_else(|| mint_token(seed.as_str(), id)),
            units,
            demographics: Demographics {
                sex: p.sex.clone(),
                job_function: p.job_function.clone(),
                work_location: p.work_location.clone(),
                contract_type: p.contract_type.clone(),
                work_time: p.work_time.clone(),
                cost_center: p.cost_center.clone(),
                birth_date: parse_date(&p.birth_date)?,
                hire_date: parse_date(&p.hire_date)?,
            },
            active: true,
        });
    }
    store.insert_identities(&identities)?;
    info!("import_population: {} identities", identities.len());
    Ok(json!({"imported": identities.len()}))
}

pub fn define_survey(store: &mut Store, path: &str) -> AppResult<JSValue> {
    let f: SurveyFile = read_json(path)?;
    let mut questions: Vec<NewQuestion> = Vec::with_capacity(f.questions.len());
    for q in f.questions.iter() {
        let kind = validate_kind(q.kind.as_str())?;
        if kind.is_choice() && q.options.as_ref().map(|o| o.is_empty()).unwrap_or(true) {
            whatever!("Choice question {:?} has no options", q.label);
        }
        questions.push(NewQuestion {
            code: q.code.clone(),
            label: q.label.clone(),
            kind,
            options: q.options.clone().unwrap_or_default(),
        });
    }
    let survey = NewSurvey {
        title: f.title.clone(),
        status: validate_status(&f.status)?,
        group: f.group.map(GroupId),
        wave: f.wave,
        questions,
    };
    let id = store.create_survey(&survey)?;
    Ok(json!({"survey": id.0, "questions": survey.questions.len()}))
}

/// Filters the active population, samples the requested percentage and
/// persists the resulting roster in one transaction.
pub fn sample_roster(
    store: &mut Store,
    survey: u64,
    spec: &FilterSpec,
    percent: f64,
) -> AppResult<JSValue> {
    // Fail early on unknown surveys rather than after the fetch.
    let instance = store.load_survey(survey)?;
    let today = Local::now().date_naive();
    let population = store.fetch_identities(&build_predicates(spec), today)?;
    let ids = sample(&population, percent).context(SamplingSnafu)?;
    store.replace_roster(survey, &ids)?;
    info!(
        "sample_roster: survey {} population {} -> roster {}",
        survey,
        population.len(),
        ids.len()
    );
    Ok(json!({
        "survey": instance.id.0,
        "title": instance.title,
        "populationSize": population.len(),
        "percent": percent,
        "rosterSize": ids.len(),
    }))
}

/// Tabulates one survey instance, applying the optional demographic
/// sub-filter to the responses before the anonymity check.
pub fn tabulate_survey(
    store: &Store,
    survey: u64,
    spec: Option<&FilterSpec>,
) -> AppResult<JSValue> {
    let instance = store.load_survey(survey)?;
    let questions = store.load_questions(survey)?;
    let mut responses = store.load_responses(survey)?;
    let answers = store.load_answers(survey)?;
    if let Some(spec) = spec {
        let identities = store.load_identities_map()?;
        let today = Local::now().date_naive();
        responses = filter_responses(&responses, &identities, spec, today);
    }
    let results = aggregate(&questions, &responses, &answers);
    Ok(results_to_json(&instance, &results))
}

/// Builds the aligned wave series for the tracking group of a survey. A
/// survey without a group is reported as a single-instance series.
pub fn wave_series(store: &Store, survey: u64) -> AppResult<JSValue> {
    let instance = store.load_survey(survey)?;
    let instances = match instance.group {
        Some(g) => store.load_group(g)?,
        None => vec![instance.clone()],
    };
    let mut waves: Vec<WaveData> = Vec::with_capacity(instances.len());
    for s in instances {
        let questions = store.load_questions(s.id.0)?;
        let respondents = store.count_responses(s.id.0)?;
        let answers = store.load_answers(s.id.0)?;
        waves.push(WaveData {
            survey: s,
            questions,
            respondents,
            answers,
        });
    }
    let series = align_waves(SurveyId(survey), &waves);
    Ok(waves_to_json(&instance, &series))
}

fn kind_str(kind: QuestionKind) -> &'static str {
    match kind {
        QuestionKind::SingleChoice => "singleChoice",
        QuestionKind::MultiChoice => "multiChoice",
        QuestionKind::Likert10 => "likert10",
        QuestionKind::Likert5 => "likert5",
        QuestionKind::FreeText => "freeText",
    }
}

fn results_to_json(instance: &SurveyInstance, results: &SurveyResults) -> JSValue {
    match results {
        SurveyResults::Blocked {
            respondents,
            reason,
        } => json!({
            "survey": instance.id.0,
            "title": instance.title,
            "blocked": true,
            "respondents": respondents,
            "reason": reason,
        }),
        SurveyResults::Tabulated {
            respondents,
            questions,
        } => {
            let mut qs: Vec<JSValue> = Vec::new();
            for q in questions.iter() {
                let stats = match &q.stats {
                    QuestionStats::Choice { answered, tallies } => {
                        let options: Vec<JSValue> = tallies
                            .iter()
                            .map(|t| {
                                json!({
                                    "option": t.option.0,
                                    "label": t.label,
                                    "count": t.count,
                                    "percent": t.percent,
                                })
                            })
                            .collect();
                        json!({"answered": answered, "options": options})
                    }
                    QuestionStats::Likert {
                        answered,
                        histogram,
                        mean,
                    } => {
                        let buckets: Vec<JSValue> = histogram
                            .iter()
                            .map(|(value, count)| json!({"value": value, "count": count}))
                            .collect();
                        json!({"answered": answered, "histogram": buckets, "mean": mean})
                    }
                    QuestionStats::Text { answered, texts } => {
                        json!({"answered": answered, "texts": texts})
                    }
                };
                qs.push(json!({
                    "question": q.question.0,
                    "code": q.code,
                    "label": q.label,
                    "kind": kind_str(q.kind),
                    "stats": stats,
                }));
            }
            json!({
                "survey": instance.id.0,
                "title": instance.title,
                "blocked": false,
                "respondents": respondents,
                "questions": qs,
            })
        }
    }
}

fn waves_to_json(instance: &SurveyInstance, series: &WaveSeries) -> JSValue {
    let questions: Vec<JSValue> = series
        .reference
        .iter()
        .map(|q| json!({"question": q.question.0, "code": q.code, "label": q.label}))
        .collect();
    let points: Vec<JSValue> = series
        .points
        .iter()
        .map(|p| {
            json!({
                "survey": p.survey.0,
                "wave": p.wave,
                "respondents": p.respondents,
                "blocked": p.blocked,
                // Nulls mean "no data" and must not be charted as zero.
                "values": p.values,
            })
        })
        .collect();
    json!({
        "survey": instance.id.0,
        "group": instance.group.map(|g| g.0),
        "questions": questions,
        "waves": points,
        "trends": series.trends,
    })
}

fn write_output(out: &Option<String>, js: &JSValue) -> AppResult<()> {
    let pretty = match serde_json::to_string_pretty(js) {
        Ok(s) => s,
        Err(e) => whatever!("Cannot render output: {}", e),
    };
    match out {
        Some(path) if path != "stdout" => {
            fs::write(path, pretty).context(WritingOutputSnafu { path })
        }
        _ => {
            println!("{}", pretty);
            Ok(())
        }
    }
}

use log::{debug, warn};

use snafu::prelude::*;

use std::collections::HashSet;
use std::path::Path;

use chrono::{NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use survey_core::*;

use crate::app::{
    AppResult, DuplicateResponseSnafu, StoreSnafu, UnknownSurveySnafu, UnknownUnitSnafu,
};

/// A survey definition as accepted by the store, before ids are assigned.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct NewSurvey {
    pub title: String,
    pub status: SurveyStatus,
    pub group: Option<GroupId>,
    pub wave: Option<u32>,
    pub questions: Vec<NewQuestion>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct NewQuestion {
    pub code: Option<String>,
    pub label: String,
    pub kind: QuestionKind,
    /// Labels in display order. Only meaningful for choice questions.
    pub options: Vec<String>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct NewAnswer {
    pub question: u64,
    pub selected: Vec<u64>,
    pub number: Option<i64>,
    pub text: Option<String>,
}

/// The SQLite persistence layer. One connection, WAL mode, schema created on
/// open.
pub struct Store {
    conn: Connection,
}

const INIT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS org_units (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    level TEXT NOT NULL,
    parent_id INTEGER REFERENCES org_units(id),
    UNIQUE(name, level, parent_id)
);
CREATE TABLE IF NOT EXISTS identities (
    id INTEGER PRIMARY KEY,
    token TEXT NOT NULL UNIQUE,
    division_id INTEGER,
    department_id INTEGER,
    service_id INTEGER,
    team_id INTEGER,
    sex TEXT,
    job_function TEXT,
    work_location TEXT,
    contract_type TEXT,
    work_time TEXT,
    cost_center TEXT,
    birth_date TEXT,
    hire_date TEXT,
    active INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS surveys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    status TEXT NOT NULL,
    group_id INTEGER,
    wave INTEGER,
    UNIQUE(group_id, wave)
);
CREATE TABLE IF NOT EXISTS questions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    survey_id INTEGER NOT NULL REFERENCES surveys(id),
    code TEXT,
    label TEXT NOT NULL,
    kind TEXT NOT NULL,
    position INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS question_options (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question_id INTEGER NOT NULL REFERENCES questions(id),
    label TEXT NOT NULL,
    position INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    survey_id INTEGER NOT NULL REFERENCES surveys(id),
    identity_id INTEGER NOT NULL,
    submitted TEXT NOT NULL,
    UNIQUE(survey_id, identity_id)
);
CREATE TABLE IF NOT EXISTS answers (
    response_id INTEGER NOT NULL REFERENCES responses(id),
    question_id INTEGER NOT NULL,
    option_id INTEGER,
    number INTEGER,
    text TEXT
);
CREATE INDEX IF NOT EXISTS idx_answers_response ON answers(response_id);
CREATE TABLE IF NOT EXISTS rosters (
    survey_id INTEGER NOT NULL,
    identity_id INTEGER NOT NULL,
    PRIMARY KEY (survey_id, identity_id)
);
"#;

fn unit_column(level: UnitLevel) -> &'static str {
    match level {
        UnitLevel::Division => "division_id",
        UnitLevel::Department => "department_id",
        UnitLevel::Service => "service_id",
        UnitLevel::Team => "team_id",
    }
}

fn category_column(cat: Category) -> &'static str {
    match cat {
        Category::Sex => "sex",
        Category::JobFunction => "job_function",
        Category::WorkLocation => "work_location",
        Category::ContractType => "contract_type",
        Category::WorkTime => "work_time",
        Category::CostCenter => "cost_center",
    }
}

fn level_str(level: UnitLevel) -> &'static str {
    match level {
        UnitLevel::Division => "division",
        UnitLevel::Department => "department",
        UnitLevel::Service => "service",
        UnitLevel::Team => "team",
    }
}

fn status_str(status: SurveyStatus) -> &'static str {
    match status {
        SurveyStatus::Draft => "draft",
        SurveyStatus::Open => "open",
        SurveyStatus::Closed => "closed",
    }
}

fn status_from_str(s: &str) -> AppResult<SurveyStatus> {
    match s {
        "draft" => Ok(SurveyStatus::Draft),
        "open" => Ok(SurveyStatus::Open),
        "closed" => Ok(SurveyStatus::Closed),
        x => whatever!("Corrupted survey status in store: {:?}", x),
    }
}

fn kind_str(kind: QuestionKind) -> &'static str {
    match kind {
        QuestionKind::SingleChoice => "single_choice",
        QuestionKind::MultiChoice => "multi_choice",
        QuestionKind::Likert10 => "likert10",
        QuestionKind::Likert5 => "likert5",
        QuestionKind::FreeText => "free_text",
    }
}

fn kind_from_str(s: &str) -> AppResult<QuestionKind> {
    match s {
        "single_choice" => Ok(QuestionKind::SingleChoice),
        "multi_choice" => Ok(QuestionKind::MultiChoice),
        "likert10" => Ok(QuestionKind::Likert10),
        "likert5" => Ok(QuestionKind::Likert5),
        "free_text" => Ok(QuestionKind::FreeText),
        x => whatever!("Corrupted question kind in store: {:?}", x),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation)
}

impl Store {
    pub fn open(path: &Path) -> AppResult<Store> {
        let conn = Connection::open(path).context(StoreSnafu)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context(StoreSnafu)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context(StoreSnafu)?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))
            .context(StoreSnafu)?;
        conn.execute_batch(INIT_SCHEMA).context(StoreSnafu)?;
        Ok(Store { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> AppResult<Store> {
        let conn = Connection::open_in_memory().context(StoreSnafu)?;
        conn.execute_batch(INIT_SCHEMA).context(StoreSnafu)?;
        Ok(Store { conn })
    }

    // ******** identities and organization ********

    /// Returns the unit with this name under this parent, creating it if
    /// needed. Unit names are unique per level and parent, not globally.
    pub fn ensure_unit(
        &mut self,
        name: &str,
        level: UnitLevel,
        parent: Option<UnitId>,
    ) -> AppResult<UnitId> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM org_units WHERE name = ?1 AND level = ?2 AND parent_id IS ?3",
                params![name, level_str(level), parent.map(|p| p.0 as i64)],
                |row| row.get(0),
            )
            .optional()
            .context(StoreSnafu)?;
        if let Some(id) = existing {
            return Ok(UnitId(id as u64));
        }
        self.conn
            .execute(
                "INSERT INTO org_units (name, level, parent_id) VALUES (?1, ?2, ?3)",
                params![name, level_str(level), parent.map(|p| p.0 as i64)],
            )
            .context(StoreSnafu)?;
        Ok(UnitId(self.conn.last_insert_rowid() as u64))
    }

    /// Deletes a unit and its whole subtree, deactivating every identity
    /// attached to any of the removed units. Returns the number of
    /// deactivated identities.
    pub fn remove_unit(&mut self, unit: u64) -> AppResult<usize> {
        let tx = self.conn.transaction().context(StoreSnafu)?;
        let subtree: Vec<i64> = {
            let mut stmt = tx
                .prepare(
                    "WITH RECURSIVE subtree(id) AS (
                         SELECT id FROM org_units WHERE id = ?1
                         UNION
                         SELECT o.id FROM org_units o JOIN subtree s ON o.parent_id = s.id
                     ) SELECT id FROM subtree",
                )
                .context(StoreSnafu)?;
            let rows = stmt
                .query_map(params![unit as i64], |row| row.get(0))
                .context(StoreSnafu)?;
            rows.collect::<Result<Vec<i64>, _>>().context(StoreSnafu)?
        };
        ensure!(!subtree.is_empty(), UnknownUnitSnafu { id: unit });
        let marks = placeholders(subtree.len());
        let clause = UnitLevel::ALL
            .iter()
            .map(|l| format!("{} IN ({})", unit_column(*l), marks))
            .collect::<Vec<_>>()
            .join(" OR ");
        let mut unit_params: Vec<Value> = Vec::new();
        for _ in UnitLevel::ALL {
            unit_params.extend(subtree.iter().map(|id| Value::from(*id)));
        }
        let deactivated = tx
            .execute(
                format!("UPDATE identities SET active = 0 WHERE {}", clause).as_str(),
                params_from_iter(unit_params),
            )
            .context(StoreSnafu)?;
        tx.execute(
            format!("DELETE FROM org_units WHERE id IN ({})", marks).as_str(),
            params_from_iter(subtree.iter().map(|id| Value::from(*id))),
        )
        .context(StoreSnafu)?;
        tx.commit().context(StoreSnafu)?;
        debug!(
            "remove_unit: {} units removed, {} identities deactivated",
            subtree.len(),
            deactivated
        );
        Ok(deactivated)
    }

    /// The next unused identity id. Imports assign ids explicitly so tokens
    /// can be minted from them before the insert.
    pub fn next_identity_id(&self) -> AppResult<u64> {
        let max: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(id), 0) FROM identities", [], |row| {
                row.get(0)
            })
            .context(StoreSnafu)?;
        Ok(max as u64 + 1)
    }

    pub fn insert_identities(&mut self, identities: &[Identity]) -> AppResult<()> {
        let tx = self.conn.transaction().context(StoreSnafu)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO identities (id, token,
                         division_id, department_id, service_id, team_id,
                         sex, job_function, work_location, contract_type,
                         work_time, cost_center, birth_date, hire_date, active)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                )
                .context(StoreSnafu)?;
            for i in identities {
                stmt.execute(params![
                    i.id.0 as i64,
                    i.token,
                    i.units.division.map(|u| u.0 as i64),
                    i.units.department.map(|u| u.0 as i64),
                    i.units.service.map(|u| u.0 as i64),
                    i.units.team.map(|u| u.0 as i64),
                    i.demographics.sex,
                    i.demographics.job_function,
                    i.demographics.work_location,
                    i.demographics.contract_type,
                    i.demographics.work_time,
                    i.demographics.cost_center,
                    i.demographics.birth_date,
                    i.demographics.hire_date,
                    i.active,
                ])
                .context(StoreSnafu)?;
            }
        }
        tx.commit().context(StoreSnafu)
    }

    /// The demographic columns actually present in the identities table.
    /// Populations are routinely provisioned with a subset of the columns, so
    /// the reader degrades instead of failing.
    fn provisioned_columns(&self) -> AppResult<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("PRAGMA table_info(identities)")
            .context(StoreSnafu)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .context(StoreSnafu)?;
        rows.collect::<Result<HashSet<String>, _>>()
            .context(StoreSnafu)
    }

    fn identity_select(&self, provisioned: &HashSet<String>) -> String {
        let mut cols: Vec<String> = vec!["id".to_string(), "token".to_string()];
        for level in UnitLevel::ALL {
            cols.push(unit_column(level).to_string());
        }
        let demographic: Vec<&str> = Category::ALL
            .iter()
            .map(|c| category_column(*c))
            .chain(["birth_date", "hire_date"])
            .collect();
        for col in demographic {
            // Unprovisioned columns read back as "no value".
            if provisioned.contains(col) {
                cols.push(col.to_string());
            } else {
                cols.push(format!("NULL AS {}", col));
            }
        }
        cols.push("active".to_string());
        format!("SELECT {} FROM identities", cols.join(", "))
    }

    fn row_to_identity(row: &rusqlite::Row) -> rusqlite::Result<Identity> {
        let unit = |v: Option<i64>| v.map(|u| UnitId(u as u64));
        Ok(Identity {
            id: IdentityId(row.get::<_, i64>(0)? as u64),
            token: row.get(1)?,
            units: OrgPath {
                division: unit(row.get(2)?),
                department: unit(row.get(3)?),
                service: unit(row.get(4)?),
                team: unit(row.get(5)?),
            },
            demographics: Demographics {
                sex: row.get(6)?,
                job_function: row.get(7)?,
                work_location: row.get(8)?,
                contract_type: row.get(9)?,
                work_time: row.get(10)?,
                cost_center: row.get(11)?,
                birth_date: row.get::<_, Option<NaiveDate>>(12)?,
                hire_date: row.get::<_, Option<NaiveDate>>(13)?,
            },
            active: row.get(14)?,
        })
    }

    fn query_identities(
        &self,
        provisioned: &HashSet<String>,
        where_sql: &str,
        query_params: Vec<Value>,
    ) -> AppResult<Vec<Identity>> {
        let sql = format!(
            "{} WHERE {} ORDER BY id",
            self.identity_select(provisioned),
            where_sql
        );
        let mut stmt = self.conn.prepare(sql.as_str()).context(StoreSnafu)?;
        let rows = stmt
            .query_map(params_from_iter(query_params), Store::row_to_identity)
            .context(StoreSnafu)?;
        rows.collect::<Result<Vec<Identity>, _>>()
            .context(StoreSnafu)
    }

    /// Fetches the active identities matching the predicates. Inclusion lists
    /// are pushed down as SQL `IN` clauses; the date-derived predicates are
    /// applied in memory on the fetched rows.
    pub fn fetch_identities(
        &self,
        preds: &[Predicate],
        today: NaiveDate,
    ) -> AppResult<Vec<Identity>> {
        let (pushable, residual) = split_predicates(preds.to_vec());
        let provisioned = self.provisioned_columns()?;
        let mut clauses: Vec<String> = vec!["active = 1".to_string()];
        let mut query_params: Vec<Value> = Vec::new();
        for p in pushable {
            match p {
                Predicate::UnitIn(level, units) => {
                    clauses.push(format!(
                        "{} IN ({})",
                        unit_column(level),
                        placeholders(units.len())
                    ));
                    query_params.extend(units.iter().map(|u| Value::from(u.0 as i64)));
                }
                Predicate::CategoryIn(cat, values) => {
                    let col = category_column(cat);
                    if !provisioned.contains(col) {
                        // Degrade to the filters the schema supports instead
                        // of failing or emptying the whole query.
                        warn!(
                            "fetch_identities: column {} not provisioned, constraint dropped",
                            col
                        );
                        continue;
                    }
                    clauses.push(format!("{} IN ({})", col, placeholders(values.len())));
                    query_params.extend(values.into_iter().map(Value::from));
                }
                _ => {}
            }
        }
        // Schema-level absence drops the constraint; a NULL value on a
        // provisioned column still excludes the record below.
        let residual: Vec<Predicate> = residual
            .into_iter()
            .filter(|p| {
                let col = match p {
                    Predicate::AgeBetween(_, _) => "birth_date",
                    Predicate::TenureBetween(_, _) => "hire_date",
                    _ => return true,
                };
                if provisioned.contains(col) {
                    true
                } else {
                    warn!(
                        "fetch_identities: column {} not provisioned, constraint dropped",
                        col
                    );
                    false
                }
            })
            .collect();
        let fetched =
            self.query_identities(&provisioned, clauses.join(" AND ").as_str(), query_params)?;
        debug!(
            "fetch_identities: {} fetched, {} residual predicates",
            fetched.len(),
            residual.len()
        );
        Ok(fetched
            .into_iter()
            .filter(|i| matches_residual(i, &residual, today))
            .collect())
    }

    /// Every identity record, active or not, keyed by id. Response slices may
    /// reference identities that were deactivated after submitting.
    pub fn load_identities_map(
        &self,
    ) -> AppResult<std::collections::HashMap<IdentityId, Identity>> {
        let provisioned = self.provisioned_columns()?;
        let all = self.query_identities(&provisioned, "1 = 1", Vec::new())?;
        Ok(all.into_iter().map(|i| (i.id, i)).collect())
    }

    // ******** surveys and questions ********

    pub fn create_survey(&mut self, survey: &NewSurvey) -> AppResult<SurveyId> {
        let tx = self.conn.transaction().context(StoreSnafu)?;
        let inserted = tx.execute(
            "INSERT INTO surveys (title, status, group_id, wave) VALUES (?1, ?2, ?3, ?4)",
            params![
                survey.title,
                status_str(survey.status),
                survey.group.map(|g| g.0 as i64),
                survey.wave,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                whatever!(
                    "Wave {:?} of group {:?} already exists",
                    survey.wave,
                    survey.group
                );
            }
            Err(e) => return Err(e).context(StoreSnafu),
        }
        let survey_id = tx.last_insert_rowid();
        for (pos, q) in survey.questions.iter().enumerate() {
            tx.execute(
                "INSERT INTO questions (survey_id, code, label, kind, position)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![survey_id, q.code, q.label, kind_str(q.kind), pos as i64],
            )
            .context(StoreSnafu)?;
            let question_id = tx.last_insert_rowid();
            for (opos, label) in q.options.iter().enumerate() {
                tx.execute(
                    "INSERT INTO question_options (question_id, label, position)
                     VALUES (?1, ?2, ?3)",
                    params![question_id, label, opos as i64],
                )
                .context(StoreSnafu)?;
            }
        }
        tx.commit().context(StoreSnafu)?;
        Ok(SurveyId(survey_id as u64))
    }

    pub fn load_survey(&self, survey: u64) -> AppResult<SurveyInstance> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, status, group_id, wave FROM surveys WHERE id = ?1",
                params![survey as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<u32>>(4)?,
                    ))
                },
            )
            .optional()
            .context(StoreSnafu)?;
        let (id, title, status, group, wave) =
            row.context(UnknownSurveySnafu { id: survey })?;
        Ok(SurveyInstance {
            id: SurveyId(id as u64),
            title,
            status: status_from_str(status.as_str())?,
            group: group.map(|g| GroupId(g as u64)),
            wave,
        })
    }

    /// The instances of a tracking group, ordered by wave number.
    pub fn load_group(&self, group: GroupId) -> AppResult<Vec<SurveyInstance>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, status, group_id, wave FROM surveys
                 WHERE group_id = ?1 ORDER BY wave",
            )
            .context(StoreSnafu)?;
        let rows = stmt
            .query_map(params![group.0 as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<u32>>(4)?,
                ))
            })
            .context(StoreSnafu)?;
        let mut out: Vec<SurveyInstance> = Vec::new();
        for row in rows {
            let (id, title, status, wave) = row.context(StoreSnafu)?;
            out.push(SurveyInstance {
                id: SurveyId(id as u64),
                title,
                status: status_from_str(status.as_str())?,
                group: Some(group),
                wave,
            });
        }
        Ok(out)
    }

    pub fn load_questions(&self, survey: u64) -> AppResult<Vec<Question>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, code, label, kind FROM questions
                 WHERE survey_id = ?1 ORDER BY position",
            )
            .context(StoreSnafu)?;
        let rows = stmt
            .query_map(params![survey as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context(StoreSnafu)?;
        let mut questions: Vec<Question> = Vec::new();
        for row in rows {
            let (id, code, label, kind) = row.context(StoreSnafu)?;
            questions.push(Question {
                id: QuestionId(id as u64),
                survey: SurveyId(survey),
                code,
                label,
                kind: kind_from_str(kind.as_str())?,
                options: self.load_options(id)?,
            });
        }
        Ok(questions)
    }

    fn load_options(&self, question: i64) -> AppResult<Vec<ChoiceOption>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, label FROM question_options
                 WHERE question_id = ?1 ORDER BY position",
            )
            .context(StoreSnafu)?;
        let rows = stmt
            .query_map(params![question], |row| {
                Ok(ChoiceOption {
                    id: OptionId(row.get::<_, i64>(0)? as u64),
                    label: row.get(1)?,
                })
            })
            .context(StoreSnafu)?;
        rows.collect::<Result<Vec<ChoiceOption>, _>>()
            .context(StoreSnafu)
    }

    // ******** rosters ********

    /// Replaces the roster of a survey in one transaction. Re-sampling never
    /// accumulates on top of a previous roster.
    pub fn replace_roster(&mut self, survey: u64, ids: &[IdentityId]) -> AppResult<()> {
        let tx = self.conn.transaction().context(StoreSnafu)?;
        tx.execute(
            "DELETE FROM rosters WHERE survey_id = ?1",
            params![survey as i64],
        )
        .context(StoreSnafu)?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO rosters (survey_id, identity_id) VALUES (?1, ?2)")
                .context(StoreSnafu)?;
            for id in ids {
                stmt.execute(params![survey as i64, id.0 as i64])
                    .context(StoreSnafu)?;
            }
        }
        tx.commit().context(StoreSnafu)
    }

    pub fn roster_size(&self, survey: u64) -> AppResult<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM rosters WHERE survey_id = ?1",
                params![survey as i64],
                |row| row.get(0),
            )
            .context(StoreSnafu)?;
        Ok(count as usize)
    }

    // ******** responses and answers ********

    /// Records one submission. At most one response per identity per survey:
    /// a second submission is rejected and the original is kept.
    pub fn submit_response(
        &mut self,
        survey: u64,
        identity: u64,
        answers: &[NewAnswer],
    ) -> AppResult<ResponseId> {
        self.load_survey(survey)?;
        let tx = self.conn.transaction().context(StoreSnafu)?;
        let inserted = tx.execute(
            "INSERT INTO responses (survey_id, identity_id, submitted) VALUES (?1, ?2, ?3)",
            params![survey as i64, identity as i64, Utc::now().to_rfc3339()],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return DuplicateResponseSnafu { survey, identity }.fail();
            }
            Err(e) => return Err(e).context(StoreSnafu),
        }
        let response_id = tx.last_insert_rowid();
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO answers (response_id, question_id, option_id, number, text)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .context(StoreSnafu)?;
            for a in answers {
                if a.selected.is_empty() {
                    stmt.execute(params![
                        response_id,
                        a.question as i64,
                        None::<i64>,
                        a.number,
                        a.text,
                    ])
                    .context(StoreSnafu)?;
                } else {
                    // One row per selected option.
                    for opt in a.selected.iter() {
                        stmt.execute(params![
                            response_id,
                            a.question as i64,
                            *opt as i64,
                            a.number,
                            a.text,
                        ])
                        .context(StoreSnafu)?;
                    }
                }
            }
        }
        tx.commit().context(StoreSnafu)?;
        Ok(ResponseId(response_id as u64))
    }

    pub fn count_responses(&self, survey: u64) -> AppResult<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM responses WHERE survey_id = ?1",
                params![survey as i64],
                |row| row.get(0),
            )
            .context(StoreSnafu)?;
        Ok(count as usize)
    }

    pub fn load_responses(&self, survey: u64) -> AppResult<Vec<Response>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, identity_id FROM responses WHERE survey_id = ?1 ORDER BY id")
            .context(StoreSnafu)?;
        let rows = stmt
            .query_map(params![survey as i64], |row| {
                Ok(Response {
                    id: ResponseId(row.get::<_, i64>(0)? as u64),
                    survey: SurveyId(survey),
                    identity: IdentityId(row.get::<_, i64>(1)? as u64),
                })
            })
            .context(StoreSnafu)?;
        rows.collect::<Result<Vec<Response>, _>>().context(StoreSnafu)
    }

    /// Loads the answers of a survey, folding the per-option rows of
    /// multi-choice answers back into one [Answer] per (response, question).
    pub fn load_answers(&self, survey: u64) -> AppResult<Vec<Answer>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT a.response_id, a.question_id, a.option_id, a.number, a.text
                 FROM answers a JOIN responses r ON r.id = a.response_id
                 WHERE r.survey_id = ?1
                 ORDER BY a.response_id, a.question_id",
            )
            .context(StoreSnafu)?;
        let rows = stmt
            .query_map(params![survey as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .context(StoreSnafu)?;
        let mut answers: Vec<Answer> = Vec::new();
        for row in rows {
            let (response, question, option, number, text) = row.context(StoreSnafu)?;
            let key = (ResponseId(response as u64), QuestionId(question as u64));
            match answers.last_mut() {
                Some(last) if (last.response, last.question) == key => {
                    if let Some(o) = option {
                        last.selected.push(OptionId(o as u64));
                    }
                }
                _ => answers.push(Answer {
                    response: key.0,
                    question: key.1,
                    selected: option.map(|o| OptionId(o as u64)).into_iter().collect(),
                    number,
                    text,
                }),
            }
        }
        Ok(answers)
    }
}

// ********* Input data structures ***********

use std::error::Error;
use std::fmt::Display;

use chrono::NaiveDate;

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct IdentityId(pub u64);

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct UnitId(pub u64);

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct SurveyId(pub u64);

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct GroupId(pub u64);

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd, Default)]
pub struct QuestionId(pub u64);

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct OptionId(pub u64);

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd, Default)]
pub struct ResponseId(pub u64);

/// The four levels of the organizational tree, from the top down.
///
/// Every unit references exactly one parent at the level above, except the
/// divisions which are roots.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum UnitLevel {
    Division,
    Department,
    Service,
    Team,
}

impl UnitLevel {
    pub const ALL: [UnitLevel; 4] = [
        UnitLevel::Division,
        UnitLevel::Department,
        UnitLevel::Service,
        UnitLevel::Team,
    ];

    /// The levels below the top one. These are the organizational axes
    /// considered for stratification.
    pub const SUB_LEVELS: [UnitLevel; 3] =
        [UnitLevel::Department, UnitLevel::Service, UnitLevel::Team];
}

/// The categorical demographic attributes that an identity record may carry.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum Category {
    Sex,
    JobFunction,
    WorkLocation,
    ContractType,
    WorkTime,
    CostCenter,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Sex,
        Category::JobFunction,
        Category::WorkLocation,
        Category::ContractType,
        Category::WorkTime,
        Category::CostCenter,
    ];
}

/// The demographic attributes of one identity record. All of them are
/// optional: populations are routinely imported with only a subset of the
/// columns provisioned.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct Demographics {
    pub sex: Option<String>,
    pub job_function: Option<String>,
    pub work_location: Option<String>,
    pub contract_type: Option<String>,
    pub work_time: Option<String>,
    pub cost_center: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub hire_date: Option<NaiveDate>,
}

impl Demographics {
    pub fn category(&self, cat: Category) -> Option<&str> {
        let v = match cat {
            Category::Sex => &self.sex,
            Category::JobFunction => &self.job_function,
            Category::WorkLocation => &self.work_location,
            Category::ContractType => &self.contract_type,
            Category::WorkTime => &self.work_time,
            Category::CostCenter => &self.cost_center,
        };
        v.as_deref()
    }
}

/// The position of an identity in the organizational tree: at most one unit
/// reference per level.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub struct OrgPath {
    pub division: Option<UnitId>,
    pub department: Option<UnitId>,
    pub service: Option<UnitId>,
    pub team: Option<UnitId>,
}

impl OrgPath {
    pub fn at(&self, level: UnitLevel) -> Option<UnitId> {
        match level {
            UnitLevel::Division => self.division,
            UnitLevel::Department => self.department,
            UnitLevel::Service => self.service,
            UnitLevel::Team => self.team,
        }
    }
}

/// One anonymous respondent-eligible entity.
///
/// There is no stored linkage between a person and an identity record: the
/// access token is the only handle, and it is opaque.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Identity {
    pub id: IdentityId,
    pub token: String,
    pub units: OrgPath,
    pub demographics: Demographics,
    /// Identities are deactivated (never deleted) when their unit is removed.
    pub active: bool,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum SurveyStatus {
    Draft,
    Open,
    Closed,
}

/// A single published (or draft/closed) questionnaire run.
///
/// Within one tracking group, wave numbers are unique and ordered.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SurveyInstance {
    pub id: SurveyId,
    pub title: String,
    pub status: SurveyStatus,
    pub group: Option<GroupId>,
    pub wave: Option<u32>,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum QuestionKind {
    SingleChoice,
    MultiChoice,
    Likert10,
    Likert5,
    FreeText,
}

impl QuestionKind {
    /// The upper bound of the Likert scale, when this is a Likert question.
    /// Both scales start at 1.
    pub fn likert_scale(&self) -> Option<i64> {
        match self {
            QuestionKind::Likert10 => Some(10),
            QuestionKind::Likert5 => Some(5),
            _ => None,
        }
    }

    pub fn is_likert(&self) -> bool {
        self.likert_scale().is_some()
    }

    pub fn is_choice(&self) -> bool {
        matches!(self, QuestionKind::SingleChoice | QuestionKind::MultiChoice)
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ChoiceOption {
    pub id: OptionId,
    pub label: String,
}

/// A question of one survey instance.
///
/// The `code` is the stable cross-wave identifier: it is preserved across
/// instances of a tracking group so the same conceptual question can be
/// matched even if its wording or position changes.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Question {
    pub id: QuestionId,
    pub survey: SurveyId,
    pub code: Option<String>,
    pub label: String,
    pub kind: QuestionKind,
    /// Ordered. Empty for non-choice questions.
    pub options: Vec<ChoiceOption>,
}

/// One completed submission: at most one per identity per survey instance.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Response {
    pub id: ResponseId,
    pub survey: SurveyId,
    pub identity: IdentityId,
}

/// One respondent's value for one question. Exactly one of the three payloads
/// is meaningful, as declared by the question kind.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct Answer {
    pub response: ResponseId,
    pub question: QuestionId,
    pub selected: Vec<OptionId>,
    pub number: Option<i64>,
    pub text: Option<String>,
}

/// Derives an opaque access token for the record at `index` of an import.
///
/// Random in this context means hard to guess in advance: the token is a
/// cryptographic digest of the import seed and the record index, so it is
/// stable for a given import and carries no demographic information.
pub fn mint_token(seed: &str, index: u64) -> String {
    sha256::digest(format!("{}{:016}", seed, index))
}

// ******** Errors *********

/// Errors that prevent the engine from completing successfully.
#[derive(PartialEq, Debug, Clone)]
pub enum CoreError {
    /// The sampling percentage must be in (0, 100].
    InvalidPercentage(f64),
}

impl Error for CoreError {}

impl Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::InvalidPercentage(p) => {
                write!(f, "sampling percentage out of (0, 100]: {}", p)
            }
        }
    }
}

//! # Core Types for the Election Store
//!
//! The whole election lives in one [`ElectionDocument`] that is replicated as a
//! single unit. Field names on the wire are the ones used by documents already
//! persisted by deployed installations, so the Rust names below carry explicit
//! serde renames.
//!
//! ## Loading rules
//!
//! - Every collection and every config block is optional on the wire: absent or
//!   `null` values load as their defaults.
//! - A collection stored as anything but an array (the realtime backend turns
//!   sparse arrays into objects) loads as empty, and array elements that do
//!   not decode are skipped. A config block of the wrong shape loads as the
//!   default block.
//! - Identifiers may be JSON numbers (spreadsheet ids); they load as strings.
//! - Comparison between identifiers always goes through [`normalize_id`].
//!
//! ## Usage Examples
//!
//! ```rust
//! use member_vote::types::*;
//!
//! let doc = ElectionDocument::from_json(r#"{"voters":[{"cccd":" 001 ","hoTen":"A"}]}"#).unwrap();
//! assert!(doc.has_data());
//! assert!(doc.find_voter("001").is_some());
//! assert_eq!(doc.config.max_excellent_votes, 5);
//! assert!(doc.ballots_phase1.is_empty());
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Current persisted schema version
pub const SCHEMA_VERSION: u32 = 2;

/// Default limit on Phase 2 selections
pub const DEFAULT_MAX_EXCELLENT_VOTES: u32 = 5;

/// Normalized form of a national id: string form, surrounding whitespace removed.
pub fn normalize_id(raw: &str) -> String {
    raw.trim().to_string()
}

/// Accept strings, numbers, booleans or null where a string is expected.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    })
}

/// Accept numbers or numeric strings; anything else loads as `None`.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => parse_score(&s),
        _ => None,
    })
}

/// Treat an explicit `null` exactly like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode a collection, coercing non-array values to empty.
fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter(|item| !item.is_null())
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    tracing::warn!("Skipping undecodable collection entry: {}", e);
                    None
                }
            })
            .collect(),
        Some(other) => {
            tracing::warn!(
                "Expected an array, found {}; loading an empty collection",
                json_kind(&other)
            );
            Vec::new()
        }
    })
}

/// Decode a block, falling back to its default when the stored shape is wrong.
fn lenient_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => T::default(),
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!("Malformed block replaced by defaults: {}", e);
            T::default()
        }),
    })
}

/// Accept a non-negative integer or a numeric string; anything else loads as 0.
fn lenient_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let count = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => parse_score(&s),
        _ => None,
    };
    Ok(count
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n.min(u32::MAX as f64) as u32)
        .unwrap_or(0))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Parse a score cell, accepting a decimal comma.
pub fn parse_score(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.replace(',', ".").parse().ok()
}

/// The two ballot rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VotingPhase {
    /// Three-level performance rating
    One,
    /// Bounded "excellent member" selection
    Two,
}

impl VotingPhase {
    pub fn number(self) -> u8 {
        match self {
            VotingPhase::One => 1,
            VotingPhase::Two => 2,
        }
    }
}

/// Identity fields shared by voters and candidates
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PersonRecord {
    /// National id, the unique key
    #[serde(rename = "cccd", default, deserialize_with = "lenient_string")]
    pub national_id: String,

    #[serde(rename = "mssv", default, deserialize_with = "lenient_string")]
    pub student_id: String,

    #[serde(rename = "hoTen", default, deserialize_with = "lenient_string")]
    pub full_name: String,

    #[serde(rename = "ngayVaoDang", default, deserialize_with = "lenient_string")]
    pub join_date: String,

    /// Official or probationary member
    #[serde(rename = "loaiDangVien", default, deserialize_with = "lenient_string")]
    pub membership_kind: String,

    #[serde(rename = "nhom", default, deserialize_with = "lenient_string")]
    pub group: String,
}

impl PersonRecord {
    pub fn new(national_id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            national_id: national_id.into(),
            full_name: full_name.into(),
            ..Self::default()
        }
    }

    pub fn normalized_id(&self) -> String {
        normalize_id(&self.national_id)
    }

    pub fn has_id(&self, normalized: &str) -> bool {
        self.national_id.trim() == normalized
    }
}

/// An eligible voter.
///
/// The `has_voted_*` flags are derived state: only the ballot protocol sets
/// them and only resets clear them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Voter {
    #[serde(flatten)]
    pub person: PersonRecord,

    #[serde(rename = "hasVotedPhase1", default, deserialize_with = "null_as_default")]
    pub has_voted_phase1: bool,

    #[serde(rename = "hasVotedPhase2", default, deserialize_with = "null_as_default")]
    pub has_voted_phase2: bool,
}

impl Voter {
    pub fn new(person: PersonRecord) -> Self {
        Self {
            person,
            has_voted_phase1: false,
            has_voted_phase2: false,
        }
    }

    pub fn has_voted(&self, phase: VotingPhase) -> bool {
        match phase {
            VotingPhase::One => self.has_voted_phase1,
            VotingPhase::Two => self.has_voted_phase2,
        }
    }

    pub(crate) fn set_voted(&mut self, phase: VotingPhase, voted: bool) {
        match phase {
            VotingPhase::One => self.has_voted_phase1 = voted,
            VotingPhase::Two => self.has_voted_phase2 = voted,
        }
    }
}

/// Candidate rated in Phase 1
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CandidatePhase1 {
    #[serde(flatten)]
    pub person: PersonRecord,

    /// Cohort / unit
    #[serde(rename = "khoa", default, deserialize_with = "lenient_string")]
    pub cohort: String,

    #[serde(rename = "chucVu", default, deserialize_with = "lenient_string")]
    pub position: String,

    #[serde(
        rename = "diemHT",
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub academic_score: Option<f64>,

    #[serde(
        rename = "diemRL",
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub conduct_score: Option<f64>,

    #[serde(rename = "thanhTich", default, deserialize_with = "lenient_string")]
    pub achievements: String,

    /// Candidate's own assessment of how well duties were fulfilled
    #[serde(rename = "tuDanhGia", default, deserialize_with = "lenient_string")]
    pub self_assessment: String,
}

impl CandidatePhase1 {
    pub fn new(person: PersonRecord) -> Self {
        Self {
            person,
            ..Self::default()
        }
    }
}

/// Candidate selectable in Phase 2
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CandidatePhase2 {
    #[serde(flatten)]
    pub profile: CandidatePhase1,

    /// Completion level proposed by the candidate's unit
    #[serde(rename = "chiBoDeXuat", default, deserialize_with = "lenient_string")]
    pub unit_proposal: String,
}

impl CandidatePhase2 {
    pub fn new(person: PersonRecord) -> Self {
        Self {
            profile: CandidatePhase1::new(person),
            unit_proposal: String::new(),
        }
    }

    pub fn person(&self) -> &PersonRecord {
        &self.profile.person
    }
}

/// Phase 1 performance levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RatingLevel {
    #[serde(rename = "Không hoàn thành")]
    Incomplete,
    #[serde(rename = "Hoàn thành")]
    Complete,
    #[serde(rename = "Hoàn thành tốt")]
    CompleteWell,
}

impl RatingLevel {
    pub const ALL: [RatingLevel; 3] = [
        RatingLevel::Incomplete,
        RatingLevel::Complete,
        RatingLevel::CompleteWell,
    ];

    /// Label used in exports and on the wire
    pub fn label(self) -> &'static str {
        match self {
            RatingLevel::Incomplete => "Không hoàn thành",
            RatingLevel::Complete => "Hoàn thành",
            RatingLevel::CompleteWell => "Hoàn thành tốt",
        }
    }
}

/// One voter's input for one candidate in Phase 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub candidate_id: String,
    pub level: RatingLevel,
}

impl Rating {
    pub fn new(candidate_id: impl Into<String>, level: RatingLevel) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            level,
        }
    }
}

/// Stored Phase 1 ballot record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallotPhase1 {
    #[serde(rename = "voterCCCD", default, deserialize_with = "lenient_string")]
    pub voter_id: String,

    #[serde(rename = "candidateCCCD", default, deserialize_with = "lenient_string")]
    pub candidate_id: String,

    pub level: RatingLevel,
}

/// Stored Phase 2 selection record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BallotPhase2 {
    #[serde(rename = "voterCCCD", default, deserialize_with = "lenient_string")]
    pub voter_id: String,

    #[serde(rename = "candidateCCCD", default, deserialize_with = "lenient_string")]
    pub candidate_id: String,
}

/// Which Phase 1 candidate fields the voting screen shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Phase1Display {
    #[serde(rename = "showCCCD")]
    pub show_national_id: bool,
    #[serde(rename = "showMSSV")]
    pub show_student_id: bool,
    #[serde(rename = "showNgayVaoDang")]
    pub show_join_date: bool,
    #[serde(rename = "showLoaiDangVien")]
    pub show_membership_kind: bool,
    #[serde(rename = "showNhom")]
    pub show_group: bool,
    #[serde(rename = "showKhoa")]
    pub show_cohort: bool,
    #[serde(rename = "showChucVu")]
    pub show_position: bool,
    #[serde(rename = "showDiemHT")]
    pub show_academic_score: bool,
    #[serde(rename = "showDiemRL")]
    pub show_conduct_score: bool,
    #[serde(rename = "showThanhTich")]
    pub show_achievements: bool,
    #[serde(rename = "showTuDanhGia")]
    pub show_self_assessment: bool,
}

impl Default for Phase1Display {
    fn default() -> Self {
        Self {
            show_national_id: false,
            show_student_id: true,
            show_join_date: false,
            show_membership_kind: true,
            show_group: true,
            show_cohort: true,
            show_position: true,
            show_academic_score: true,
            show_conduct_score: true,
            show_achievements: false,
            show_self_assessment: true,
        }
    }
}

/// Which Phase 2 candidate fields the voting screen shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Phase2Display {
    #[serde(rename = "showCCCD")]
    pub show_national_id: bool,
    #[serde(rename = "showMSSV")]
    pub show_student_id: bool,
    #[serde(rename = "showNgayVaoDang")]
    pub show_join_date: bool,
    #[serde(rename = "showLoaiDangVien")]
    pub show_membership_kind: bool,
    #[serde(rename = "showNhom")]
    pub show_group: bool,
    #[serde(rename = "showKhoa")]
    pub show_cohort: bool,
    #[serde(rename = "showChucVu")]
    pub show_position: bool,
    #[serde(rename = "showDiemHT")]
    pub show_academic_score: bool,
    #[serde(rename = "showDiemRL")]
    pub show_conduct_score: bool,
    #[serde(rename = "showThanhTich")]
    pub show_achievements: bool,
    #[serde(rename = "showChiBoDeXuat")]
    pub show_unit_proposal: bool,
}

impl Default for Phase2Display {
    fn default() -> Self {
        Self {
            show_national_id: false,
            show_student_id: true,
            show_join_date: false,
            show_membership_kind: false,
            show_group: true,
            show_cohort: true,
            show_position: true,
            show_academic_score: true,
            show_conduct_score: true,
            show_achievements: false,
            show_unit_proposal: true,
        }
    }
}

/// Election-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ElectionConfig {
    #[serde(deserialize_with = "lenient_count")]
    pub max_excellent_votes: u32,
    pub is_phase1_open: bool,
    pub is_phase2_open: bool,
    #[serde(deserialize_with = "lenient_or_default")]
    pub p1_display: Phase1Display,
    #[serde(deserialize_with = "lenient_or_default")]
    pub p2_display: Phase2Display,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            max_excellent_votes: DEFAULT_MAX_EXCELLENT_VOTES,
            is_phase1_open: true,
            is_phase2_open: true,
            p1_display: Phase1Display::default(),
            p2_display: Phase2Display::default(),
        }
    }
}

impl ElectionConfig {
    pub fn is_open(&self, phase: VotingPhase) -> bool {
        match phase {
            VotingPhase::One => self.is_phase1_open,
            VotingPhase::Two => self.is_phase2_open,
        }
    }

    pub(crate) fn set_open(&mut self, phase: VotingPhase, open: bool) {
        match phase {
            VotingPhase::One => self.is_phase1_open = open,
            VotingPhase::Two => self.is_phase2_open = open,
        }
    }
}

/// The single replicated root aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionDocument {
    #[serde(rename = "schemaVersion", deserialize_with = "lenient_count")]
    pub schema_version: u32,

    #[serde(deserialize_with = "lenient_seq")]
    pub voters: Vec<Voter>,

    #[serde(rename = "candidatesP1", deserialize_with = "lenient_seq")]
    pub candidates_phase1: Vec<CandidatePhase1>,

    #[serde(rename = "candidatesP2", deserialize_with = "lenient_seq")]
    pub candidates_phase2: Vec<CandidatePhase2>,

    #[serde(rename = "votesP1", deserialize_with = "lenient_seq")]
    pub ballots_phase1: Vec<BallotPhase1>,

    #[serde(rename = "votesP2", deserialize_with = "lenient_seq")]
    pub ballots_phase2: Vec<BallotPhase2>,

    #[serde(deserialize_with = "lenient_or_default")]
    pub config: ElectionConfig,
}

impl Default for ElectionDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            voters: Vec::new(),
            candidates_phase1: Vec::new(),
            candidates_phase2: Vec::new(),
            ballots_phase1: Vec::new(),
            ballots_phase2: Vec::new(),
            config: ElectionConfig::default(),
        }
    }
}

impl ElectionDocument {
    /// Decode a document from any backend and bring it to the current schema.
    pub fn from_value(value: serde_json::Value) -> crate::Result<Self> {
        let mut doc: Self = match value {
            serde_json::Value::Null => Self::default(),
            serde_json::Value::Object(_) => serde_json::from_value(value)?,
            other => {
                tracing::warn!(
                    "Stored document is {}, not an object; loading defaults",
                    json_kind(&other)
                );
                Self::default()
            }
        };
        doc.migrate();
        Ok(doc)
    }

    pub fn from_json(raw: &str) -> crate::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn to_value(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Fill what older schemas lack. Idempotent.
    pub fn migrate(&mut self) {
        if self.config.max_excellent_votes == 0 {
            self.config.max_excellent_votes = DEFAULT_MAX_EXCELLENT_VOTES;
        }
        for ballot in &mut self.ballots_phase1 {
            ballot.voter_id = normalize_id(&ballot.voter_id);
            ballot.candidate_id = normalize_id(&ballot.candidate_id);
        }
        for ballot in &mut self.ballots_phase2 {
            ballot.voter_id = normalize_id(&ballot.voter_id);
            ballot.candidate_id = normalize_id(&ballot.candidate_id);
        }
        self.schema_version = SCHEMA_VERSION;
    }

    pub fn has_data(&self) -> bool {
        !self.voters.is_empty()
    }

    pub fn find_voter(&self, voter_id: &str) -> Option<&Voter> {
        let wanted = normalize_id(voter_id);
        self.voters.iter().find(|v| v.person.has_id(&wanted))
    }

    pub(crate) fn find_voter_mut(&mut self, voter_id: &str) -> Option<&mut Voter> {
        let wanted = normalize_id(voter_id);
        self.voters.iter_mut().find(|v| v.person.has_id(&wanted))
    }

    pub fn candidate_phase1(&self, candidate_id: &str) -> Option<&CandidatePhase1> {
        let wanted = normalize_id(candidate_id);
        self.candidates_phase1
            .iter()
            .find(|c| c.person.has_id(&wanted))
    }

    pub fn candidate_phase2(&self, candidate_id: &str) -> Option<&CandidatePhase2> {
        let wanted = normalize_id(candidate_id);
        self.candidates_phase2
            .iter()
            .find(|c| c.person().has_id(&wanted))
    }
}

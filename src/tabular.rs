//! Spreadsheet import and export
//!
//! Sheets travel as CSV. Imports locate columns by header text: a column
//! matches a field when its trimmed, lowercased header contains the field's
//! key phrase, so `"  Họ Tên "` and `"Họ tên đảng viên"` both land in the
//! full name. Rows without a national id are dropped (and, for the roster,
//! rows without a name).

use crate::results::{phase1_stats, phase2_results};
use crate::types::{
    CandidatePhase1, CandidatePhase2, ElectionDocument, PersonRecord, RatingLevel, Voter,
    parse_score,
};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::{Read, Write};

/// A header row plus data rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row<S: Into<String>>(&mut self, row: impl IntoIterator<Item = S>) {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    /// Read a CSV sheet. Any malformed record fails the whole read.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| crate::import_error!("unreadable header row: {}", e))?
            .iter()
            // Spreadsheet tools often prepend a byte order mark
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for (idx, record) in rdr.records().enumerate() {
            // Header is line 1
            let lineno = idx + 2;
            let record = record.map_err(|e| crate::import_error!("line {}: {}", lineno, e))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        tracing::debug!("Read sheet: columns={:?}, rows={}", headers, rows.len());

        Ok(Self { headers, rows })
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.headers)
            .map_err(|e| crate::store_error!("csv write failed: {}", e))?;
        for row in &self.rows {
            wtr.write_record(row)
                .map_err(|e| crate::store_error!("csv write failed: {}", e))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        String::from_utf8(buf).map_err(|e| crate::store_error!("csv output not utf-8: {}", e))
    }

    /// Index of the first column whose header contains `phrase`.
    pub fn column(&self, phrase: &str) -> Option<usize> {
        let phrase = phrase.to_lowercase();
        self.headers
            .iter()
            .position(|h| h.trim().to_lowercase().contains(&phrase))
    }
}

/// Resolved column positions for one sheet
struct Columns {
    national_id: Option<usize>,
    student_id: Option<usize>,
    full_name: Option<usize>,
    join_date: Option<usize>,
    membership_kind: Option<usize>,
    group: Option<usize>,
    cohort: Option<usize>,
    position: Option<usize>,
    academic_score: Option<usize>,
    conduct_score: Option<usize>,
    achievements: Option<usize>,
    self_assessment: Option<usize>,
    unit_proposal: Option<usize>,
}

impl Columns {
    fn resolve(sheet: &Sheet) -> Self {
        Self {
            national_id: sheet.column("cccd"),
            student_id: sheet.column("mssv"),
            full_name: sheet.column("họ tên"),
            join_date: sheet.column("ngày vào"),
            membership_kind: sheet.column("chính thức"),
            group: sheet.column("nhóm"),
            cohort: sheet.column("khóa"),
            position: sheet.column("chức vụ"),
            academic_score: sheet.column("điểm ht"),
            conduct_score: sheet.column("điểm rl"),
            achievements: sheet.column("thành tích"),
            self_assessment: sheet
                .column("mức độ htnv")
                .or_else(|| sheet.column("tự đánh giá")),
            unit_proposal: sheet.column("đề xuất"),
        }
    }

    fn cell<'a>(row: &'a [String], idx: Option<usize>) -> &'a str {
        idx.and_then(|i| row.get(i)).map(|s| s.trim()).unwrap_or("")
    }

    fn person(&self, row: &[String]) -> PersonRecord {
        PersonRecord {
            national_id: Self::cell(row, self.national_id).to_string(),
            student_id: Self::cell(row, self.student_id).to_string(),
            full_name: Self::cell(row, self.full_name).to_string(),
            join_date: Self::cell(row, self.join_date).to_string(),
            membership_kind: Self::cell(row, self.membership_kind).to_string(),
            group: Self::cell(row, self.group).to_string(),
        }
    }

    fn candidate(&self, row: &[String]) -> CandidatePhase1 {
        CandidatePhase1 {
            person: self.person(row),
            cohort: Self::cell(row, self.cohort).to_string(),
            position: Self::cell(row, self.position).to_string(),
            academic_score: parse_score(Self::cell(row, self.academic_score)),
            conduct_score: parse_score(Self::cell(row, self.conduct_score)),
            achievements: Self::cell(row, self.achievements).to_string(),
            self_assessment: Self::cell(row, self.self_assessment).to_string(),
        }
    }
}

fn require_id_column(sheet: &Sheet, columns: &Columns) -> Result<()> {
    if columns.national_id.is_none() {
        return Err(crate::import_error!(
            "no national id (CCCD) column among headers {:?}",
            sheet.headers
        ));
    }
    Ok(())
}

/// Roster rows; rows missing the national id or the name are dropped.
pub fn parse_voters(sheet: &Sheet) -> Result<Vec<Voter>> {
    let columns = Columns::resolve(sheet);
    require_id_column(sheet, &columns)?;

    let voters: Vec<Voter> = sheet
        .rows
        .iter()
        .map(|row| columns.person(row))
        .filter(|p| !p.national_id.is_empty() && !p.full_name.is_empty())
        .map(Voter::new)
        .collect();

    let dropped = sheet.rows.len() - voters.len();
    if dropped > 0 {
        tracing::warn!("Dropped {} roster rows without id or name", dropped);
    }
    Ok(voters)
}

pub fn parse_candidates_phase1(sheet: &Sheet) -> Result<Vec<CandidatePhase1>> {
    let columns = Columns::resolve(sheet);
    require_id_column(sheet, &columns)?;

    Ok(sheet
        .rows
        .iter()
        .map(|row| columns.candidate(row))
        .filter(|c| !c.person.national_id.is_empty())
        .collect())
}

pub fn parse_candidates_phase2(sheet: &Sheet) -> Result<Vec<CandidatePhase2>> {
    let columns = Columns::resolve(sheet);
    require_id_column(sheet, &columns)?;

    Ok(sheet
        .rows
        .iter()
        .map(|row| {
            let mut profile = columns.candidate(row);
            profile.self_assessment.clear();
            CandidatePhase2 {
                profile,
                unit_proposal: Columns::cell(row, columns.unit_proposal).to_string(),
            }
        })
        .filter(|c| !c.person().national_id.is_empty())
        .collect())
}

pub fn read_voters<R: Read>(reader: R) -> Result<Vec<Voter>> {
    parse_voters(&Sheet::read_csv(reader)?)
}

pub fn read_candidates_phase1<R: Read>(reader: R) -> Result<Vec<CandidatePhase1>> {
    parse_candidates_phase1(&Sheet::read_csv(reader)?)
}

pub fn read_candidates_phase2<R: Read>(reader: R) -> Result<Vec<CandidatePhase2>> {
    parse_candidates_phase2(&Sheet::read_csv(reader)?)
}

fn score(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Profile columns shared by both results exports
const PROFILE_HEADERS: [&str; 11] = [
    "Mã ĐD (CCCD)",
    "MSSV",
    "Họ Tên",
    "Ngày vào Đảng",
    "Loại ĐV",
    "Chi bộ/Nhóm",
    "Đơn vị (Khóa)",
    "Chức vụ",
    "Điểm HT",
    "Điểm RL",
    "Thành tích",
];

fn profile_cells(c: &CandidatePhase1) -> Vec<String> {
    let p = &c.person;
    vec![
        p.national_id.clone(),
        p.student_id.clone(),
        p.full_name.clone(),
        p.join_date.clone(),
        p.membership_kind.clone(),
        p.group.clone(),
        c.cohort.clone(),
        c.position.clone(),
        score(c.academic_score),
        score(c.conduct_score),
        c.achievements.clone(),
    ]
}

/// One row per Phase 1 candidate with `n (p%)` per level.
pub fn export_phase1_results(doc: &ElectionDocument) -> Sheet {
    let mut sheet = Sheet::new(PROFILE_HEADERS.iter().copied().chain([
        "Tự đánh giá",
        "K.Hoàn Thành",
        "Hoàn Thành",
        "HT Tốt",
        "Tổng phiếu",
    ]));

    for candidate in &doc.candidates_phase1 {
        let stats = phase1_stats(doc, &candidate.person.national_id);
        let fmt = |level: RatingLevel| {
            format!("{} ({:.1}%)", stats.count(level), stats.percentage(level))
        };

        let mut row = profile_cells(candidate);
        row.push(candidate.self_assessment.clone());
        row.push(fmt(RatingLevel::Incomplete));
        row.push(fmt(RatingLevel::Complete));
        row.push(fmt(RatingLevel::CompleteWell));
        row.push(stats.total.to_string());
        sheet.push_row(row);
    }
    sheet
}

/// One row per Phase 2 candidate, most votes first, with the pass rate.
pub fn export_phase2_results(doc: &ElectionDocument) -> Sheet {
    let mut sheet = Sheet::new(PROFILE_HEADERS.iter().copied().chain([
        "Chi bộ đề xuất",
        "Số phiếu bầu",
        "Tỷ lệ đạt",
    ]));

    let tallies: HashMap<String, (usize, f64)> = phase2_results(doc)
        .into_iter()
        .map(|r| (r.candidate_id, (r.vote_count, r.percentage)))
        .collect();

    let mut rows: Vec<(usize, Vec<String>)> = doc
        .candidates_phase2
        .iter()
        .map(|candidate| {
            let (votes, percentage) = tallies
                .get(&candidate.person().normalized_id())
                .copied()
                .unwrap_or((0, 0.0));
            let mut row = profile_cells(&candidate.profile);
            row.push(candidate.unit_proposal.clone());
            row.push(votes.to_string());
            row.push(format!("{percentage:.2}%"));
            (votes, row)
        })
        .collect();
    rows.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, row) in rows {
        sheet.push_row(row);
    }
    sheet
}

/// Audit trail: one row per stored ballot record.
pub fn export_vote_audit(doc: &ElectionDocument) -> Sheet {
    let mut sheet = Sheet::new([
        "Vòng",
        "CCCD cử tri",
        "Họ tên cử tri",
        "CCCD ứng viên",
        "Họ tên ứng viên",
        "Mức độ",
    ]);

    let voter_name = |id: &str| {
        doc.find_voter(id)
            .map(|v| v.person.full_name.clone())
            .unwrap_or_default()
    };

    for ballot in &doc.ballots_phase1 {
        sheet.push_row([
            "1".to_string(),
            ballot.voter_id.clone(),
            voter_name(&ballot.voter_id),
            ballot.candidate_id.clone(),
            doc.candidate_phase1(&ballot.candidate_id)
                .map(|c| c.person.full_name.clone())
                .unwrap_or_default(),
            ballot.level.label().to_string(),
        ]);
    }
    for ballot in &doc.ballots_phase2 {
        sheet.push_row([
            "2".to_string(),
            ballot.voter_id.clone(),
            voter_name(&ballot.voter_id),
            ballot.candidate_id.clone(),
            doc.candidate_phase2(&ballot.candidate_id)
                .map(|c| c.person().full_name.clone())
                .unwrap_or_default(),
            String::new(),
        ]);
    }
    sheet
}

pub fn export_voter_status(doc: &ElectionDocument) -> Sheet {
    let mut sheet = Sheet::new([
        "CCCD",
        "MSSV",
        "Họ Tên",
        "Ngày Vào Đảng",
        "Chi Bộ",
        "Trạng thái P1",
        "Trạng thái P2",
    ]);
    let status = |voted: bool| if voted { "Đã Vote" } else { "Chưa" };

    for voter in &doc.voters {
        let p = &voter.person;
        sheet.push_row([
            p.national_id.as_str(),
            p.student_id.as_str(),
            p.full_name.as_str(),
            p.join_date.as_str(),
            p.group.as_str(),
            status(voter.has_voted_phase1),
            status(voter.has_voted_phase2),
        ]);
    }
    sheet
}

/// The four downloadable reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Phase1Results,
    Phase2Results,
    VoteAudit,
    VoterStatus,
}

impl ExportKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ExportKind::Phase1Results => "Ket_Qua_Danh_Gia_P1",
            ExportKind::Phase2Results => "Ket_Qua_Binh_Bau_P2",
            ExportKind::VoteAudit => "Chi_Tiet_Lich_Su_Bau",
            ExportKind::VoterStatus => "Trang_Thai_Cu_Tri",
        }
    }

    pub fn build(self, doc: &ElectionDocument) -> Sheet {
        match self {
            ExportKind::Phase1Results => export_phase1_results(doc),
            ExportKind::Phase2Results => export_phase2_results(doc),
            ExportKind::VoteAudit => export_vote_audit(doc),
            ExportKind::VoterStatus => export_voter_status(doc),
        }
    }
}

/// `<prefix>_<unix millis>`
pub fn export_file_name(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", prefix, at.timestamp_millis())
}

/// Import templates with one sample row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Voters,
    Phase1,
    Phase2,
}

impl TemplateKind {
    pub fn file_stem(self) -> &'static str {
        match self {
            TemplateKind::Voters => "Mau_DS_Cu_Tri",
            TemplateKind::Phase1 => "Mau_DS_Bau_P1",
            TemplateKind::Phase2 => "Mau_DS_Bau_P2",
        }
    }

    pub fn sheet(self) -> Sheet {
        let person_headers = [
            "CCCD",
            "MSSV",
            "Họ tên",
            "Ngày vào Đảng",
            "Chính thức/Dự bị",
            "Nhóm",
        ];
        let person_sample = [
            "0123456789",
            "B123456",
            "Nguyễn Văn A",
            "03/02/2020",
            "Chính thức",
            "Chi bộ 1",
        ];
        let candidate_headers = ["Khóa", "Chức vụ", "Điểm HT", "Điểm RL", "Thành tích"];
        let candidate_sample = ["K46", "Đảng viên", "90", "85", "Giấy khen"];

        let (extra_header, extra_sample): (&[&str], &[&str]) = match self {
            TemplateKind::Voters => (&[], &[]),
            TemplateKind::Phase1 => (&["Tự đánh giá mức độ HTNV"], &["Hoàn thành tốt"]),
            TemplateKind::Phase2 => (&["Chi bộ đề xuất"], &["Xuất sắc"]),
        };
        let with_candidate = self != TemplateKind::Voters;

        let mut sheet = Sheet::new(
            person_headers
                .iter()
                .chain(candidate_headers.iter().filter(|_| with_candidate))
                .chain(extra_header.iter())
                .copied(),
        );
        sheet.push_row(
            person_sample
                .iter()
                .chain(candidate_sample.iter().filter(|_| with_candidate))
                .chain(extra_sample.iter())
                .copied(),
        );
        sheet
    }
}

use bigdecimal::{num_bigint::BigInt, BigDecimal, ToPrimitive};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media;
use crate::models::{Loan, Media};

/// Lifecycle of a credit application. The admin endpoints only move loans
/// along the allowed edges; anything else answers 409.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    UnderReview,
    DocumentsRequested,
    Approved,
    Rejected,
    Active,
    Completed,
    Archived,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::UnderReview => "under_review",
            LoanStatus::DocumentsRequested => "documents_requested",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(LoanStatus::Pending),
            "under_review" => Some(LoanStatus::UnderReview),
            "documents_requested" => Some(LoanStatus::DocumentsRequested),
            "approved" => Some(LoanStatus::Approved),
            "rejected" => Some(LoanStatus::Rejected),
            "active" => Some(LoanStatus::Active),
            "completed" => Some(LoanStatus::Completed),
            "archived" => Some(LoanStatus::Archived),
            _ => None,
        }
    }

    pub fn can_approve(&self) -> bool {
        matches!(
            self,
            LoanStatus::Pending | LoanStatus::UnderReview | LoanStatus::DocumentsRequested
        )
    }

    pub fn can_reject(&self) -> bool {
        self.can_approve()
    }

    pub fn can_request_documents(&self) -> bool {
        matches!(self, LoanStatus::Pending | LoanStatus::UnderReview)
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self,
            LoanStatus::Pending
                | LoanStatus::UnderReview
                | LoanStatus::DocumentsRequested
                | LoanStatus::Approved
                | LoanStatus::Active
        )
    }
}

impl Loan {
    pub fn status(&self) -> LoanStatus {
        LoanStatus::parse(&self.status).unwrap_or(LoanStatus::Pending)
    }

    pub fn applicant_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Standard annuity formula: P * r(1+r)^n / ((1+r)^n - 1) with r the
/// monthly rate. Zero-rate loans divide the principal evenly.
pub fn monthly_payment(amount: f64, annual_rate_percent: f64, months: i32) -> f64 {
    if amount <= 0.0 || months <= 0 {
        return 0.0;
    }

    let monthly_rate = annual_rate_percent / 100.0 / 12.0;
    if monthly_rate == 0.0 {
        return amount / months as f64;
    }

    let factor = (1.0 + monthly_rate).powi(months);
    amount * (monthly_rate * factor) / (factor - 1.0)
}

pub fn total_repayment(amount: f64, annual_rate_percent: f64, months: i32) -> f64 {
    monthly_payment(amount, annual_rate_percent, months) * months as f64
}

/// Rounds to cents and converts into the numeric column representation.
pub fn to_money(value: f64) -> BigDecimal {
    let cents = (value * 100.0).round() as i64;
    BigDecimal::new(BigInt::from(cents), 2)
}

pub fn money_to_f64(value: &BigDecimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Recomputes the repayment columns from the loan's own amount/rate/duration.
pub fn repayment_schedule(loan: &Loan) -> (BigDecimal, BigDecimal) {
    let amount = money_to_f64(&loan.amount);
    let rate = money_to_f64(&loan.interest_rate);
    let payment = monthly_payment(amount, rate, loan.duration_months);
    (
        to_money(payment),
        to_money(payment * loan.duration_months as f64),
    )
}

#[derive(Debug, Serialize)]
pub struct ProgressStep {
    pub key: &'static str,
    pub label: &'static str,
    pub completed: bool,
}

#[derive(Debug, Serialize)]
pub struct LoanProgress {
    pub steps: Vec<ProgressStep>,
    pub current_step: u8,
    pub percentage: u8,
}

/// Five-step progress view shown on the client dashboard.
pub fn loan_progress(status: LoanStatus) -> LoanProgress {
    let (current_step, completed): (u8, [bool; 5]) = match status {
        LoanStatus::Pending => (1, [true, false, false, false, false]),
        LoanStatus::UnderReview => (1, [true, true, false, false, false]),
        LoanStatus::DocumentsRequested => (2, [true, true, false, false, false]),
        LoanStatus::Rejected => (3, [true, true, false, true, false]),
        LoanStatus::Approved => (4, [true, true, true, true, false]),
        LoanStatus::Active | LoanStatus::Completed | LoanStatus::Archived => {
            (4, [true, true, true, true, true])
        }
    };

    let labels = [
        ("submitted", "Application submitted"),
        ("under_review", "Under review"),
        ("documents", "Documents validated"),
        ("decision", "Final decision"),
        ("finalized", "Finalized"),
    ];

    LoanProgress {
        steps: labels
            .iter()
            .zip(completed)
            .map(|((key, label), completed)| ProgressStep {
                key,
                label,
                completed,
            })
            .collect(),
        current_step,
        percentage: (current_step as u16 * 100 / 4) as u8,
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentChecklist {
    pub required: Vec<&'static str>,
    pub missing: Vec<&'static str>,
    pub completion_percentage: u8,
}

/// Which of the required document types are attached to the loan.
pub fn document_checklist(documents: &[Media]) -> DocumentChecklist {
    let required = media::REQUIRED_TYPES.to_vec();
    let missing: Vec<&'static str> = media::REQUIRED_TYPES
        .iter()
        .copied()
        .filter(|required_type| !documents.iter().any(|doc| doc.media_type == *required_type))
        .collect();

    let completed = required.len() - missing.len();
    DocumentChecklist {
        completion_percentage: (completed * 100 / required.len()) as u8,
        required,
        missing,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Coarse triage score used on the staff detail view: large amounts, long
/// durations and stale dossiers push the score up.
pub fn risk_level(loan: &Loan, now: NaiveDateTime) -> RiskLevel {
    let amount = money_to_f64(&loan.amount);
    let mut score = 0;

    if amount > 50_000.0 {
        score += 2;
    } else if amount > 25_000.0 {
        score += 1;
    }

    if loan.duration_months > 84 {
        score += 2;
    } else if loan.duration_months > 60 {
        score += 1;
    }

    if (now - loan.created_at).num_days() > 7 {
        score += 1;
    }

    match score {
        s if s >= 4 => RiskLevel::High,
        s if s >= 2 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

pub fn days_since(created_at: NaiveDateTime) -> i64 {
    (Utc::now().naive_utc() - created_at).num_days()
}

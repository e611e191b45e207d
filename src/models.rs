use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bet types for numeric lottery draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetType {
    /// 3-digit number, exact match against the top prize
    ThreeTop,
    /// 3-digit number, any permutation of the top prize digits ("tod")
    ThreeTod,
    /// 2-digit number, exact match against the top two digits
    TwoTop,
    /// 2-digit number, exact match against the bottom two digits
    TwoBottom,
    /// Single digit appearing in the top run numbers
    RunTop,
    /// Single digit appearing in the bottom run numbers
    RunBottom,
}

impl BetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetType::ThreeTop => "three_top",
            BetType::ThreeTod => "three_tod",
            BetType::TwoTop => "two_top",
            BetType::TwoBottom => "two_bottom",
            BetType::RunTop => "run_top",
            BetType::RunBottom => "run_bottom",
        }
    }

    /// Required wagered-number length in digits
    pub fn number_len(&self) -> usize {
        match self {
            BetType::ThreeTop | BetType::ThreeTod => 3,
            BetType::TwoTop | BetType::TwoBottom => 2,
            BetType::RunTop | BetType::RunBottom => 1,
        }
    }

    pub const ALL: [BetType; 6] = [
        BetType::ThreeTop,
        BetType::ThreeTod,
        BetType::TwoTop,
        BetType::TwoBottom,
        BetType::RunTop,
        BetType::RunBottom,
    ];
}

impl std::str::FromStr for BetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "three_top" => Ok(BetType::ThreeTop),
            "three_tod" => Ok(BetType::ThreeTod),
            "two_top" => Ok(BetType::TwoTop),
            "two_bottom" => Ok(BetType::TwoBottom),
            "run_top" => Ok(BetType::RunTop),
            "run_bottom" => Ok(BetType::RunBottom),
            other => Err(format!("unknown bet type: {}", other)),
        }
    }
}

/// Lifecycle of a bet: pending until a draw result settles it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Pending => "pending",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
        }
    }
}

impl std::str::FromStr for BetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BetStatus::Pending),
            "won" => Ok(BetStatus::Won),
            "lost" => Ok(BetStatus::Lost),
            other => Err(format!("unknown bet status: {}", other)),
        }
    }
}

/// Position of an account in the ownership hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Master,
    Agent,
    Member,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Master => "master",
            AccountRole::Agent => "agent",
            AccountRole::Member => "member",
        }
    }
}

impl std::str::FromStr for AccountRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(AccountRole::Master),
            "agent" => Ok(AccountRole::Agent),
            "member" => Ok(AccountRole::Member),
            other => Err(format!("unknown account role: {}", other)),
        }
    }
}

/// Direction of a credit ledger adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditAction {
    Add,
    Deduct,
}

impl CreditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditAction::Add => "add",
            CreditAction::Deduct => "deduct",
        }
    }
}

impl std::str::FromStr for CreditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(CreditAction::Add),
            "deduct" => Ok(CreditAction::Deduct),
            other => Err(format!("unknown credit action: {}", other)),
        }
    }
}

/// Why a ledger entry exists, for audit filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditReason {
    Stake,
    Payout,
    Commission,
    Adjust,
}

impl CreditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditReason::Stake => "stake",
            CreditReason::Payout => "payout",
            CreditReason::Commission => "commission",
            CreditReason::Adjust => "adjust",
        }
    }
}

impl std::str::FromStr for CreditReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stake" => Ok(CreditReason::Stake),
            "payout" => Ok(CreditReason::Payout),
            "commission" => Ok(CreditReason::Commission),
            "adjust" => Ok(CreditReason::Adjust),
            other => Err(format!("unknown credit reason: {}", other)),
        }
    }
}

/// Published outcome for one draw period
///
/// Any prize field may be absent while results are still being announced;
/// absent fields never match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawResult {
    pub draw_id: String,
    pub three_top: Option<String>,
    pub two_top: Option<String>,
    pub two_bottom: Option<String>,
    #[serde(default)]
    pub run_top: Vec<String>,
    #[serde(default)]
    pub run_bottom: Vec<String>,
    pub published_at: DateTime<Utc>,
}

/// One wagered entry within a bet
///
/// `is_win` / `win_amount` stay None until settlement and are written
/// exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetLine {
    pub bet_type: BetType,
    pub number: String,
    pub stake: f64,
    pub payout_rate: f64,
    pub potential_win: f64,
    pub is_win: Option<bool>,
    pub win_amount: Option<f64>,
}

impl BetLine {
    pub fn new(bet_type: BetType, number: &str, stake: f64, payout_rate: f64) -> Self {
        Self {
            bet_type,
            number: number.to_string(),
            stake,
            payout_rate,
            potential_win: stake * payout_rate,
            is_win: None,
            win_amount: None,
        }
    }
}

/// A placed wager, owned by exactly one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    pub account_id: String,
    pub draw_id: String,
    pub category: String,
    pub lines: Vec<BetLine>,
    pub stake_total: f64,
    pub status: BetStatus,
    pub total_win_amount: f64,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Commission percentages per lottery category and bet type (0-100)
pub type CommissionRates = HashMap<String, HashMap<BetType, f64>>;

/// A node in the account hierarchy (master, agent, or member)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub role: AccountRole,
    pub parent_id: Option<String>,
    pub credit: f64,
    pub commission_rates: CommissionRates,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Configured commission percentage for a category/bet-type pair,
    /// zero when no rate is set.
    pub fn commission_rate(&self, category: &str, bet_type: BetType) -> f64 {
        self.commission_rates
            .get(category)
            .and_then(|by_type| by_type.get(&bet_type))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Immutable audit record of one credit adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: String,
    pub account_id: String,
    pub action: CreditAction,
    pub amount: f64,
    pub credit_before: f64,
    pub credit_after: f64,
    pub reason: CreditReason,
    pub ref_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./lottodesk.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        Ok(Self {
            database_path,
            port,
        })
    }
}

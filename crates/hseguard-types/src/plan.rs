//! Plans, features and the default feature catalog

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::{ParseError, PlanId};

/// Maximum length of a feature code
pub const MAX_FEATURE_CODE_LEN: usize = 64;

/// Billing tier a plan belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    /// Single-site companies: audits, inspections, accident log
    Basic,
    /// Multi-site companies: adds trainings, announcements, corrective actions
    Professional,
    /// Groups: every module, no limits
    Enterprise,
    /// Negotiated plan with a hand-built feature list
    Custom,
}

impl PlanType {
    /// Stored representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
            Self::Custom => "custom",
        }
    }

    /// Default feature set used when seeding a plan of this type.
    ///
    /// `Custom` plans start empty; their features are configured per tenant.
    pub fn default_features(&self) -> Vec<PlanFeature> {
        match self {
            Self::Basic => vec![
                PlanFeature::boolean("audits", "Audits"),
                PlanFeature::boolean("accidents", "Accident reporting"),
                PlanFeature::limited("inspections", "Inspections", 50, ResetPeriod::Monthly),
                PlanFeature::limited("reports.monthly", "Monthly reports", 10, ResetPeriod::Monthly),
                PlanFeature::limited("pillars.documents", "Pillar documents", 100, ResetPeriod::None),
                PlanFeature::limited("users", "Users", 5, ResetPeriod::None),
            ],
            Self::Professional => vec![
                PlanFeature::boolean("audits", "Audits"),
                PlanFeature::boolean("accidents", "Accident reporting"),
                PlanFeature::boolean("trainings", "Trainings"),
                PlanFeature::boolean("announcements", "Announcements"),
                PlanFeature::boolean("corrective_actions", "Corrective actions"),
                PlanFeature::limited("inspections", "Inspections", 500, ResetPeriod::Monthly),
                PlanFeature::limited("reports.monthly", "Monthly reports", 50, ResetPeriod::Monthly),
                PlanFeature::limited("pillars.documents", "Pillar documents", 1_000, ResetPeriod::None),
                PlanFeature::limited("users", "Users", 25, ResetPeriod::None),
            ],
            Self::Enterprise => vec![
                PlanFeature::boolean("audits", "Audits"),
                PlanFeature::boolean("accidents", "Accident reporting"),
                PlanFeature::boolean("trainings", "Trainings"),
                PlanFeature::boolean("announcements", "Announcements"),
                PlanFeature::boolean("corrective_actions", "Corrective actions"),
                PlanFeature::boolean("api_access", "API access"),
                PlanFeature::boolean("sso", "Single sign-on"),
                PlanFeature::unlimited("inspections", "Inspections", ResetPeriod::Monthly),
                PlanFeature::unlimited("reports.monthly", "Monthly reports", ResetPeriod::Monthly),
                PlanFeature::unlimited("pillars.documents", "Pillar documents", ResetPeriod::None),
                PlanFeature::unlimited("users", "Users", ResetPeriod::None),
            ],
            Self::Custom => Vec::new(),
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "professional" | "pro" => Ok(Self::Professional),
            "enterprise" => Ok(Self::Enterprise),
            "custom" => Ok(Self::Custom),
            _ => Err(ParseError::unknown("plan type", s)),
        }
    }
}

/// How often a plan is billed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    /// Billed every calendar month
    Monthly,
    /// Billed every twelve months
    Annual,
}

impl BillingCycle {
    /// Stored representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }

    /// Add one billing cycle to `from`. `None` only on calendar overflow.
    pub fn advance(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Monthly => from.checked_add_months(Months::new(1)),
            Self::Annual => from.checked_add_months(Months::new(12)),
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BillingCycle {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(Self::Monthly),
            "annual" | "yearly" => Ok(Self::Annual),
            _ => Err(ParseError::unknown("billing cycle", s)),
        }
    }
}

/// Whether a feature is an on/off grant or a metered counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    /// Granted or not
    Boolean,
    /// Metered against a usage cap
    Limit,
}

impl FeatureKind {
    /// Stored representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Limit => "limit",
        }
    }
}

impl std::str::FromStr for FeatureKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "boolean" => Ok(Self::Boolean),
            "limit" => Ok(Self::Limit),
            _ => Err(ParseError::unknown("feature kind", s)),
        }
    }
}

/// How often a metered feature's counter returns to zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    /// Never reset (e.g. seats, stored documents)
    None,
    /// Reset every day
    Daily,
    /// Reset every calendar month
    Monthly,
    /// Reset every twelve months
    Annual,
}

impl ResetPeriod {
    /// Stored representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }

    /// Whether counters with this period are ever reset
    pub const fn is_periodic(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Add one period unit to `from`. `None` for [`ResetPeriod::None`].
    pub fn advance(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::None => None,
            Self::Daily => from.checked_add_signed(Duration::days(1)),
            Self::Monthly => from.checked_add_months(Months::new(1)),
            Self::Annual => from.checked_add_months(Months::new(12)),
        }
    }
}

impl std::fmt::Display for ResetPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResetPeriod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "daily" => Ok(Self::Daily),
            "monthly" => Ok(Self::Monthly),
            "annual" | "yearly" => Ok(Self::Annual),
            _ => Err(ParseError::unknown("reset period", s)),
        }
    }
}

/// Feature code (e.g. `reports.monthly`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureCode(String);

impl FeatureCode {
    /// Create a feature code without validation (trusted sources only)
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Parse and validate a feature code from untrusted input
    pub fn parse(code: &str) -> Result<Self, ParseError> {
        let invalid = |why| ParseError::InvalidFeatureCode(code.to_string(), why);

        if code.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if code.len() > MAX_FEATURE_CODE_LEN {
            return Err(invalid("too long"));
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
        {
            return Err(invalid("invalid characters"));
        }
        if !code.starts_with(|c: char| c.is_ascii_lowercase()) {
            return Err(invalid("must start with a letter"));
        }
        Ok(Self(code.to_string()))
    }

    /// Borrow the code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FeatureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for FeatureCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Usage cap of an entitled feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum UsageLimit {
    /// At most this many units per reset period
    Limited(i64),
    /// No cap
    Unlimited,
}

impl UsageLimit {
    /// Build from a nullable stored cap (`NULL` means unlimited)
    pub fn from_option(limit: Option<i64>) -> Self {
        limit.map_or(Self::Unlimited, Self::Limited)
    }

    /// Nullable representation for storage
    pub fn as_option(&self) -> Option<i64> {
        match self {
            Self::Limited(n) => Some(*n),
            Self::Unlimited => None,
        }
    }

    /// Whether one more unit may be consumed at `current_usage`
    pub fn has_headroom(&self, current_usage: i64) -> bool {
        match self {
            Self::Limited(limit) => current_usage < *limit,
            Self::Unlimited => true,
        }
    }

    /// Whether `usage` fits under the cap (equal is allowed)
    pub fn permits(&self, usage: i64) -> bool {
        match self {
            Self::Limited(limit) => usage <= *limit,
            Self::Unlimited => true,
        }
    }
}

impl std::fmt::Display for UsageLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{n}"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// One feature entry of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFeature {
    /// Feature code
    pub code: FeatureCode,
    /// Human readable name
    pub display_name: String,
    /// Boolean grant or metered limit
    pub kind: FeatureKind,
    /// For boolean features: whether the plan grants it
    pub enabled: bool,
    /// For limit features: the cap (`None` means unlimited)
    pub limit: Option<i64>,
    /// For limit features: when the counter resets
    pub reset_period: ResetPeriod,
}

impl PlanFeature {
    /// An enabled boolean feature
    pub fn boolean(code: &str, display_name: &str) -> Self {
        Self {
            code: FeatureCode::new(code),
            display_name: display_name.to_string(),
            kind: FeatureKind::Boolean,
            enabled: true,
            limit: None,
            reset_period: ResetPeriod::None,
        }
    }

    /// A metered feature with a finite cap
    pub fn limited(code: &str, display_name: &str, limit: i64, reset_period: ResetPeriod) -> Self {
        Self {
            code: FeatureCode::new(code),
            display_name: display_name.to_string(),
            kind: FeatureKind::Limit,
            enabled: true,
            limit: Some(limit),
            reset_period,
        }
    }

    /// A metered feature without a cap (still counted)
    pub fn unlimited(code: &str, display_name: &str, reset_period: ResetPeriod) -> Self {
        Self {
            code: FeatureCode::new(code),
            display_name: display_name.to_string(),
            kind: FeatureKind::Limit,
            enabled: true,
            limit: None,
            reset_period,
        }
    }

    /// Usage cap granted by this entry, `None` when it grants nothing
    pub fn usage_limit(&self) -> Option<UsageLimit> {
        match self.kind {
            FeatureKind::Boolean if self.enabled => Some(UsageLimit::Unlimited),
            FeatureKind::Boolean => None,
            FeatureKind::Limit => Some(UsageLimit::from_option(self.limit)),
        }
    }
}

/// Named billing tier with its feature list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan ID
    pub id: PlanId,
    /// Display name
    pub name: String,
    /// Tier
    pub plan_type: PlanType,
    /// Billing cycle
    pub billing_cycle: BillingCycle,
    /// Price per cycle in minor currency units
    pub price_minor: i64,
    /// ISO 4217 currency code
    pub currency: String,
    /// Whether new subscriptions may use this plan
    pub is_active: bool,
    /// Ordered feature entries
    pub features: Vec<PlanFeature>,
}

impl Plan {
    /// Find a feature entry by code
    pub fn feature(&self, code: &str) -> Option<&PlanFeature> {
        self.features.iter().find(|f| f.code.as_str() == code)
    }

    /// Whether the plan entitles its holder to `code`
    pub fn has_feature(&self, code: &str) -> bool {
        self.feature_limit(code).is_some()
    }

    /// Usage cap for `code`, `None` when the plan does not grant it
    pub fn feature_limit(&self, code: &str) -> Option<UsageLimit> {
        self.feature(code).and_then(PlanFeature::usage_limit)
    }

    /// Metered features of this plan
    pub fn limit_features(&self) -> impl Iterator<Item = &PlanFeature> {
        self.features.iter().filter(|f| f.kind == FeatureKind::Limit)
    }
}

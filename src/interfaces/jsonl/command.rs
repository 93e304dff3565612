use crate::domain::checkout::BillingInterval;
use crate::domain::escrow::Party;
use crate::domain::money::{Amount, Money};
use crate::domain::payment_method::PaymentMethodType;
use crate::domain::promo::DiscountType;
use crate::domain::transaction::Settlement;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::BufRead;

/// A milestone inside a `create_escrow` command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MilestoneCommand {
    pub description: String,
    pub amount: Amount,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub release_conditions: String,
    /// Alias bound to the generated milestone id.
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
}

/// One line of a command file.
///
/// Fields that name a session, method, subscription, escrow, milestone or
/// transaction accept either a UUID or an alias bound earlier with `"as"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    AddPaymentMethod {
        user: String,
        #[serde(rename = "type", default = "card")]
        kind: PaymentMethodType,
        last4: String,
        #[serde(default)]
        brand: Option<String>,
        #[serde(default)]
        expiry_month: Option<u8>,
        #[serde(default)]
        expiry_year: Option<u16>,
        #[serde(default)]
        make_default: bool,
        #[serde(default, rename = "as")]
        alias: Option<String>,
    },
    SetDefaultPaymentMethod {
        user: String,
        method: String,
    },
    RemovePaymentMethod {
        user: String,
        method: String,
    },
    RegisterPromo {
        code: String,
        discount_type: DiscountType,
        discount_value: Decimal,
        valid_until: DateTime<Utc>,
        max_uses: u32,
        #[serde(default)]
        applicable_plans: Vec<String>,
        #[serde(default)]
        min_amount: Option<Money>,
    },
    DeactivatePromo {
        code: String,
    },
    ValidatePromo {
        code: String,
        plan_id: String,
        amount: Money,
    },
    CreateCheckout {
        plan_id: String,
        plan_name: String,
        amount: Money,
        interval: BillingInterval,
        #[serde(default)]
        promo_code: Option<String>,
        #[serde(default)]
        customer_email: Option<String>,
        #[serde(default, rename = "as")]
        alias: Option<String>,
    },
    ApplyPromo {
        session: String,
        code: String,
    },
    RemovePromo {
        session: String,
    },
    ConfirmPayment {
        session: String,
        user: String,
        method: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        country: Option<String>,
        /// Alias bound to the activated subscription.
        #[serde(default, rename = "as")]
        alias: Option<String>,
    },
    ExpireSessions,
    StartTrial {
        user: String,
        plan_id: String,
        plan_name: String,
        amount: Money,
        interval: BillingInterval,
        trial_days: u32,
        #[serde(default, rename = "as")]
        alias: Option<String>,
    },
    CancelSubscription {
        subscription: String,
        #[serde(default)]
        immediately: bool,
    },
    ResumeSubscription {
        subscription: String,
    },
    RollOver,
    AdvanceClock {
        #[serde(default)]
        days: i64,
        #[serde(default)]
        hours: i64,
        #[serde(default)]
        minutes: i64,
    },
    CaptureOrder {
        buyer: String,
        order_id: String,
        amount: Money,
        method: String,
    },
    CreateEscrow {
        order_id: String,
        amount: Money,
        buyer: String,
        seller: String,
        #[serde(default)]
        milestones: Vec<MilestoneCommand>,
        #[serde(default, rename = "as")]
        alias: Option<String>,
    },
    FundMilestone {
        escrow: String,
        milestone: String,
    },
    ApproveMilestone {
        escrow: String,
        milestone: String,
        party: Party,
    },
    DisputeMilestone {
        escrow: String,
        milestone: String,
    },
    ReleaseMilestone {
        escrow: String,
        milestone: String,
    },
    ReleaseEscrow {
        escrow: String,
    },
    DisputeEscrow {
        escrow: String,
    },
    RefundEscrow {
        escrow: String,
    },
    Withdraw {
        user: String,
        amount: Money,
        method: String,
        #[serde(default, rename = "as")]
        alias: Option<String>,
    },
    SettleTransaction {
        transaction: String,
        outcome: Settlement,
    },
    TrackView {
        plan_id: String,
    },
    TrackClick {
        plan_id: String,
    },
    TrackConversion {
        plan_id: String,
        #[serde(default)]
        amount: Option<Money>,
    },
}

fn card() -> PaymentMethodType {
    PaymentMethodType::Card
}

/// Reads commands from a JSON-lines source. Blank lines and lines starting
/// with `#` are skipped.
pub struct CommandReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> CommandReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Yields `(line number, command)` pairs. A malformed line is an error
    /// for that line only.
    pub fn commands(self) -> impl Iterator<Item = (usize, Result<Command>)> {
        self.source
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line))
            .filter(|(_, line)| match line {
                Ok(text) => {
                    let text = text.trim();
                    !text.is_empty() && !text.starts_with('#')
                }
                Err(_) => true,
            })
            .map(|(number, line)| {
                let parsed = line
                    .map_err(LedgerError::from)
                    .and_then(|text| serde_json::from_str(&text).map_err(LedgerError::from));
                (number, parsed)
            })
    }
}

use super::command::{Command, CommandReader};
use crate::application::engine::LedgerEngine;
use crate::application::escrow::NewEscrow;
use crate::domain::checkout::{BillingDetails, NewCheckout};
use crate::domain::escrow::MilestonePlan;
use crate::domain::payment_method::NewPaymentMethod;
use crate::domain::promo::PromoCode;
use crate::domain::subscription::NewTrial;
use crate::error::{LedgerError, Result};
use crate::infrastructure::clock::ManualClock;
use chrono::Duration;
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a batch run went.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub applied: usize,
    pub failed: usize,
}

/// Replays a command file against an engine.
///
/// Ids generated along the way can be bound to aliases and referenced by
/// later commands. A failing command is logged and skipped; only a corrupted
/// ledger stops the run.
pub struct CommandRunner {
    engine: Arc<LedgerEngine>,
    clock: Arc<ManualClock>,
    aliases: HashMap<String, Uuid>,
}

impl CommandRunner {
    /// `clock` must be the clock the engine was built with; `advance_clock`
    /// commands move it.
    pub fn new(engine: Arc<LedgerEngine>, clock: Arc<ManualClock>) -> Self {
        Self {
            engine,
            clock,
            aliases: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &LedgerEngine {
        &self.engine
    }

    pub async fn run<R: BufRead>(&mut self, reader: CommandReader<R>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for (line, parsed) in reader.commands() {
            let outcome = match parsed {
                Ok(command) => self.execute(command).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => summary.applied += 1,
                Err(LedgerError::LedgerCorrupted(reason)) => {
                    error!(line, %reason, "ledger corrupted, stopping");
                    return Err(LedgerError::LedgerCorrupted(reason));
                }
                Err(e) => {
                    warn!(line, error = %e, "command failed");
                    summary.failed += 1;
                }
            }
        }
        info!(applied = summary.applied, failed = summary.failed, "command file processed");
        Ok(summary)
    }

    fn bind(&mut self, alias: Option<String>, id: Uuid) {
        if let Some(alias) = alias {
            debug!(%alias, %id, "alias bound");
            self.aliases.insert(alias, id);
        }
    }

    fn resolve(&self, reference: &str) -> Result<Uuid> {
        if let Some(id) = self.aliases.get(reference) {
            return Ok(*id);
        }
        Uuid::parse_str(reference).map_err(|_| {
            LedgerError::ValidationError(format!("'{reference}' is neither a known alias nor a UUID"))
        })
    }

    pub async fn execute(&mut self, command: Command) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        match command {
            Command::AddPaymentMethod {
                user,
                kind,
                last4,
                brand,
                expiry_month,
                expiry_year,
                make_default,
                alias,
            } => {
                let details = NewPaymentMethod {
                    r#type: kind,
                    last4,
                    brand,
                    expiry_month,
                    expiry_year,
                };
                let method = engine.add_payment_method(&user, details, make_default).await?;
                self.bind(alias, method.id);
            }
            Command::SetDefaultPaymentMethod { user, method } => {
                engine.set_default_payment_method(&user, self.resolve(&method)?).await?;
            }
            Command::RemovePaymentMethod { user, method } => {
                engine.remove_payment_method(&user, self.resolve(&method)?).await?;
            }
            Command::RegisterPromo {
                code,
                discount_type,
                discount_value,
                valid_until,
                max_uses,
                applicable_plans,
                min_amount,
            } => {
                let mut promo = PromoCode::new(&code, discount_type, discount_value, valid_until, max_uses)?
                    .with_plans(applicable_plans);
                if let Some(min) = min_amount {
                    promo = promo.with_min_amount(min);
                }
                engine.register_promo_code(promo).await?;
            }
            Command::DeactivatePromo { code } => {
                engine.deactivate_promo_code(&code).await?;
            }
            Command::ValidatePromo { code, plan_id, amount } => {
                let applied = engine.validate_promo_code(&code, &plan_id, amount).await?;
                info!(%code, plan_id, applied = applied.is_some(), "promo code checked");
            }
            Command::CreateCheckout {
                plan_id,
                plan_name,
                amount,
                interval,
                promo_code,
                customer_email,
                alias,
            } => {
                let mut request = NewCheckout::new(plan_id, plan_name, amount, interval);
                request.promo_code = promo_code;
                request.customer_email = customer_email;
                let session = engine.create_checkout_session(request).await?;
                self.bind(alias, session.id);
            }
            Command::ApplyPromo { session, code } => {
                engine.apply_promo_code(self.resolve(&session)?, &code).await?;
            }
            Command::RemovePromo { session } => {
                engine.remove_promo_code(self.resolve(&session)?).await?;
            }
            Command::ConfirmPayment {
                session,
                user,
                method,
                name,
                email,
                country,
                alias,
            } => {
                let billing = BillingDetails {
                    user_id: user,
                    name,
                    email,
                    country,
                };
                let receipt = engine
                    .confirm_payment(self.resolve(&session)?, self.resolve(&method)?, billing)
                    .await?;
                self.bind(alias, receipt.subscription.id);
            }
            Command::ExpireSessions => {
                engine.expire_abandoned_sessions().await?;
            }
            Command::StartTrial {
                user,
                plan_id,
                plan_name,
                amount,
                interval,
                trial_days,
                alias,
            } => {
                let trial = NewTrial {
                    plan_id,
                    plan_name,
                    amount,
                    interval,
                    trial_days,
                };
                let subscription = engine.start_trial(&user, trial).await?;
                self.bind(alias, subscription.id);
            }
            Command::CancelSubscription {
                subscription,
                immediately,
            } => {
                engine
                    .cancel_subscription(self.resolve(&subscription)?, immediately)
                    .await?;
            }
            Command::ResumeSubscription { subscription } => {
                engine.resume_subscription(self.resolve(&subscription)?).await?;
            }
            Command::RollOver => {
                engine.roll_over_subscriptions().await?;
            }
            Command::AdvanceClock { days, hours, minutes } => {
                let by = Duration::try_days(days)
                    .zip(Duration::try_hours(hours))
                    .zip(Duration::try_minutes(minutes))
                    .and_then(|((days, hours), minutes)| days.checked_add(&hours)?.checked_add(&minutes))
                    .ok_or_else(|| {
                        LedgerError::ValidationError(format!(
                            "cannot move the clock by {days}d {hours}h {minutes}m"
                        ))
                    })?;
                if by < Duration::zero() {
                    return Err(LedgerError::ValidationError(
                        "the clock only moves forward".to_string(),
                    ));
                }
                self.clock.advance(by)?;
                debug!(%by, "clock advanced");
            }
            Command::CaptureOrder {
                buyer,
                order_id,
                amount,
                method,
            } => {
                engine
                    .capture_order_payment(&buyer, &order_id, amount, self.resolve(&method)?)
                    .await?;
            }
            Command::CreateEscrow {
                order_id,
                amount,
                buyer,
                seller,
                milestones,
                alias,
            } => {
                let milestone_aliases: Vec<Option<String>> =
                    milestones.iter().map(|m| m.alias.clone()).collect();
                let request = NewEscrow {
                    order_id,
                    amount,
                    buyer_id: buyer,
                    seller_id: seller,
                    milestones: milestones
                        .into_iter()
                        .map(|m| MilestonePlan {
                            description: m.description,
                            amount: m.amount,
                            due_date: m.due_date,
                            release_conditions: m.release_conditions,
                        })
                        .collect(),
                };
                let account = engine.create_escrow_account(request).await?;
                for (milestone, alias) in account.milestones.iter().zip(milestone_aliases) {
                    self.bind(alias, milestone.id);
                }
                self.bind(alias, account.id);
            }
            Command::FundMilestone { escrow, milestone } => {
                engine
                    .fund_milestone(self.resolve(&escrow)?, self.resolve(&milestone)?)
                    .await?;
            }
            Command::ApproveMilestone {
                escrow,
                milestone,
                party,
            } => {
                engine
                    .approve_milestone(self.resolve(&escrow)?, self.resolve(&milestone)?, party)
                    .await?;
            }
            Command::DisputeMilestone { escrow, milestone } => {
                engine
                    .dispute_milestone(self.resolve(&escrow)?, self.resolve(&milestone)?)
                    .await?;
            }
            Command::ReleaseMilestone { escrow, milestone } => {
                engine
                    .release_milestone(self.resolve(&escrow)?, self.resolve(&milestone)?)
                    .await?;
            }
            Command::ReleaseEscrow { escrow } => {
                engine.release_escrow_funds(self.resolve(&escrow)?).await?;
            }
            Command::DisputeEscrow { escrow } => {
                engine.dispute_escrow(self.resolve(&escrow)?).await?;
            }
            Command::RefundEscrow { escrow } => {
                engine.refund_escrow(self.resolve(&escrow)?).await?;
            }
            Command::Withdraw {
                user,
                amount,
                method,
                alias,
            } => {
                let tx = engine
                    .withdraw_funds(&user, amount, self.resolve(&method)?)
                    .await?;
                self.bind(alias, tx.id);
            }
            Command::SettleTransaction { transaction, outcome } => {
                engine
                    .settle_transaction(self.resolve(&transaction)?, outcome)
                    .await?;
            }
            Command::TrackView { plan_id } => engine.track_plan_view(&plan_id).await,
            Command::TrackClick { plan_id } => engine.track_plan_click(&plan_id).await,
            Command::TrackConversion { plan_id, amount } => {
                engine.track_plan_conversion(&plan_id, amount).await;
            }
        }
        Ok(())
    }
}
